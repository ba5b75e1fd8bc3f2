use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use walkdir::WalkDir;

use crate::api::ApiClient;
use crate::config::Config;
use crate::dialog::ConsoleConfirmation;
use crate::mermaid::{
    detect_errors, AutoConfirmation, DetectionReport, FixConfirmation, FixOutcome,
    FixSessionOutcome, MermaidFixer, Repairer, Validator,
};
use crate::notify::{ConsoleNotifier, Notifier};
use crate::output::OutputHandler;

const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown", "mdx"];

/// Options for the `fix` command.
#[derive(Debug, Clone, Default)]
pub struct FixOptions {
    pub file: PathBuf,
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub yes: bool,
    pub dry_run: bool,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FileReport<'a> {
    path: String,
    #[serde(flatten)]
    report: &'a DetectionReport,
}

/// JSON shape of a `fix` run.
#[derive(Debug, Serialize)]
struct FixReport<'a> {
    outcome: &'static str,
    #[serde(flatten)]
    fix: Option<&'a FixOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    written: Option<String>,
}

pub struct CommandRunner {
    config: Config,
    output: OutputHandler,
}

impl CommandRunner {
    pub fn new(config: Config, output: OutputHandler) -> Self {
        Self { config, output }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn validator(&self) -> Validator {
        Validator::new(self.config.engine.build())
    }

    fn fixer(&self, notifier: Arc<dyn Notifier>) -> Result<MermaidFixer> {
        let timeout = Duration::from_secs(self.config.repair.timeout_secs.max(1));
        let client = ApiClient::new(&self.config.ai, timeout)
            .context("Failed to create HTTP client")?;
        let repairer = Repairer::new(Arc::new(client), notifier.clone())
            .with_temperature(self.config.repair.temperature)
            .with_timeout(timeout);

        Ok(MermaidFixer::new(self.validator(), repairer, notifier)
            .with_default_model(self.config.ai.model.clone())
            .with_default_prompt(self.config.repair.custom_prompt.clone()))
    }

    /// Validate every Mermaid block under `paths`. Returns true when all are valid.
    pub async fn check(&mut self, paths: &[PathBuf]) -> Result<bool> {
        let files = collect_markdown_files(paths)?;
        let validator = self.validator();
        validator
            .ensure_available()
            .await
            .with_context(|| format!("Cannot run the {} diagram engine", validator.engine_name()))?;

        let mut reports = Vec::with_capacity(files.len());
        for file in &files {
            let document = fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let report = detect_errors(&validator, &document).await;
            reports.push((file.clone(), report));
        }

        let blocks: usize = reports.iter().map(|(_, r)| r.checked).sum();
        let invalid: usize = reports.iter().map(|(_, r)| r.errors.len()).sum();

        if self.output.is_json() {
            let json: Vec<FileReport> = reports
                .iter()
                .map(|(path, report)| FileReport {
                    path: path.display().to_string(),
                    report,
                })
                .collect();
            self.output.print_json(&json)?;
        } else {
            for (path, report) in &reports {
                self.output.print_check_report(path, report)?;
            }
            self.output.print_summary(files.len(), blocks, invalid)?;
        }

        log::info!(
            "checked {} file(s) with the {} engine",
            files.len(),
            validator.engine_name()
        );
        Ok(invalid == 0)
    }

    /// Interactive fix of one file. Returns the session outcome after writing
    /// (or previewing) the result.
    pub async fn fix(&mut self, options: FixOptions) -> Result<FixSessionOutcome> {
        let document = fs::read_to_string(&options.file)
            .with_context(|| format!("Failed to read {}", options.file.display()))?;

        if let Some(model) = &options.model {
            self.config.ai.model = model.clone();
        }
        if options.prompt.is_some() {
            self.config.repair.custom_prompt = options.prompt.clone();
        }

        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier::new());
        let fixer = self.fixer(notifier)?;

        let confirmation: Box<dyn FixConfirmation> = if options.yes {
            Box::new(AutoConfirmation {
                custom_prompt: self.config.repair.custom_prompt.clone(),
            })
        } else {
            Box::new(ConsoleConfirmation::new(self.config.ai.model_choices()))
        };

        let outcome = fixer.fix_interactive(&document, confirmation.as_ref()).await;

        let mut written = None;
        if let FixSessionOutcome::Fixed(fix) = &outcome {
            if !self.output.is_json() {
                let shown = options.output.as_ref().unwrap_or(&options.file);
                self.output.print_diff(shown, &document, &fix.result)?;
                self.output.print_fix_outcome(fix)?;
            }
            if fix.result != document && !options.dry_run {
                let target = options.output.as_ref().unwrap_or(&options.file);
                write_document(target, &fix.result)?;
                written = Some(target.display().to_string());
            }
        }

        if self.output.is_json() {
            let (name, fix) = match &outcome {
                FixSessionOutcome::Fixed(fix) => ("fixed", Some(fix)),
                FixSessionOutcome::NothingToFix => ("nothing_to_fix", None),
                FixSessionOutcome::Declined => ("declined", None),
                FixSessionOutcome::Failed => ("failed", None),
            };
            self.output.print_json(&FixReport {
                outcome: name,
                fix,
                written: written.clone(),
            })?;
        }

        let status = match (&outcome, &written) {
            (FixSessionOutcome::Fixed(_), Some(target)) => format!("Wrote {}", target),
            (FixSessionOutcome::Fixed(_), None) => "No changes written".to_string(),
            (FixSessionOutcome::NothingToFix, _) => {
                "All Mermaid diagrams are valid, nothing to fix".to_string()
            }
            (FixSessionOutcome::Declined, _) => "No changes made".to_string(),
            (FixSessionOutcome::Failed, _) => "Repair failed, no changes made".to_string(),
        };
        self.output.print_system(&status)?;

        Ok(outcome)
    }

    /// Print the active config; with `init`, write defaults first.
    pub fn show_config(&mut self, path: &Path, init: bool) -> Result<()> {
        if init {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            Config::default().save_to_file(path)?;
            self.output
                .print_system(&format!("Wrote default config to {}", path.display()))?;
            self.config = Config::default();
        }

        self.output.print_text(&format!(
            "# {}\n{}",
            path.display(),
            self.config.to_display_yaml()?
        ))?;
        Ok(())
    }
}

/// Expand `paths` into markdown files. Directories are walked recursively;
/// explicitly named files are kept whatever their extension.
pub fn collect_markdown_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_file() {
            files.push(path.clone());
            continue;
        }
        if !path.exists() {
            anyhow::bail!("{} does not exist", path.display());
        }

        for entry in WalkDir::new(path).sort_by_file_name() {
            let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let is_markdown = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| MARKDOWN_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            if is_markdown {
                files.push(entry.into_path());
            }
        }
    }

    Ok(files)
}

fn write_document(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
