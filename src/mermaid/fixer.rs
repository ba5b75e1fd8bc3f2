//! Detection and repair across a whole document.

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::blocks::{extract_blocks, DiagramBlock};
use super::patch::apply_fixes;
use super::repair::{RepairRequest, Repairer};
use super::validate::{ValidationResult, Validator};
use crate::notify::Notifier;

/// A block that failed validation, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockError {
    pub code: String,
    pub error: String,
    pub start_index: usize,
    pub end_index: usize,
    /// 1-based line of the opening fence.
    pub line: usize,
}

impl BlockError {
    pub fn block(&self) -> DiagramBlock {
        DiagramBlock {
            code: self.code.clone(),
            start_index: self.start_index,
            end_index: self.end_index,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectionReport {
    pub has_errors: bool,
    pub errors: Vec<BlockError>,
    /// Number of blocks that were checked.
    pub checked: usize,
}

/// Result of one repair pass over a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixOutcome {
    /// True when at least one block was invalid.
    pub fixed: bool,
    pub result: String,
    /// Per-block results in document order; repaired blocks carry their
    /// fixed code.
    pub blocks: Vec<ValidationResult>,
}

/// What the user chose in the confirmation step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixDecision {
    pub proceed: bool,
    pub model: Option<String>,
    pub custom_prompt: Option<String>,
}

impl FixDecision {
    pub fn decline() -> Self {
        Self::default()
    }

    pub fn proceed(model: impl Into<String>) -> Self {
        Self {
            proceed: true,
            model: Some(model.into()),
            custom_prompt: None,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_prompt = Some(prompt.into());
        self
    }
}

/// Presents failing blocks and asks whether (and how) to repair them.
#[async_trait]
pub trait FixConfirmation: Send + Sync {
    async fn confirm(&self, errors: &[BlockError], default_model: &str) -> FixDecision;
}

/// Always proceeds with the default model. Used for non-interactive runs.
#[derive(Debug, Default, Clone)]
pub struct AutoConfirmation {
    pub custom_prompt: Option<String>,
}

#[async_trait]
impl FixConfirmation for AutoConfirmation {
    async fn confirm(&self, _errors: &[BlockError], default_model: &str) -> FixDecision {
        FixDecision {
            proceed: true,
            model: Some(default_model.to_string()),
            custom_prompt: self.custom_prompt.clone(),
        }
    }
}

/// How an interactive fix ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixSessionOutcome {
    Fixed(FixOutcome),
    NothingToFix,
    Declined,
    Failed,
}

impl FixSessionOutcome {
    pub fn success(&self) -> bool {
        matches!(self, FixSessionOutcome::Fixed(_))
    }

    /// The patched document, when the session succeeded.
    pub fn result(&self) -> Option<&str> {
        match self {
            FixSessionOutcome::Fixed(outcome) => Some(&outcome.result),
            _ => None,
        }
    }
}

/// Validate every block of `document` with `validator`, in order.
pub async fn detect_errors(validator: &Validator, document: &str) -> DetectionReport {
    let mut errors = Vec::new();
    let mut checked = 0;

    for block in extract_blocks(document) {
        checked += 1;
        let result = validator.validate(&block.code).await;
        if let Some(error) = result.error() {
            errors.push(BlockError {
                error: error.to_string(),
                line: block.line_number(document),
                code: block.code,
                start_index: block.start_index,
                end_index: block.end_index,
            });
        }
    }

    log::debug!("checked {} mermaid block(s), {} invalid", checked, errors.len());
    DetectionReport {
        has_errors: !errors.is_empty(),
        errors,
        checked,
    }
}

/// State of a confirmed fix session.
struct FixSession {
    errors: Vec<BlockError>,
    model: String,
    custom_prompt: Option<String>,
}

pub struct MermaidFixer {
    validator: Validator,
    repairer: Repairer,
    notifier: Arc<dyn Notifier>,
    default_model: String,
    default_prompt: Option<String>,
}

impl MermaidFixer {
    pub fn new(validator: Validator, repairer: Repairer, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            validator,
            repairer,
            notifier,
            default_model: String::new(),
            default_prompt: None,
        }
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Instruction override used when the user confirms without one.
    pub fn with_default_prompt(mut self, prompt: Option<String>) -> Self {
        self.default_prompt = prompt;
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validate every block of `document`, in order.
    pub async fn detect_errors(&self, document: &str) -> DetectionReport {
        detect_errors(&self.validator, document).await
    }

    /// Validate every block and repair the invalid ones, one at a time.
    ///
    /// Blocks whose repair fails keep their original source. All fixes are
    /// applied at the end against the offsets of the original scan. An engine
    /// that cannot run leaves the document untouched.
    pub async fn fix_all_in_document(
        &self,
        document: &str,
        model: &str,
        custom_prompt: Option<&str>,
    ) -> FixOutcome {
        if !self.engine_available().await {
            return FixOutcome {
                fixed: false,
                result: document.to_string(),
                blocks: Vec::new(),
            };
        }
        self.repair_pass(document, model, custom_prompt).await
    }

    /// Notify and return false when the diagram engine cannot run.
    async fn engine_available(&self) -> bool {
        match self.validator.ensure_available().await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("{} engine unavailable: {}", self.validator.engine_name(), e);
                self.notifier
                    .show_error(&format!("Cannot check Mermaid diagrams: {}", e));
                false
            }
        }
    }

    async fn repair_pass(&self, document: &str, model: &str, custom_prompt: Option<&str>) -> FixOutcome {
        let blocks: Vec<DiagramBlock> = extract_blocks(document).collect();
        let total = blocks.len();
        let mut results = Vec::with_capacity(total);
        let mut fixes = Vec::new();
        let mut any_invalid = false;

        for (idx, block) in blocks.into_iter().enumerate() {
            let result = self.validator.validate(&block.code).await;
            let Some(error) = result.error().map(str::to_string) else {
                results.push(result);
                continue;
            };
            any_invalid = true;

            let line = block.line_number(document);
            self.notifier.show_info(&format!(
                "Repairing diagram {}/{} (line {})",
                idx + 1,
                total,
                line
            ));

            let request = RepairRequest::new(block.code.clone(), error);
            let repaired = self.repairer.repair(&request, model, custom_prompt).await;

            if repaired != block.code {
                self.notifier
                    .show_success(&format!("Repaired Mermaid diagram at line {}", line));
                results.push(result.with_fixed_code(repaired.clone()));
                fixes.push((block, repaired));
            } else {
                results.push(result);
            }
        }

        log::info!(
            "repair pass finished: {} block(s), {} rewritten",
            total,
            fixes.len()
        );

        FixOutcome {
            fixed: any_invalid,
            result: apply_fixes(document, &fixes),
            blocks: results,
        }
    }

    /// Detect errors, ask for confirmation, then repair.
    ///
    /// Never fails: a declined dialog leaves the document untouched and an
    /// unexpected failure inside the pass is reported and mapped to
    /// [`FixSessionOutcome::Failed`].
    pub async fn fix_interactive(
        &self,
        document: &str,
        confirmation: &dyn FixConfirmation,
    ) -> FixSessionOutcome {
        if !self.engine_available().await {
            return FixSessionOutcome::Failed;
        }

        let report = match AssertUnwindSafe(self.detect_errors(document)).catch_unwind().await {
            Ok(report) => report,
            Err(_) => {
                self.notifier
                    .show_error("Checking Mermaid diagrams failed unexpectedly");
                return FixSessionOutcome::Failed;
            }
        };
        if !report.has_errors {
            return FixSessionOutcome::NothingToFix;
        }

        let decision = confirmation.confirm(&report.errors, &self.default_model).await;
        if !decision.proceed {
            log::debug!("fix declined for {} invalid block(s)", report.errors.len());
            return FixSessionOutcome::Declined;
        }

        let session = FixSession {
            errors: report.errors,
            model: decision
                .model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| self.default_model.clone()),
            custom_prompt: decision.custom_prompt.or_else(|| self.default_prompt.clone()),
        };

        if session.model.is_empty() {
            self.notifier.show_error("No model selected for the repair");
            return FixSessionOutcome::Failed;
        }

        log::info!(
            "repairing {} invalid block(s) with {}",
            session.errors.len(),
            session.model
        );

        let pass = self.repair_pass(document, &session.model, session.custom_prompt.as_deref());
        match AssertUnwindSafe(pass).catch_unwind().await {
            Ok(outcome) => FixSessionOutcome::Fixed(outcome),
            Err(_) => {
                self.notifier
                    .show_error("Fixing Mermaid diagrams failed unexpectedly");
                FixSessionOutcome::Failed
            }
        }
    }
}
