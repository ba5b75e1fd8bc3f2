//! Dialog and form sessions, and the terminal confirmation dialog built on them.
//!
//! A [`DialogSession`] tracks the lifecycle of one modal interaction (open,
//! loading, error, closed with a result). A [`FormSession`] holds named fields
//! with validation rules and field-level messages. Dialogs compose the two
//! instead of inheriting from a base type.

use async_trait::async_trait;
use console::{style, Term};
use std::io;

use crate::mermaid::{BlockError, FixConfirmation, FixDecision};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    Open,
    Loading,
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogResult<T> {
    Confirmed(T),
    Cancelled,
}

/// Lifecycle of one dialog. Once closed, every operation is a no-op.
#[derive(Debug)]
pub struct DialogSession<T> {
    state: DialogState,
    result: Option<DialogResult<T>>,
}

impl<T> Default for DialogSession<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DialogSession<T> {
    pub fn new() -> Self {
        Self {
            state: DialogState::Open,
            result: None,
        }
    }

    pub fn state(&self) -> &DialogState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != DialogState::Closed
    }

    pub fn is_loading(&self) -> bool {
        self.state == DialogState::Loading
    }

    pub fn error(&self) -> Option<&str> {
        match &self.state {
            DialogState::Error(msg) => Some(msg),
            _ => None,
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        if !self.is_open() {
            return;
        }
        self.state = if loading {
            DialogState::Loading
        } else {
            DialogState::Open
        };
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        if self.is_open() {
            self.state = DialogState::Error(message.into());
        }
    }

    pub fn clear_error(&mut self) {
        if matches!(self.state, DialogState::Error(_)) {
            self.state = DialogState::Open;
        }
    }

    pub fn confirm(&mut self, value: T) {
        self.finish(DialogResult::Confirmed(value));
    }

    pub fn cancel(&mut self) {
        self.finish(DialogResult::Cancelled);
    }

    /// Dismiss without a result. Same as cancelling.
    pub fn close(&mut self) {
        self.cancel();
    }

    fn finish(&mut self, result: DialogResult<T>) {
        if self.is_open() {
            self.state = DialogState::Closed;
            self.result = Some(result);
        }
    }

    /// The dialog's result. A dialog that was never closed counts as cancelled.
    pub fn into_result(self) -> DialogResult<T> {
        self.result.unwrap_or(DialogResult::Cancelled)
    }
}

/// Validation rule for a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Required,
    MaxLength(usize),
    OneOf(Vec<String>),
}

impl Rule {
    fn check(&self, label: &str, value: &str) -> Option<String> {
        match self {
            Rule::Required if value.trim().is_empty() => Some(format!("{} is required", label)),
            Rule::MaxLength(max) if value.chars().count() > *max => {
                Some(format!("{} must be at most {} characters", label, max))
            }
            Rule::OneOf(allowed) if !value.is_empty() && !allowed.iter().any(|a| a == value) => {
                Some(format!("{} must be one of: {}", label, allowed.join(", ")))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Field {
    name: String,
    label: String,
    value: String,
    rules: Vec<Rule>,
    error: Option<String>,
}

/// Named fields with rules and per-field error messages.
#[derive(Debug, Clone, Default)]
pub struct FormSession {
    fields: Vec<Field>,
}

impl FormSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, label: &str, rules: Vec<Rule>) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            label: label.to_string(),
            value: String::new(),
            rules,
            error: None,
        });
        self
    }

    /// Set a field's value and clear its error. Returns false for unknown fields.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.value = value.into();
                field.error = None;
                true
            }
            None => false,
        }
    }

    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Run every rule; the first failing rule of each field sets its error.
    pub fn validate(&mut self) -> bool {
        for field in &mut self.fields {
            field.error = field
                .rules
                .iter()
                .find_map(|rule| rule.check(&field.label, &field.value));
        }
        self.is_valid()
    }

    pub fn is_valid(&self) -> bool {
        self.fields.iter().all(|f| f.error.is_none())
    }

    pub fn error(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.error.as_deref())
    }

    /// Field errors in declaration order.
    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.fields
            .iter()
            .filter_map(|f| f.error.as_deref().map(|e| (f.name.as_str(), e)))
            .collect()
    }
}

/// Line-oriented terminal I/O used by the confirmation dialog.
pub trait Prompter {
    fn say(&mut self, line: &str) -> io::Result<()>;

    fn ask(&mut self, question: &str) -> io::Result<String>;
}

impl Prompter for Term {
    fn say(&mut self, line: &str) -> io::Result<()> {
        self.write_line(line)
    }

    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.write_str(question)?;
        self.read_line()
    }
}

const MAX_ATTEMPTS: usize = 3;
const MODEL_MAX_LEN: usize = 128;
const PROMPT_MAX_LEN: usize = 4000;
const PREVIEW_LINES: usize = 3;

/// Turn the model answer into a model id: empty means the default, a number
/// picks from `choices`, anything else is taken verbatim.
fn resolve_model(answer: &str, choices: &[String], default_model: &str) -> String {
    let answer = answer.trim();
    if answer.is_empty() {
        return default_model.to_string();
    }
    match answer.parse::<usize>() {
        Ok(n) if n >= 1 && n <= choices.len() => choices[n - 1].clone(),
        _ => answer.to_string(),
    }
}

/// Walk the user through confirming a repair. I/O failures (including EOF)
/// dismiss the dialog.
pub fn run_confirmation_dialog<P: Prompter>(
    prompter: &mut P,
    errors: &[BlockError],
    choices: &[String],
    default_model: &str,
) -> FixDecision {
    let mut dialog = DialogSession::<FixDecision>::new();
    if let Err(e) = drive_dialog(prompter, &mut dialog, errors, choices, default_model) {
        log::debug!("confirmation dialog dismissed: {}", e);
        dialog.close();
    }

    match dialog.into_result() {
        DialogResult::Confirmed(decision) => decision,
        DialogResult::Cancelled => FixDecision::decline(),
    }
}

fn drive_dialog<P: Prompter>(
    prompter: &mut P,
    dialog: &mut DialogSession<FixDecision>,
    errors: &[BlockError],
    choices: &[String],
    default_model: &str,
) -> io::Result<()> {
    prompter.say(&format!(
        "{}",
        style(format!("Found {} invalid Mermaid diagram(s):", errors.len())).yellow().bold()
    ))?;
    for (idx, error) in errors.iter().enumerate() {
        let summary = error.error.lines().next().unwrap_or("syntax error");
        prompter.say(&format!(
            "  {} line {}: {}",
            style(format!("[{}]", idx + 1)).cyan(),
            error.line,
            summary
        ))?;
        for line in error.code.lines().take(PREVIEW_LINES) {
            prompter.say(&format!("      {}", style(line).dim()))?;
        }
    }

    let answer = prompter.ask("Repair them with AI? [y/N] ")?;
    if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
        dialog.cancel();
        return Ok(());
    }

    prompter.say("Models:")?;
    for (idx, model) in choices.iter().enumerate() {
        let marker = if model == default_model { " (default)" } else { "" };
        prompter.say(&format!("  {}) {}{}", idx + 1, model, marker))?;
    }

    let mut form = FormSession::new()
        .field("model", "Model", vec![Rule::Required, Rule::MaxLength(MODEL_MAX_LEN)])
        .field("prompt", "Custom instructions", vec![Rule::MaxLength(PROMPT_MAX_LEN)]);

    for _ in 0..MAX_ATTEMPTS {
        let model = prompter.ask(&format!("Model [{}]: ", default_model))?;
        let prompt = prompter.ask("Custom instructions (empty for the built-in rules): ")?;

        form.set("model", resolve_model(&model, choices, default_model));
        form.set("prompt", prompt.trim());

        if form.validate() {
            let model = form.value("model").unwrap_or(default_model).to_string();
            let prompt = form.value("prompt").unwrap_or_default();
            let mut decision = FixDecision::proceed(model);
            if !prompt.is_empty() {
                decision = decision.with_prompt(prompt);
            }
            dialog.confirm(decision);
            return Ok(());
        }

        let message = form
            .errors()
            .into_iter()
            .map(|(_, e)| e)
            .collect::<Vec<_>>()
            .join("; ");
        prompter.say(&format!("{} {}", style("error:").red().bold(), message))?;
        dialog.set_error(message);
    }

    dialog.cancel();
    Ok(())
}

/// Confirmation dialog on the controlling terminal.
#[derive(Debug, Clone)]
pub struct ConsoleConfirmation {
    choices: Vec<String>,
}

impl ConsoleConfirmation {
    pub fn new(choices: Vec<String>) -> Self {
        Self { choices }
    }
}

#[async_trait]
impl FixConfirmation for ConsoleConfirmation {
    async fn confirm(&self, errors: &[BlockError], default_model: &str) -> FixDecision {
        let errors = errors.to_vec();
        let choices = self.choices.clone();
        let default_model = default_model.to_string();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut term = Term::stderr();
            run_confirmation_dialog(&mut term, &errors, &choices, &default_model)
        })
        .await;

        outcome.unwrap_or_else(|e| {
            log::warn!("confirmation dialog failed: {}", e);
            FixDecision::decline()
        })
    }
}
