//! User-facing notification channel.
//!
//! The repair pass reports outcomes through a [`Notifier`] and never waits on
//! it. Backends decide where messages go: the terminal, the log, or memory.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Fire-and-forget sink for user-visible messages.
pub trait Notifier: Send + Sync {
    fn show_error(&self, message: &str);

    fn show_success(&self, message: &str);

    /// Progress updates. Backends without a progress display ignore them.
    fn show_info(&self, _message: &str) {}
}

/// Kind of a recorded notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Error,
    Success,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
}

/// Keeps every notification in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    records: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, kind: NotificationKind, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push(Notification {
                kind,
                message: message.to_string(),
            });
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Messages of one kind, in order.
    pub fn of_kind(&self, kind: NotificationKind) -> Vec<String> {
        self.notifications()
            .into_iter()
            .filter(|n| n.kind == kind)
            .map(|n| n.message)
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn show_error(&self, message: &str) {
        self.record(NotificationKind::Error, message);
    }

    fn show_success(&self, message: &str) {
        self.record(NotificationKind::Success, message);
    }

    fn show_info(&self, message: &str) {
        self.record(NotificationKind::Info, message);
    }
}

/// Sends notifications to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_error(&self, message: &str) {
        log::error!("{}", message);
    }

    fn show_success(&self, message: &str) {
        log::info!("{}", message);
    }

    fn show_info(&self, message: &str) {
        log::debug!("{}", message);
    }
}

/// Styled terminal output on stderr with a spinner for progress.
pub struct ConsoleNotifier {
    spinner: Mutex<Option<ProgressBar>>,
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn finish_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(pb) = spinner.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl Notifier for ConsoleNotifier {
    fn show_error(&self, message: &str) {
        self.finish_spinner();
        eprintln!("{} {}", style("error:").red().bold(), message);
    }

    fn show_success(&self, message: &str) {
        self.finish_spinner();
        eprintln!("{} {}", style("ok:").green().bold(), message);
    }

    fn show_info(&self, message: &str) {
        let Ok(mut spinner) = self.spinner.lock() else {
            return;
        };
        let pb = spinner.get_or_insert_with(|| {
            let pb = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
                pb.set_style(template);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });
        pb.set_message(message.to_string());
    }
}

impl Drop for ConsoleNotifier {
    fn drop(&mut self) {
        self.finish_spinner();
    }
}
