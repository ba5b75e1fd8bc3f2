//! Library exports for mermaid-fix
//!
//! Finds Mermaid diagrams in markdown, validates them against a diagram
//! engine and repairs broken ones through a streaming chat completion.

pub mod api;
pub mod cli_commands;
pub mod config;
pub mod dialog;
pub mod error;
pub mod mermaid;
pub mod notify;
pub mod output;

pub use api::{ApiClient, CompletionService};
pub use config::{AiConfig, Config, RepairConfig};
pub use error::{ApiError, ConfigError, EngineError, RepairError};
pub use mermaid::{FixSessionOutcome, MermaidFixer};
pub use notify::Notifier;
pub use output::OutputHandler;
