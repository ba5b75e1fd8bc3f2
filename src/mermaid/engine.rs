//! Diagram engines: the collaborators that decide whether Mermaid source parses.
//!
//! Two backends are provided:
//! - [`NativeEngine`]: in-process parse via `mermaid-rs-renderer`.
//! - [`MmdcEngine`]: the official Mermaid CLI (`mmdc`), rendering to a
//!   throwaway SVG and reporting stderr on failure.

use async_trait::async_trait;
use duct::cmd;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{ConfigError, EngineError};

/// Something that can parse one Mermaid diagram.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DiagramEngine: Send + Sync {
    /// Parse `code`, failing with a human-readable message on invalid syntax.
    async fn parse(&self, code: &str) -> Result<(), EngineError>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Fail with [`EngineError::Unavailable`] when the backend cannot run at
    /// all, so a missing tool is not reported as invalid diagrams.
    async fn ensure_available(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Which engine backend to construct.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Native,
    Mmdc,
}

impl std::str::FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "native" => Ok(EngineKind::Native),
            "mmdc" | "cli" => Ok(EngineKind::Mmdc),
            other => Err(ConfigError::UnknownEngine(other.to_string())),
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Native => write!(f, "native"),
            EngineKind::Mmdc => write!(f, "mmdc"),
        }
    }
}

impl EngineKind {
    pub fn build(self) -> Arc<dyn DiagramEngine> {
        match self {
            EngineKind::Native => Arc::new(NativeEngine),
            EngineKind::Mmdc => Arc::new(MmdcEngine::default()),
        }
    }
}

/// In-process parser backed by `mermaid-rs-renderer`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEngine;

#[async_trait]
impl DiagramEngine for NativeEngine {
    async fn parse(&self, code: &str) -> Result<(), EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::Syntax("empty diagram".to_string()));
        }

        let source = code.to_string();
        // A parser panic comes back as a JoinError.
        let outcome = tokio::task::spawn_blocking(move || {
            mermaid_rs_renderer::parser::parse_mermaid(&source)
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(EngineError::Syntax(message)),
            Err(join_error) => {
                log::warn!("native mermaid parser panicked: {}", join_error);
                Err(EngineError::Syntax(format!("parser crashed: {}", join_error)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "native"
    }
}

/// Validates by rendering through the Mermaid CLI.
#[derive(Debug, Clone)]
pub struct MmdcEngine {
    program: PathBuf,
}

impl Default for MmdcEngine {
    fn default() -> Self {
        Self {
            program: PathBuf::from("mmdc"),
        }
    }
}

impl MmdcEngine {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn check_version(program: PathBuf) -> Result<(), EngineError> {
        let result = cmd!(&program, "--version")
            .stdout_capture()
            .stderr_capture()
            .unchecked()
            .run();

        match result {
            Ok(result) if result.status.success() => Ok(()),
            Ok(result) => Err(EngineError::Unavailable(format!(
                "`{} --version` exited with {}",
                program.display(),
                result.status
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::Unavailable(
                format!("`{}` not found on PATH", program.display()),
            )),
            Err(e) => Err(EngineError::Unavailable(e.to_string())),
        }
    }

    fn run_blocking(program: PathBuf, code: String) -> Result<(), EngineError> {
        let mut input = tempfile::Builder::new().suffix(".mmd").tempfile()?;
        input.write_all(code.as_bytes())?;
        input.flush()?;
        let output = tempfile::Builder::new().suffix(".svg").tempfile()?;

        let result = cmd!(
            &program,
            "--quiet",
            "--input",
            input.path(),
            "--output",
            output.path()
        )
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run();

        let result = match result {
            Ok(result) => result,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::Unavailable(format!(
                    "`{}` not found on PATH",
                    program.display()
                )));
            }
            Err(e) => return Err(EngineError::Io(e)),
        };

        if result.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            Err(EngineError::Syntax(extract_cli_error(&stderr)))
        }
    }
}

#[async_trait]
impl DiagramEngine for MmdcEngine {
    async fn parse(&self, code: &str) -> Result<(), EngineError> {
        let program = self.program.clone();
        let code = code.to_string();
        tokio::task::spawn_blocking(move || Self::run_blocking(program, code))
            .await
            .map_err(|e| EngineError::Unavailable(format!("mmdc task failed: {}", e)))?
    }

    fn name(&self) -> &'static str {
        "mmdc"
    }

    async fn ensure_available(&self) -> Result<(), EngineError> {
        let program = self.program.clone();
        tokio::task::spawn_blocking(move || Self::check_version(program))
            .await
            .map_err(|e| EngineError::Unavailable(format!("mmdc task failed: {}", e)))?
    }
}

/// Pull the most useful line out of mmdc's stderr.
///
/// mmdc prints a stack trace after the parser message; the first line that
/// mentions an error is what a human (or a model) needs.
fn extract_cli_error(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    if let Some(idx) = lines
        .iter()
        .position(|l| l.starts_with("Parse error") || l.starts_with("Error:") || l.contains("Lexical error"))
    {
        // Parser errors continue on the following lines with the caret marker
        // and the expectation list.
        let tail: Vec<&str> = lines[idx..]
            .iter()
            .take_while(|l| !l.starts_with("at "))
            .take(4)
            .copied()
            .collect();
        return tail.join("\n");
    }

    lines.join("\n")
}
