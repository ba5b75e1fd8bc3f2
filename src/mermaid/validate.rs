use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::engine::DiagramEngine;
use crate::error::EngineError;

/// Outcome of checking one diagram.
///
/// `error` is present exactly when the diagram is invalid; the constructors
/// are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    original_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixed_code: Option<String>,
}

impl ValidationResult {
    pub fn valid(code: impl Into<String>) -> Self {
        Self {
            is_valid: true,
            error: None,
            original_code: code.into(),
            fixed_code: None,
        }
    }

    pub fn invalid(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
            original_code: code.into(),
            fixed_code: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn original_code(&self) -> &str {
        &self.original_code
    }

    pub fn fixed_code(&self) -> Option<&str> {
        self.fixed_code.as_deref()
    }

    /// Record the repaired source for an invalid diagram.
    pub fn with_fixed_code(mut self, fixed: impl Into<String>) -> Self {
        self.fixed_code = Some(fixed.into());
        self
    }
}

/// Syntax validator over an injected diagram engine.
#[derive(Clone)]
pub struct Validator {
    engine: Arc<dyn DiagramEngine>,
}

impl Validator {
    pub fn new(engine: Arc<dyn DiagramEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Whether the engine can run at all.
    pub async fn ensure_available(&self) -> Result<(), EngineError> {
        self.engine.ensure_available().await
    }

    /// Check one diagram. Engine failures, panics included, come back as an
    /// invalid result, never as an error.
    pub async fn validate(&self, code: &str) -> ValidationResult {
        let parse = async { self.engine.parse(code).await };
        match AssertUnwindSafe(parse).catch_unwind().await {
            Ok(Ok(())) => ValidationResult::valid(code),
            Ok(Err(e)) => {
                let message = e.message();
                log::debug!("{} engine rejected diagram: {}", self.engine.name(), message);
                ValidationResult::invalid(code, message)
            }
            Err(_) => {
                log::warn!("{} engine panicked while parsing a diagram", self.engine.name());
                ValidationResult::invalid(code, "diagram engine crashed")
            }
        }
    }
}
