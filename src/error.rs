//! Error types shared across the crate.
//!
//! Only the collaborator seams carry typed errors. The repair pass itself
//! absorbs every failure and converts it to data, so nothing here ever
//! reaches the caller of [`crate::mermaid::MermaidFixer`].

use thiserror::Error;

/// Errors raised by the chat completion client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{provider} API returned {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("stream error: {0}")]
    Stream(String),

    #[error(transparent)]
    OpenAI(#[from] async_openai::error::OpenAIError),

    #[error("could not decode stream event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("API key is not configured for provider {0}")]
    MissingApiKey(String),
}

/// Errors raised by a diagram engine while parsing one diagram.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The diagram source was rejected. The message is shown to the user
    /// and handed to the model as repair context.
    #[error("{0}")]
    Syntax(String),

    #[error("diagram engine unavailable: {0}")]
    Unavailable(String),

    #[error("diagram engine I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Human-readable message for a validation result. Empty messages
    /// collapse to a generic "syntax error".
    pub fn message(&self) -> String {
        let text = match self {
            EngineError::Syntax(msg) => msg.trim().to_string(),
            other => other.to_string(),
        };
        if text.is_empty() {
            "syntax error".to_string()
        } else {
            text
        }
    }
}

/// Why a repair attempt produced no usable code. The repairer turns all of
/// these into the fail-open path.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("model did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("repair was cancelled")]
    Cancelled,

    #[error("completion service crashed")]
    Crashed,

    #[error("model returned an empty diagram")]
    EmptyResponse,

    #[error("model answer is not a single Mermaid diagram")]
    Malformed,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unknown diagram engine `{0}` (expected `native` or `mmdc`)")]
    UnknownEngine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_syntax_message_falls_back() {
        assert_eq!(EngineError::Syntax("   ".into()).message(), "syntax error");
        assert_eq!(
            EngineError::Syntax("Parse error on line 1".into()).message(),
            "Parse error on line 1"
        );
    }

    #[test]
    fn unavailable_engine_message_is_descriptive() {
        let err = EngineError::Unavailable("mmdc not found".into());
        assert_eq!(err.message(), "diagram engine unavailable: mmdc not found");
    }
}
