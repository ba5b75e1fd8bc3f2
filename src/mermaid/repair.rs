//! Asking a chat model to rewrite a broken diagram.
//!
//! The completion stream is folded into one string and only used once the
//! stream finishes. Any failure on the way (request or stream errors, a
//! crashed service, timeout, cancellation, an empty answer) resolves to the
//! original code.

use futures::{FutureExt, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::api::{ChatMessage, ChunkStream, CompletionRequest, CompletionService};
use crate::error::{ApiError, RepairError};
use crate::notify::Notifier;

/// Rules given to the model when no custom prompt is configured.
pub const DEFAULT_REPAIR_PROMPT: &str = "You repair Mermaid diagrams that fail to parse.

RULES:
- Preserve the original intent: keep every node, edge, participant and label unless it cannot be expressed validly
- Output only the corrected Mermaid source, nothing else
- Never add explanations, commentary or markdown prose
- Never wrap the output in ``` fences
- If a nested or complex construct keeps failing, simplify it rather than emit something that still fails to parse
- Replace characters that are illegal in node identifiers (spaces, punctuation, non-ASCII) with underscores
- Quote labels containing special characters and use one quoting style (double quotes) throughout";

pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Input to one repair call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairRequest {
    pub code: String,
    pub error: String,
}

impl RepairRequest {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            error: error.into(),
        }
    }
}

#[derive(Clone)]
pub struct Repairer {
    service: Arc<dyn CompletionService>,
    notifier: Arc<dyn Notifier>,
    temperature: f32,
    timeout: Duration,
    cancel: CancellationToken,
}

impl Repairer {
    pub fn new(service: Arc<dyn CompletionService>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            service,
            notifier,
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Abort in-flight repairs when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build_messages(request: &RepairRequest, custom_prompt: Option<&str>) -> Vec<ChatMessage> {
        let system = match custom_prompt.map(str::trim) {
            Some(prompt) if !prompt.is_empty() => prompt,
            _ => DEFAULT_REPAIR_PROMPT,
        };

        let user = format!(
            "This Mermaid diagram fails to render.\n\nError:\n{}\n\nDiagram:\n{}\n\nReturn the corrected Mermaid code only.",
            request.error.trim(),
            request.code
        );

        vec![ChatMessage::system(system), ChatMessage::user(user)]
    }

    /// Repair `request.code`, surfacing the reason when no fix was produced.
    pub async fn try_repair(
        &self,
        request: &RepairRequest,
        model: &str,
        custom_prompt: Option<&str>,
    ) -> Result<String, RepairError> {
        let completion = CompletionRequest {
            model: model.to_string(),
            messages: Self::build_messages(request, custom_prompt),
            temperature: self.temperature,
            stream: true,
        };

        let work = async {
            let stream = self.service.stream_completion(completion).await?;
            collect_stream(stream).await
        };
        let work = AssertUnwindSafe(work).catch_unwind();

        let text = tokio::select! {
            _ = self.cancel.cancelled() => return Err(RepairError::Cancelled),
            outcome = tokio::time::timeout(self.timeout, work) => match outcome {
                Ok(Ok(result)) => result?,
                Ok(Err(_)) => return Err(RepairError::Crashed),
                Err(_) => return Err(RepairError::Timeout(self.timeout)),
            },
        };

        clean_model_output(&text)
    }

    /// Repair `request.code`. Never fails: on any error the user is notified
    /// and the original code is returned unchanged.
    pub async fn repair(&self, request: &RepairRequest, model: &str, custom_prompt: Option<&str>) -> String {
        match self.try_repair(request, model, custom_prompt).await {
            Ok(code) => code,
            Err(e) => {
                log::warn!("keeping original diagram, repair failed: {}", e);
                self.notifier
                    .show_error(&format!("Could not repair Mermaid diagram: {}", e));
                request.code.clone()
            }
        }
    }
}

/// Concatenate the text deltas of a completion stream.
///
/// Returns only after the stream is exhausted; an error item discards
/// everything collected so far.
pub async fn collect_stream(mut stream: ChunkStream) -> Result<String, ApiError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(chunk?.delta_text());
    }
    Ok(text)
}

/// Reduce the model's answer to diagram source.
///
/// A fenced answer yields the body of its first fence; text around the fence
/// is dropped. An unclosed fence, or a fence left inside the body, makes the
/// answer [`RepairError::Malformed`].
pub fn clean_model_output(text: &str) -> Result<String, RepairError> {
    let trimmed = text.trim();
    let body = match trimmed.find("```") {
        Some(open) => fenced_body(&trimmed[open + 3..]).ok_or(RepairError::Malformed)?,
        None => trimmed,
    };

    let body = body.trim();
    if body.contains("```") {
        return Err(RepairError::Malformed);
    }
    if body.is_empty() {
        return Err(RepairError::EmptyResponse);
    }
    Ok(body.to_string())
}

/// Body of a fence whose opening backticks are already consumed, or `None`
/// when the fence never closes.
fn fenced_body(after_open: &str) -> Option<&str> {
    let Some((info, rest)) = after_open.split_once('\n') else {
        return after_open.strip_suffix("```").map(strip_info_tag);
    };

    // The opening line is either an info string or already diagram code.
    let body = if is_info_string(info.trim()) { rest } else { after_open };
    let mut offset = 0;
    for line in body.split_inclusive('\n') {
        if line.trim_start().starts_with("```") {
            return Some(&body[..offset]);
        }
        offset += line.len();
    }
    None
}

fn is_info_string(info: &str) -> bool {
    matches!(info, "" | "mermaid" | "mmd")
}

/// Drop a leading `mermaid`/`mmd` tag from a one-line fence body.
fn strip_info_tag(body: &str) -> &str {
    for tag in ["mermaid", "mmd"] {
        if let Some(rest) = body.strip_prefix(tag) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return rest;
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::CompletionChunk;
    use pretty_assertions::assert_eq;

    use assert_matches::assert_matches;

    #[test]
    fn strips_enclosing_fence_with_language() {
        assert_eq!(
            clean_model_output("  ```mermaid\ngraph TD\n  A-->B\n```\n").unwrap(),
            "graph TD\n  A-->B"
        );
    }

    #[test]
    fn strips_bare_fence() {
        assert_eq!(
            clean_model_output("```\npie\n  \"a\": 1\n```").unwrap(),
            "pie\n  \"a\": 1"
        );
    }

    #[test]
    fn leaves_unfenced_output_alone() {
        assert_eq!(clean_model_output("\n graph TD; A-->B; \n").unwrap(), "graph TD; A-->B;");
    }

    #[test]
    fn single_line_fence_keeps_the_first_keyword() {
        assert_eq!(clean_model_output("```graph TD; A-->B;```").unwrap(), "graph TD; A-->B;");
        assert_eq!(
            clean_model_output("```mermaid graph TD; A-->B;```").unwrap(),
            "graph TD; A-->B;"
        );
    }

    #[test]
    fn code_on_the_opening_fence_line_is_kept() {
        assert_eq!(
            clean_model_output("```graph TD\n  A-->B\n```").unwrap(),
            "graph TD\n  A-->B"
        );
    }

    #[test]
    fn prose_around_the_fence_is_dropped() {
        let answer = "Here is the fix:\n```mermaid\ngraph TD; A-->B;\n```\nThe arrow needed a head.";
        assert_eq!(clean_model_output(answer).unwrap(), "graph TD; A-->B;");
    }

    #[test]
    fn unclosed_fence_is_malformed() {
        assert_matches!(
            clean_model_output("```mermaid\ngraph TD; A-->B;"),
            Err(RepairError::Malformed)
        );
    }

    #[test]
    fn empty_fence_is_an_empty_answer() {
        assert_matches!(clean_model_output("```mermaid\n```"), Err(RepairError::EmptyResponse));
        assert_matches!(clean_model_output("```mermaid```"), Err(RepairError::EmptyResponse));
    }

    #[test]
    fn custom_prompt_replaces_rules() {
        let request = RepairRequest::new("graph TD\n A--", "Parse error on line 2");
        let messages = Repairer::build_messages(&request, Some("Only fix arrows."));
        assert_eq!(messages[0], ChatMessage::system("Only fix arrows."));
        assert_eq!(messages[1].role, "user");
        assert!(messages[1].content.contains("Parse error on line 2"));
        assert!(messages[1].content.contains("graph TD\n A--"));
    }

    #[test]
    fn blank_custom_prompt_keeps_default_rules() {
        let request = RepairRequest::new("x", "y");
        let messages = Repairer::build_messages(&request, Some("   "));
        assert_eq!(messages[0].content, DEFAULT_REPAIR_PROMPT);
    }

    #[tokio::test]
    async fn collect_concatenates_deltas_in_order() {
        let chunks = vec![
            Ok(CompletionChunk::default()),
            Ok(CompletionChunk::text("graph TD;")),
            Ok(CompletionChunk::text(" A-->B;")),
        ];
        let stream = futures::stream::iter(chunks).boxed();
        assert_eq!(collect_stream(stream).await.unwrap(), "graph TD; A-->B;");
    }

    #[tokio::test]
    async fn collect_fails_on_stream_error() {
        let chunks = vec![
            Ok(CompletionChunk::text("graph")),
            Err(ApiError::Stream("connection reset".into())),
            Ok(CompletionChunk::text(" TD")),
        ];
        let stream = futures::stream::iter(chunks).boxed();
        assert!(collect_stream(stream).await.is_err());
    }
}
