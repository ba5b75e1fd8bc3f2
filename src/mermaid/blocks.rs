//! Locating fenced Mermaid blocks inside markdown text.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Opening fence of a Mermaid block, without the trailing newline.
pub const OPEN_FENCE: &str = "```mermaid";
/// Closing fence of a Mermaid block.
pub const CLOSE_FENCE: &str = "```";

fn block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Non-greedy body: the nearest closing fence ends the block.
    PATTERN.get_or_init(|| Regex::new(r"(?s)```mermaid\n(.*?)\n```").expect("valid block pattern"))
}

/// One fenced Mermaid region found in a document.
///
/// Offsets are byte offsets into the document the block was extracted
/// from. `end_index` is exclusive and covers the closing fence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagramBlock {
    pub code: String,
    pub start_index: usize,
    pub end_index: usize,
}

impl DiagramBlock {
    /// Length in bytes of the whole fenced region.
    pub fn span_len(&self) -> usize {
        self.end_index - self.start_index
    }

    /// 1-based line number of the opening fence in `document`.
    pub fn line_number(&self, document: &str) -> usize {
        document[..self.start_index].matches('\n').count() + 1
    }
}

/// Lazy iterator over the blocks of one document, in document order.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    document: &'a str,
    pos: usize,
}

impl Iterator for Blocks<'_> {
    type Item = DiagramBlock;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos > self.document.len() {
            return None;
        }
        let caps = block_pattern().captures_at(self.document, self.pos)?;
        let whole = caps.get(0)?;
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        self.pos = whole.end();
        Some(DiagramBlock {
            code: body.to_string(),
            start_index: whole.start(),
            end_index: whole.end(),
        })
    }
}

/// Scan `document` for `` ```mermaid `` blocks.
///
/// An opening fence without a closing fence produces nothing.
pub fn extract_blocks(document: &str) -> Blocks<'_> {
    Blocks { document, pos: 0 }
}

/// Wrap diagram source in Mermaid fences.
pub fn fence(code: &str) -> String {
    format!("{OPEN_FENCE}\n{code}\n{CLOSE_FENCE}")
}
