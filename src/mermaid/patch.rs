//! Splicing repaired diagrams back into their document.

use super::blocks::{fence, DiagramBlock};

/// Replace `block`'s fenced region in `document` with `fixed_code`.
///
/// Stateless and single-block. Offsets must refer to `document` as given;
/// see [`apply_fixes`] for patching several blocks from one scan.
pub fn apply_fix(document: &str, block: &DiagramBlock, fixed_code: &str) -> String {
    let replacement = fence(fixed_code);
    let mut out = String::with_capacity(document.len() - block.span_len() + replacement.len());
    out.push_str(&document[..block.start_index]);
    out.push_str(&replacement);
    out.push_str(&document[block.end_index..]);
    out
}

/// Apply several fixes whose offsets were all taken from `document`.
///
/// Patches run right to left so a length change never shifts a block that
/// is still waiting to be patched.
pub fn apply_fixes(document: &str, fixes: &[(DiagramBlock, String)]) -> String {
    let mut ordered: Vec<&(DiagramBlock, String)> = fixes.iter().collect();
    ordered.sort_by(|a, b| b.0.start_index.cmp(&a.0.start_index));

    ordered
        .into_iter()
        .fold(document.to_string(), |acc, (block, fixed)| apply_fix(&acc, block, fixed))
}
