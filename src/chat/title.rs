//! Session title derivation.
//!
//! The title comes from the first turn's first text part, derived exactly
//! once; afterwards it is only user-editable via rename.

use super::types::Turn;

const MAX_TITLE_CHARS: usize = 30;

/// Derive a display title from the opening turn, if it carries any text.
/// The whole text counts toward the length limit, newlines included.
pub fn derive_title(turn: &Turn) -> Option<String> {
    let text = turn.parts.iter().find_map(|p| p.as_text())?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(truncate_title(text))
}

fn truncate_title(source: &str) -> String {
    if source.chars().count() <= MAX_TITLE_CHARS {
        return source.to_string();
    }
    // 28 chars + "..." keeps the truncated form at 31 chars total.
    let kept: String = source.chars().take(MAX_TITLE_CHARS - 2).collect();
    kept + "..."
}
