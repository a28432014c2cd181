//! Unified line diffs between relic payloads.

use similar::{ChangeTag, TextDiff};

/// Result of diffing two text payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineDiff {
    /// Unified diff text, empty when both sides are equal.
    pub unified: String,
    /// Number of inserted lines.
    pub additions: usize,
    /// Number of deleted lines.
    pub deletions: usize,
}

/// Whether a content type is diffed line by line.
pub fn is_text(content_type: &str) -> bool {
    content_type.contains("text")
}

/// Diff two payloads line by line, decoding invalid UTF-8 lossily.
///
/// Counts come from the change tags, so the `---`/`+++` header lines are never counted.
pub fn line_diff(from: &[u8], to: &[u8], from_label: &str, to_label: &str) -> LineDiff {
    let from = String::from_utf8_lossy(from);
    let to = String::from_utf8_lossy(to);
    let diff = TextDiff::from_lines(from.as_ref(), to.as_ref());

    let mut additions = 0;
    let mut deletions = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => deletions += 1,
            ChangeTag::Equal => {}
        }
    }
    let unified = if additions + deletions == 0 {
        String::new()
    } else {
        diff.unified_diff()
            .header(from_label, to_label)
            .to_string()
    };
    LineDiff {
        unified,
        additions,
        deletions,
    }
}
