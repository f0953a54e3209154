//! Sequential fail-fast application of an ordered edit batch.
//!
//! Edits apply strictly in input order against the current (possibly
//! already-edited) content. A `replace` whose target is absent halts the
//! whole batch at that edit: later edits frequently assume earlier ones
//! landed, so partial application of a reordered batch is more dangerous
//! than losing the remainder.

use quarry_types::{EditOp, EditOperation};

const FRAGMENT_PREVIEW_CHARS: usize = 120;

/// The first edit that could not be applied. `index` is 0-based; rendered
/// messages use the 1-based "Edit N" label.
#[derive(Debug, Clone, PartialEq)]
pub struct EditFailure {
    pub index: usize,
    pub fragment: String,
}

impl std::fmt::Display for EditFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Edit {}: text to replace not found: \"{}\"",
            self.index + 1,
            truncate(&self.fragment, FRAGMENT_PREVIEW_CHARS)
        )
    }
}

/// Result of applying a batch: either the fully edited content, or the
/// content as it stood when the first edit was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyResult {
    Applied(String),
    Rejected {
        partial_content: String,
        failure: EditFailure,
    },
}

pub fn apply_edits(base: &str, edits: &[EditOperation]) -> ApplyResult {
    let mut content = base.to_string();
    for (index, edit) in edits.iter().enumerate() {
        match edit.operation {
            EditOp::Append => {
                content.push_str(&edit.code);
            }
            EditOp::Replace => {
                if edit.code_to_replace.is_empty() || !content.contains(&edit.code_to_replace) {
                    return ApplyResult::Rejected {
                        partial_content: content,
                        failure: EditFailure {
                            index,
                            fragment: edit.code_to_replace.clone(),
                        },
                    };
                }
                content = content.replacen(&edit.code_to_replace, &edit.code, 1);
            }
        }
    }
    ApplyResult::Applied(content)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}
