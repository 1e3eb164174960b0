use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Maximum length of a rendered diff snippet, in characters
pub const MAX_DIFF_SNIPPET_CHARS: usize = 500;

/// Marker appended to truncated text
pub const TRUNCATION_MARKER: char = '…';

/// Normalized action of a drifted resource. No-ops never reach this type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    Replace,
}

impl ChangeAction {
    pub const ALL: [ChangeAction; 4] = [
        ChangeAction::Create,
        ChangeAction::Update,
        ChangeAction::Delete,
        ChangeAction::Replace,
    ];

    pub fn glyph(self) -> &'static str {
        match self {
            ChangeAction::Create => "➕",
            ChangeAction::Update => "📝",
            ChangeAction::Delete => "❌",
            ChangeAction::Replace => "🔄",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::Replace => "replace",
        }
    }
}

impl Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One drifted resource extracted from a structured plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceChange {
    pub address: String,
    pub resource_type: String,
    pub resource_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_address: Option<String>,
    pub action: ChangeAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<serde_json::Value>,
    /// Cloud identifier used to look the resource up in the audit log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub diff_snippet: String,
}

impl ResourceChange {
    /// Lines of the diff snippet, for renderers that list them individually
    pub fn diff_lines(&self) -> impl Iterator<Item = &str> {
        self.diff_snippet.lines().filter(|l| !l.trim().is_empty())
    }
}

/// Truncate `text` to at most `max_chars` characters, ending with `…` when
/// anything was cut. Text already within the limit is returned unchanged.
pub fn truncate_snippet(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut truncated: String = text.chars().take(max_chars - 1).collect();
    truncated.push(TRUNCATION_MARKER);
    truncated
}
