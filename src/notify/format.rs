//! Chat message rendering for Telegram MarkdownV2 and Teams markdown.
//!
//! Messages are built from blocks separated by a blank line: the header,
//! one block per resource, and an optional `+N more` block. The splitter
//! relies on that layout.

use crate::report::{AttributedChange, DriftReport};
use chrono::{DateTime, Utc};

pub const SEPARATOR: &str = "━━━━━━━━━━━━━━━━";

/// Separator between message blocks
pub const BLOCK_SEPARATOR: &str = "\n\n";

const TELEGRAM_SPECIAL: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    TelegramMarkdownV2,
    TeamsMarkdown,
}

impl Dialect {
    pub fn escape(self, text: &str) -> String {
        match self {
            Dialect::TelegramMarkdownV2 => {
                let mut escaped = String::with_capacity(text.len());
                for c in text.chars() {
                    if TELEGRAM_SPECIAL.contains(&c) {
                        escaped.push('\\');
                    }
                    escaped.push(c);
                }
                escaped
            }
            Dialect::TeamsMarkdown => text.replace('*', "\\*").replace('_', "\\_"),
        }
    }

    fn bold(self, text: &str) -> String {
        match self {
            Dialect::TelegramMarkdownV2 => format!("*{}*", text),
            Dialect::TeamsMarkdown => format!("**{}**", text),
        }
    }

    fn code(self, text: &str) -> String {
        let inner = text.replace('`', "'");
        match self {
            Dialect::TelegramMarkdownV2 => format!("`{}`", inner.replace('\\', "\\\\")),
            Dialect::TeamsMarkdown => format!("`{}`", inner),
        }
    }

    /// Header prepended to each part of a split message
    pub fn part_header(self, part: usize, total: usize) -> String {
        match self {
            Dialect::TelegramMarkdownV2 => {
                format!("🔔 *Drift Alert \\(Part {}/{}\\)*\n\n", part, total)
            }
            Dialect::TeamsMarkdown => format!("🔔 **Drift Alert (Part {}/{})**\n\n", part, total),
        }
    }
}

fn field(dialect: Dialect, name: &str, value: &str) -> String {
    format!("{} {}", dialect.bold(&format!("{}:", dialect.escape(name))), value)
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn header_block(report: &DriftReport, dialect: Dialect) -> String {
    let mut lines = vec![
        format!("🚨 {}", dialect.bold("Infrastructure Drift Detected")),
        String::new(),
        field(dialect, "Environment", &dialect.escape(&report.environment)),
    ];
    if let Some(branch) = &report.branch {
        lines.push(field(dialect, "Branch", &dialect.escape(branch)));
    }
    lines.push(field(dialect, "Time", &dialect.escape(&timestamp(&report.detected_at))));
    lines.push(field(dialect, "Resources Affected", &report.total().to_string()));

    let counts = report
        .counts()
        .iter()
        .map(|(action, count)| format!("{} {}: {}", action.glyph(), action, count))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(field(dialect, "Changes", &dialect.escape(&counts)));
    lines.push(String::new());
    lines.push(SEPARATOR.to_string());
    lines.join("\n")
}

fn resource_block(entry: &AttributedChange, dialect: Dialect) -> String {
    let change = &entry.change;
    let attribution = &entry.attribution;
    let bullet = |text: &str| format!("  • {}", dialect.escape(text));

    let mut lines = vec![format!(
        "{} {}",
        change.action.glyph(),
        dialect.bold(&dialect.escape(&change.address))
    )];
    lines.push(bullet(&format!("Changed by: {}", attribution.actor_name)));
    lines.push(bullet(&format!("When: {}", attribution.display_time())));
    for line in change.diff_lines() {
        lines.push(format!("  • {}", dialect.code(line.trim())));
    }
    lines.join("\n")
}

/// Render a drift report, listing at most `display_limit` resources
pub fn format_drift_message(
    report: &DriftReport,
    dialect: Dialect,
    display_limit: Option<usize>,
) -> String {
    let shown = display_limit.unwrap_or(report.total()).min(report.total());
    let mut blocks = vec![header_block(report, dialect)];
    blocks.extend(
        report
            .changes
            .iter()
            .take(shown)
            .map(|entry| resource_block(entry, dialect)),
    );

    let hidden = report.total() - shown;
    if hidden > 0 {
        let noun = if hidden == 1 { "resource" } else { "resources" };
        blocks.push(dialect.escape(&format!(
            "+{} more {} not shown, see the issue for the full list",
            hidden, noun
        )));
    }
    blocks.join(BLOCK_SEPARATOR)
}

/// Short confirmation sent for a clean run when explicitly requested
pub fn format_no_drift_message(
    environment: &str,
    branch: Option<&str>,
    at: &DateTime<Utc>,
    dialect: Dialect,
) -> String {
    let mut lines = vec![
        format!("✅ {}", dialect.bold("No Infrastructure Drift Detected")),
        String::new(),
        field(dialect, "Environment", &dialect.escape(environment)),
    ];
    if let Some(branch) = branch {
        lines.push(field(dialect, "Branch", &dialect.escape(branch)));
    }
    lines.push(field(dialect, "Time", &dialect.escape(&timestamp(at))));
    lines.push(String::new());
    lines.push(dialect.escape("All infrastructure resources match their expected state."));
    lines.join("\n")
}
