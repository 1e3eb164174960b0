//! GitHub-flavoured markdown rendering of a drift report.

use crate::report::{AttributedChange, DriftReport};

/// GitHub rejects issue bodies above this many characters
pub const MAX_ISSUE_BODY_CHARS: usize = 65_536;

const BASE_LABELS: [&str; 3] = ["drift", "infrastructure", "automated"];

pub fn issue_title(report: &DriftReport) -> String {
    format!(
        "Infrastructure drift detected in {} ({} resource{}) - {}",
        report.environment,
        report.total(),
        if report.total() == 1 { "" } else { "s" },
        report.detected_at.format("%Y-%m-%d")
    )
}

/// `drift`, `infrastructure`, `automated`, the environment, then extras
pub fn issue_labels(report: &DriftReport, extra: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = BASE_LABELS.iter().map(|l| l.to_string()).collect();
    labels.push(report.environment.clone());
    for label in extra {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn fence(text: &str) -> String {
    // keep user data from closing the code block early
    text.replace("```", "`\u{200b}``")
}

const DETAILS_HEADING: &str = "\n### Details\n\n";

/// Metadata, summary and the resource table header
fn render_head(report: &DriftReport) -> String {
    let mut out = String::from("## 🚨 Infrastructure Drift Report\n\n");
    out.push_str("| | |\n|---|---|\n");
    out.push_str(&format!("| **Environment** | `{}` |\n", cell(&report.environment)));
    if let Some(branch) = &report.branch {
        out.push_str(&format!("| **Branch** | `{}` |\n", cell(branch)));
    }
    out.push_str(&format!(
        "| **Detected at** | {} |\n",
        report.detected_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(run) = &report.run_reference {
        out.push_str(&format!("| **Workflow run** | [View run]({}) |\n", run));
    }

    out.push_str("\n### Summary\n\n| Action | Count |\n|---|---|\n");
    for (action, count) in report.counts() {
        out.push_str(&format!("| {} {} | {} |\n", action.glyph(), action, count));
    }
    out.push_str(&format!("| **Total** | **{}** |\n", report.total()));

    out.push_str("\n### Affected resources\n\n");
    out.push_str("| Action | Address | Type | Changed by | When |\n|---|---|---|---|---|\n");
    out
}

fn render_row(entry: &AttributedChange) -> String {
    format!(
        "| {} {} | `{}` | `{}` | {} | {} |\n",
        entry.change.action.glyph(),
        entry.change.action,
        cell(&entry.change.address),
        cell(&entry.change.resource_type),
        cell(&entry.attribution.actor_name),
        entry.attribution.display_time()
    )
}

fn render_detail(entry: &AttributedChange) -> String {
    format!(
        "<details>\n<summary>{} <code>{}</code></summary>\n\n```text\n{}\n```\n\n</details>\n\n",
        entry.change.action.glyph(),
        entry.change.address,
        fence(&entry.change.diff_snippet)
    )
}

fn log_target(run_reference: Option<&str>, label: &str) -> String {
    match run_reference {
        Some(run) => format!("the [{}]({})", label, run),
        None => "the workflow run log".to_string(),
    }
}

fn truncation_note(shown: usize, total: usize, run_reference: Option<&str>) -> String {
    format!(
        "> Diff details truncated: {} of {} resources shown. See {} for the complete plan.\n",
        shown,
        total,
        log_target(run_reference, "full run log")
    )
}

fn more_rows(hidden: usize, run_reference: Option<&str>) -> String {
    format!(
        "| … | +{} more resources, see {} | | | |\n",
        hidden,
        log_target(run_reference, "run log")
    )
}

fn chars(parts: &[String]) -> usize {
    parts.iter().map(|p| p.chars().count()).sum()
}

/// Render the issue body within `max_chars`. Diff blocks are dropped from
/// the end first; table rows are only cut when the table alone overflows.
pub fn render_body(report: &DriftReport, max_chars: usize) -> String {
    let run = report.run_reference.as_deref();
    let mut body = render_head(report);
    let rows: Vec<String> = report.changes.iter().map(render_row).collect();
    let details: Vec<String> = report.changes.iter().map(render_detail).collect();
    let total = rows.len();

    let fixed = body.chars().count() + DETAILS_HEADING.chars().count();
    let rows_len = chars(&rows);
    if fixed + rows_len + chars(&details) <= max_chars {
        rows.iter().for_each(|row| body.push_str(row));
        body.push_str(DETAILS_HEADING);
        details.iter().for_each(|detail| body.push_str(detail));
        return body;
    }

    let note_reserve = truncation_note(total, total, run).chars().count();
    if fixed + rows_len + note_reserve > max_chars {
        let mut used = fixed + note_reserve + more_rows(total, run).chars().count();
        let mut kept = 0;
        for row in &rows {
            let len = row.chars().count();
            if used + len > max_chars {
                break;
            }
            body.push_str(row);
            used += len;
            kept += 1;
        }
        body.push_str(&more_rows(total - kept, run));
        body.push_str(DETAILS_HEADING);
        body.push_str(&truncation_note(0, total, run));
        return body;
    }

    rows.iter().for_each(|row| body.push_str(row));
    body.push_str(DETAILS_HEADING);
    let mut used = fixed + rows_len + note_reserve;
    let mut shown = 0;
    for detail in &details {
        let len = detail.chars().count();
        if used + len > max_chars {
            break;
        }
        body.push_str(detail);
        used += len;
        shown += 1;
    }
    body.push_str(&truncation_note(shown, total, run));
    body
}
