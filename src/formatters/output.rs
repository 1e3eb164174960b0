use crate::core::pipeline::RunOutcome;
use crate::notify::NotificationAttempt;
use crate::report::DriftReport;
use crate::terraform::model::{ChangeAction, ResourceChange};
use serde_json::{json, Value};
use std::fmt::Write;

/// Output formatter for command results printed on stdout
pub struct OutputFormatter;

impl OutputFormatter {
    /// Parsed plan changes, for the offline `parse` command
    pub fn format_changes(changes: &[ResourceChange]) -> Value {
        let counts: serde_json::Map<String, Value> = ChangeAction::ALL
            .iter()
            .map(|action| {
                let count = changes.iter().filter(|c| c.action == *action).count();
                (action.label().to_string(), json!(count))
            })
            .collect();

        json!({
            "summary": {
                "total_changes": changes.len(),
                "by_action": counts,
            },
            "changes": changes,
        })
    }

    fn format_attempt(attempt: &NotificationAttempt) -> Value {
        json!({
            "channel": attempt.channel,
            "status": attempt.status,
            "retry_count": attempt.retry_count,
            "parts": attempt.parts.len(),
            "message_ids": attempt.parts.iter().filter_map(|p| p.message_id.clone()).collect::<Vec<_>>(),
            "error": attempt.error,
            "sent_at": attempt.sent_at,
        })
    }

    fn format_report(report: &DriftReport) -> Value {
        json!({
            "environment": report.environment,
            "branch": report.branch,
            "detected_at": report.detected_at,
            "run_reference": report.run_reference,
            "total": report.total(),
            "by_action": report
                .counts()
                .iter()
                .map(|(action, count)| (action.label().to_string(), json!(count)))
                .collect::<serde_json::Map<String, Value>>(),
            "resources": report.changes.iter().map(|entry| {
                json!({
                    "address": entry.change.address,
                    "action": entry.change.action,
                    "resource_id": entry.change.resource_id,
                    "changed_by": entry.attribution.actor_name,
                    "actor_type": entry.attribution.actor_type,
                    "when": entry.attribution.display_time(),
                })
            }).collect::<Vec<_>>(),
        })
    }

    /// Machine-readable summary of a `detect` run
    pub fn format_run_summary(environment: &str, outcome: &RunOutcome) -> Value {
        let notifications: Vec<Value> = outcome
            .notifications()
            .iter()
            .map(Self::format_attempt)
            .collect();

        match outcome {
            RunOutcome::Clean { .. } => json!({
                "environment": environment,
                "drift_detected": false,
                "exit_code": outcome.exit_code(),
                "notifications": notifications,
            }),
            RunOutcome::Drift { report, issue, .. } => json!({
                "environment": environment,
                "drift_detected": true,
                "exit_code": outcome.exit_code(),
                "report": Self::format_report(report),
                "issue": issue,
                "notifications": notifications,
            }),
        }
    }

    pub fn format_attempts(attempts: &[NotificationAttempt]) -> Value {
        json!({
            "notifications": attempts.iter().map(Self::format_attempt).collect::<Vec<_>>(),
            "all_sent": attempts.iter().all(|a| a.is_sent()),
        })
    }

    /// Human-readable summary of a `detect` run
    pub fn render_text(environment: &str, outcome: &RunOutcome) -> String {
        let mut out = String::new();
        match outcome {
            RunOutcome::Clean { .. } => {
                let _ = writeln!(out, "No drift detected in {}", environment);
            }
            RunOutcome::Drift { report, issue, .. } => {
                let _ = writeln!(
                    out,
                    "Drift detected in {}: {} resource(s)",
                    environment,
                    report.total()
                );
                for entry in &report.changes {
                    let _ = writeln!(
                        out,
                        "  {} {:<8} {}  (changed by {}, {})",
                        entry.change.action.glyph(),
                        entry.change.action.label(),
                        entry.change.address,
                        entry.attribution.actor_name,
                        entry.attribution.display_time()
                    );
                }
                match issue {
                    Some(issue) => {
                        let _ = writeln!(out, "Issue: #{} {}", issue.number, issue.url);
                    }
                    None => {
                        let _ = writeln!(out, "Issue: not recorded");
                    }
                }
            }
        }
        for attempt in outcome.notifications() {
            let _ = writeln!(
                out,
                "Notification [{}]: {:?} ({} part(s), {} retries){}",
                attempt.channel,
                attempt.status,
                attempt.parts.len(),
                attempt.retry_count,
                attempt
                    .error
                    .as_deref()
                    .map(|e| format!(" - {}", e))
                    .unwrap_or_default()
            );
        }
        out
    }
}
