use crate::issues::github::{IssueReference, IssueTracker, NewIssue, RecordError};
use crate::issues::render::{issue_labels, issue_title, render_body, MAX_ISSUE_BODY_CHARS};
use crate::report::DriftReport;
use crate::shared::clock::Clock;
use crate::shared::retry::{run_with_retry, RetryPolicy};
use std::sync::Arc;
use tracing::info;

/// Files one issue per drifted run
pub struct IssueRecorder {
    tracker: Arc<dyn IssueTracker>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    extra_labels: Vec<String>,
}

impl IssueRecorder {
    pub fn new(tracker: Arc<dyn IssueTracker>, clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker,
            clock,
            policy: RetryPolicy::default(),
            extra_labels: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_extra_labels(mut self, labels: Vec<String>) -> Self {
        self.extra_labels = labels;
        self
    }

    pub fn build_issue(&self, report: &DriftReport) -> NewIssue {
        NewIssue {
            title: issue_title(report),
            body: render_body(report, MAX_ISSUE_BODY_CHARS),
            labels: issue_labels(report, &self.extra_labels),
        }
    }

    pub async fn record(&self, report: &DriftReport) -> Result<IssueReference, RecordError> {
        let issue = self.build_issue(report);
        info!(
            environment = %report.environment,
            resources = report.total(),
            body_chars = issue.body.chars().count(),
            "Recording drift issue"
        );

        run_with_retry(&self.policy, self.clock.as_ref(), "create_issue", || {
            self.tracker.create_issue(&issue)
        })
        .await
    }
}
