//! Delivery of a report to every configured chat channel.
//!
//! Each channel gets one `NotificationAttempt`: the message is formatted in
//! the channel's dialect, split, and sent part by part. Failures stay local
//! to the attempt.

use crate::issues::IssueReference;
use crate::notify::channel::{ChannelError, ChatChannel, MessageAction, OutboundMessage};
use crate::notify::format::{format_drift_message, format_no_drift_message};
use crate::notify::split::split_message;
use crate::report::DriftReport;
use crate::shared::clock::Clock;
use crate::shared::rate_limit::FixedDelayGate;
use crate::shared::retry::{RetryPolicy, Retryable};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Minimum spacing between consecutive parts
pub const DEFAULT_PART_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Retrying,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Failed)
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Sent)
                | (Pending, Retrying)
                | (Pending, Failed)
                | (Retrying, Retrying)
                | (Retrying, Sent)
                | (Retrying, Failed)
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid delivery transition {from:?} -> {to:?}")]
pub struct TransitionError {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePart {
    pub part_number: usize,
    pub total_parts: usize,
    /// Text as sent, including the part header for multi-part messages
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationAttempt {
    pub channel: String,
    pub status: DeliveryStatus,
    pub retry_count: u32,
    pub parts: Vec<MessagePart>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationAttempt {
    pub fn new(channel: &str, parts: Vec<MessagePart>) -> Self {
        Self {
            channel: channel.to_string(),
            status: DeliveryStatus::Pending,
            retry_count: 0,
            parts,
            error: None,
            sent_at: None,
        }
    }

    pub fn transition(&mut self, next: DeliveryStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn record_retry(&mut self, err: &ChannelError) -> Result<(), TransitionError> {
        self.transition(DeliveryStatus::Retrying)?;
        self.retry_count += 1;
        self.error = Some(err.to_string());
        Ok(())
    }

    pub fn mark_sent(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(DeliveryStatus::Sent)?;
        self.sent_at = Some(at);
        self.error = None;
        Ok(())
    }

    pub fn mark_failed(&mut self, err: &ChannelError) -> Result<(), TransitionError> {
        self.transition(DeliveryStatus::Failed)?;
        self.error = Some(err.to_string());
        Ok(())
    }

    pub fn is_sent(&self) -> bool {
        self.status == DeliveryStatus::Sent
    }
}

fn log_transition(channel: &str, result: Result<(), TransitionError>) {
    if let Err(err) = result {
        error!(channel, error = %err, "Notification state machine rejected a transition");
    }
}

pub struct Notifier {
    channels: Vec<Arc<dyn ChatChannel>>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    part_interval: Duration,
}

impl Notifier {
    pub fn new(channels: Vec<Arc<dyn ChatChannel>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            channels,
            clock,
            policy: RetryPolicy::default(),
            part_interval: DEFAULT_PART_INTERVAL,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_part_interval(mut self, interval: Duration) -> Self {
        self.part_interval = interval;
        self
    }

    pub fn has_channels(&self) -> bool {
        !self.channels.is_empty()
    }

    pub async fn notify(
        &self,
        report: &DriftReport,
        issue: Option<&IssueReference>,
    ) -> Vec<NotificationAttempt> {
        let mut actions = Vec::new();
        if let Some(issue) = issue {
            actions.push(MessageAction {
                label: "View Issue".to_string(),
                url: issue.url.clone(),
            });
        }
        if let Some(run) = &report.run_reference {
            actions.push(MessageAction {
                label: "View Run".to_string(),
                url: run.clone(),
            });
        }

        let mut attempts = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let message = format_drift_message(report, channel.dialect(), channel.display_limit());
            attempts.push(self.deliver(channel.as_ref(), &message, &actions).await);
        }
        attempts
    }

    /// Send the short clean-run confirmation
    pub async fn notify_clean(
        &self,
        environment: &str,
        branch: Option<&str>,
        run_reference: Option<&str>,
        at: DateTime<Utc>,
    ) -> Vec<NotificationAttempt> {
        let actions: Vec<MessageAction> = run_reference
            .map(|url| MessageAction {
                label: "View Run".to_string(),
                url: url.to_string(),
            })
            .into_iter()
            .collect();

        let mut attempts = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let message = format_no_drift_message(environment, branch, &at, channel.dialect());
            attempts.push(self.deliver(channel.as_ref(), &message, &actions).await);
        }
        attempts
    }

    async fn deliver(
        &self,
        channel: &dyn ChatChannel,
        message: &str,
        actions: &[MessageAction],
    ) -> NotificationAttempt {
        let name = channel.name().to_string();
        let bodies = split_message(message, channel.max_message_length());
        let total = bodies.len();
        let parts = bodies
            .into_iter()
            .enumerate()
            .map(|(i, body)| MessagePart {
                part_number: i + 1,
                total_parts: total,
                text: if total > 1 {
                    format!("{}{}", channel.dialect().part_header(i + 1, total), body)
                } else {
                    body
                },
                message_id: None,
            })
            .collect();
        let mut attempt = NotificationAttempt::new(&name, parts);
        info!(
            channel = %name,
            chars = message.chars().count(),
            parts = total,
            "Delivering notification"
        );

        let gate = FixedDelayGate::new(self.part_interval, self.clock.clone());
        for index in 0..total {
            gate.wait().await;
            let outbound = OutboundMessage {
                text: attempt.parts[index].text.clone(),
                actions: if index + 1 == total {
                    actions.to_vec()
                } else {
                    Vec::new()
                },
                part_number: index + 1,
                total_parts: total,
            };

            loop {
                match channel.send(&outbound).await {
                    Ok(delivered) => {
                        debug!(channel = %name, part = index + 1, message_id = ?delivered.message_id, "Part delivered");
                        attempt.parts[index].message_id = delivered.message_id;
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt.retry_count < self.policy.max_retries => {
                        let delay = self
                            .policy
                            .delay_with_hint(attempt.retry_count, err.retry_after());
                        warn!(
                            channel = %name,
                            stage = "notify",
                            error_class = err.class(),
                            part = index + 1,
                            retry = attempt.retry_count + 1,
                            delay_secs = delay.as_secs_f64(),
                            error = %err,
                            "Retryable delivery failure, backing off"
                        );
                        log_transition(&name, attempt.record_retry(&err));
                        self.clock.sleep(delay).await;
                    }
                    Err(err) => {
                        error!(
                            channel = %name,
                            stage = "notify",
                            error_class = err.class(),
                            part = index + 1,
                            retries = attempt.retry_count,
                            error = %err,
                            "Notification failed"
                        );
                        log_transition(&name, attempt.mark_failed(&err));
                        return attempt;
                    }
                }
            }
        }

        log_transition(&name, attempt.mark_sent(Utc::now()));
        info!(channel = %name, parts = total, retries = attempt.retry_count, "Notification sent");
        attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::ChangeAttribution;
    use crate::notify::channel::DeliveredMessage;
    use crate::notify::format::Dialect;
    use crate::shared::clock::ManualClock;
    use crate::terraform::model::{ChangeAction, ResourceChange};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct FakeChannel {
        limit: usize,
        script: Mutex<VecDeque<Result<DeliveredMessage, ChannelError>>>,
        sent: Mutex<Vec<OutboundMessage>>,
    }

    impl FakeChannel {
        fn new(limit: usize, script: Vec<Result<DeliveredMessage, ChannelError>>) -> Arc<Self> {
            Arc::new(Self {
                limit,
                script: Mutex::new(script.into()),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatChannel for FakeChannel {
        fn name(&self) -> &str {
            "fake"
        }

        fn dialect(&self) -> Dialect {
            Dialect::TelegramMarkdownV2
        }

        fn max_message_length(&self) -> usize {
            self.limit
        }

        fn display_limit(&self) -> Option<usize> {
            None
        }

        async fn send(&self, message: &OutboundMessage) -> Result<DeliveredMessage, ChannelError> {
            self.sent.lock().unwrap().push(message.clone());
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| {
                Ok(DeliveredMessage {
                    message_id: Some(self.sent.lock().unwrap().len().to_string()),
                })
            })
        }
    }

    fn report(count: usize) -> DriftReport {
        let changes = (0..count)
            .map(|i| {
                (
                    ResourceChange {
                        address: format!("aws_iam_policy.policy_{}", i),
                        resource_type: "aws_iam_policy".to_string(),
                        resource_name: format!("policy_{}", i),
                        module_address: None,
                        action: ChangeAction::Update,
                        before: None,
                        after: None,
                        resource_id: None,
                        diff_snippet: "policy: {...} → {...}\ndescription: old → new".to_string(),
                    },
                    ChangeAttribution::unavailable(),
                )
            })
            .collect();
        DriftReport::compose(
            "prod",
            None,
            Some("https://github.com/acme/infra/actions/runs/1".to_string()),
            Utc::now(),
            changes,
        )
        .unwrap()
    }

    fn notifier(channel: Arc<FakeChannel>, clock: &ManualClock) -> Notifier {
        Notifier::new(vec![channel], Arc::new(clock.clone()))
    }

    fn issue() -> IssueReference {
        IssueReference {
            number: 5,
            url: "https://github.com/acme/infra/issues/5".to_string(),
        }
    }

    #[test]
    fn test_transition_table() {
        use DeliveryStatus::*;
        assert!(Pending.can_transition_to(Sent));
        assert!(Retrying.can_transition_to(Failed));
        assert!(!Sent.can_transition_to(Retrying));
        assert!(!Failed.can_transition_to(Sent));
        assert!(!Retrying.can_transition_to(Pending));
        assert!(Sent.is_terminal() && Failed.is_terminal());

        let mut attempt = NotificationAttempt::new("fake", vec![]);
        attempt.mark_sent(Utc::now()).unwrap();
        let err = attempt.transition(Failed).unwrap_err();
        assert_eq!(err, TransitionError { from: Sent, to: Failed });
    }

    #[tokio::test]
    async fn test_single_part_delivery() {
        let channel = FakeChannel::new(4096, vec![]);
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(1), Some(&issue())).await;

        assert_eq!(attempts.len(), 1);
        let attempt = &attempts[0];
        assert!(attempt.is_sent());
        assert_eq!(attempt.retry_count, 0);
        assert_eq!(attempt.parts.len(), 1);
        assert_eq!(attempt.parts[0].message_id.as_deref(), Some("1"));

        let sent = channel.sent.lock().unwrap();
        let labels: Vec<&str> = sent[0].actions.iter().map(|a| a.label.as_str()).collect();
        assert_eq!(labels, vec!["View Issue", "View Run"]);
        assert!(!sent[0].text.contains("Part 1/"));
    }

    #[tokio::test]
    async fn test_large_report_is_split_in_order() {
        let channel = FakeChannel::new(4096, vec![]);
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(50), None).await;

        let attempt = &attempts[0];
        assert!(attempt.is_sent());
        let total = attempt.parts.len();
        assert!(total >= 2);

        let sent = channel.sent.lock().unwrap();
        assert_eq!(sent.len(), total);
        for (i, message) in sent.iter().enumerate() {
            assert!(message.text.chars().count() <= 4096);
            assert!(message.text.contains(&format!("Part {}/{}", i + 1, total)));
            assert_eq!(message.part_number, i + 1);
            assert_eq!(message.actions.is_empty(), i + 1 < total);
        }
        // the gate spaces every part after the first
        assert_eq!(clock.sleeps(), vec![DEFAULT_PART_INTERVAL; total - 1]);
    }

    #[tokio::test]
    async fn test_retries_follow_backoff_schedule() {
        let channel = FakeChannel::new(
            4096,
            vec![
                Err(ChannelError::Timeout),
                Err(ChannelError::Server { status: 502 }),
                Err(ChannelError::Network("connection reset".to_string())),
            ],
        );
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(1), None).await;

        let attempt = &attempts[0];
        assert!(attempt.is_sent());
        assert_eq!(attempt.retry_count, 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(2), Duration::from_secs(4), Duration::from_secs(8)]
        );
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion_fails() {
        let channel = FakeChannel::new(4096, vec![Err(ChannelError::Timeout); 4]);
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(1), None).await;

        let attempt = &attempts[0];
        assert_eq!(attempt.status, DeliveryStatus::Failed);
        assert_eq!(attempt.retry_count, 3);
        assert_eq!(channel.sent.lock().unwrap().len(), 4);
        assert!(attempt.error.as_deref().unwrap_or_default().contains("timed out"));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_without_delay() {
        let channel = FakeChannel::new(
            4096,
            vec![Err(ChannelError::InvalidCredentials("Unauthorized".to_string()))],
        );
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(1), None).await;

        assert_eq!(attempts[0].status, DeliveryStatus::Failed);
        assert_eq!(attempts[0].retry_count, 0);
        assert_eq!(clock.total_slept(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_after_longer_than_backoff_is_honoured() {
        let channel = FakeChannel::new(
            4096,
            vec![Err(ChannelError::RateLimited {
                retry_after: Some(Duration::from_secs(30)),
            })],
        );
        let clock = ManualClock::new();
        let attempts = notifier(channel, &clock).notify(&report(1), None).await;

        assert!(attempts[0].is_sent());
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(30)]);
    }

    #[tokio::test]
    async fn test_budget_is_shared_across_parts() {
        let mut script = Vec::new();
        // part 1: two retries, then success
        script.push(Err(ChannelError::Timeout));
        script.push(Err(ChannelError::Timeout));
        script.push(Ok(DeliveredMessage::default()));
        // part 2: one retry left, then out of budget
        script.push(Err(ChannelError::Timeout));
        script.push(Err(ChannelError::Timeout));
        let channel = FakeChannel::new(4096, script);
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock).notify(&report(50), None).await;

        let attempt = &attempts[0];
        assert_eq!(attempt.status, DeliveryStatus::Failed);
        assert_eq!(attempt.retry_count, 3);
        assert_eq!(channel.sent.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_clean_run_message() {
        let channel = FakeChannel::new(4096, vec![]);
        let clock = ManualClock::new();
        let attempts = notifier(channel.clone(), &clock)
            .notify_clean("dev", Some("main"), None, Utc::now())
            .await;

        assert!(attempts[0].is_sent());
        let sent = channel.sent.lock().unwrap();
        assert!(sent[0].text.contains("No Infrastructure Drift Detected"));
        assert!(sent[0].actions.is_empty());
    }
}
