//! Attributes drifted resources to the principal that last touched them.
//!
//! Attribution is best-effort enrichment: lookups never fail, they degrade
//! to an unavailable placeholder.

use crate::shared::rate_limit::FixedDelayGate;
use crate::terraform::model::ResourceChange;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default audit-log lookback window
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// CloudTrail event history only reaches back this far
pub const MAX_LOOKBACK_DAYS: i64 = 90;

/// Placeholder actor for changes without a matching audit event
pub const UNAVAILABLE_ACTOR: &str = "unavailable";

/// Placeholder event time for changes without a matching audit event
pub const UNAVAILABLE_TIME: &str = "-";

static PRINCIPAL_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:(?:iam|sts)::\d+:(user|assumed-role|role|federated-user|root)(?:/(.+))?$")
        .expect("Invalid principal ARN regex")
});

#[derive(Error, Debug, Clone)]
pub enum AttributionError {
    #[error("Audit log request failed: {0}")]
    Transport(String),

    #[error("Invalid audit log request: {0}")]
    InvalidRequest(String),

    #[error("Audit event could not be parsed: {0}")]
    InvalidEvent(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActorType {
    User,
    AssumedRole,
    Root,
    Federated,
    Service,
    Unknown,
}

impl ActorType {
    /// Map a CloudTrail `userIdentity.type`
    pub fn from_identity_type(identity_type: &str) -> Self {
        match identity_type {
            "IAMUser" => ActorType::User,
            "AssumedRole" => ActorType::AssumedRole,
            "Root" => ActorType::Root,
            "FederatedUser" | "SAMLUser" | "WebIdentityUser" | "IdentityCenterUser" => {
                ActorType::Federated
            }
            "AWSService" => ActorType::Service,
            _ => ActorType::Unknown,
        }
    }
}

impl Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ActorType::User => "IAM user",
            ActorType::AssumedRole => "assumed role",
            ActorType::Root => "root",
            ActorType::Federated => "federated",
            ActorType::Service => "AWS service",
            ActorType::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// One audit-log event, independent of the audit backend
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditEvent {
    pub identity_type: String,
    pub arn: Option<String>,
    pub user_name: Option<String>,
    pub invoked_by: Option<String>,
    pub event_name: Option<String>,
    pub event_source: Option<String>,
    pub event_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloudTrailRecord {
    event_name: Option<String>,
    event_source: Option<String>,
    event_time: Option<DateTime<Utc>>,
    user_identity: Option<UserIdentity>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdentity {
    #[serde(rename = "type")]
    identity_type: Option<String>,
    arn: Option<String>,
    user_name: Option<String>,
    invoked_by: Option<String>,
    session_context: Option<SessionContext>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionContext {
    session_issuer: Option<SessionIssuer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionIssuer {
    user_name: Option<String>,
}

impl AuditEvent {
    /// Parse the JSON document CloudTrail returns in `CloudTrailEvent`
    pub fn from_cloudtrail_json(raw: &str) -> Result<Self, AttributionError> {
        let record: CloudTrailRecord = serde_json::from_str(raw)
            .map_err(|e| AttributionError::InvalidEvent(e.to_string()))?;
        let identity = record.user_identity;

        Ok(Self {
            identity_type: identity
                .as_ref()
                .and_then(|i| i.identity_type.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            arn: identity.as_ref().and_then(|i| i.arn.clone()),
            // assumed roles carry no userName, fall back to the issuing role
            user_name: identity.as_ref().and_then(|i| {
                i.user_name.clone().or_else(|| {
                    i.session_context
                        .as_ref()
                        .and_then(|c| c.session_issuer.as_ref())
                        .and_then(|issuer| issuer.user_name.clone())
                })
            }),
            invoked_by: identity.and_then(|i| i.invoked_by),
            event_name: record.event_name,
            event_source: record.event_source,
            event_time: record.event_time,
        })
    }
}

/// Actor information joined to a drifted resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeAttribution {
    pub actor_arn: String,
    pub actor_type: ActorType,
    pub actor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<DateTime<Utc>>,
    pub available: bool,
}

impl ChangeAttribution {
    pub fn unavailable() -> Self {
        Self {
            actor_arn: UNAVAILABLE_ACTOR.to_string(),
            actor_type: ActorType::Unknown,
            actor_name: UNAVAILABLE_ACTOR.to_string(),
            invoked_by: None,
            event_name: None,
            event_time: None,
            available: false,
        }
    }

    pub fn from_event(event: &AuditEvent) -> Self {
        let actor_type = ActorType::from_identity_type(&event.identity_type);
        let actor_arn = event
            .arn
            .clone()
            .or_else(|| event.invoked_by.clone())
            .unwrap_or_else(|| event.identity_type.clone());

        Self {
            actor_name: display_name(actor_type, event),
            actor_arn,
            actor_type,
            invoked_by: event.invoked_by.clone(),
            event_name: event.event_name.clone(),
            event_time: event.event_time,
            available: true,
        }
    }

    pub fn display_time(&self) -> String {
        match (self.available, self.event_time) {
            (true, Some(time)) => time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            _ => UNAVAILABLE_TIME.to_string(),
        }
    }
}

fn display_name(actor_type: ActorType, event: &AuditEvent) -> String {
    if actor_type == ActorType::Service {
        let service = event
            .invoked_by
            .as_deref()
            .or(event.event_source.as_deref())
            .unwrap_or("AWS service");
        return format!("Automated: {}", service);
    }

    let from_arn = event.arn.as_deref().and_then(|arn| {
        let caps = PRINCIPAL_ARN.captures(arn)?;
        match (caps.get(1).map(|m| m.as_str()), caps.get(2).map(|m| m.as_str())) {
            (Some("root"), _) => Some("root".to_string()),
            (Some("assumed-role"), Some(rest)) => Some(rest.to_string()),
            (Some(_), Some(rest)) => rest.rsplit('/').next().map(str::to_string),
            _ => None,
        }
    });

    match actor_type {
        ActorType::Root => "root".to_string(),
        ActorType::User | ActorType::Federated => event
            .user_name
            .clone()
            .or(from_arn)
            .unwrap_or_else(|| event.identity_type.clone()),
        _ => from_arn
            .or_else(|| event.user_name.clone())
            .or_else(|| event.arn.clone())
            .unwrap_or_else(|| event.identity_type.clone()),
    }
}

/// Audit-log backend queried by resource identifier
#[async_trait]
pub trait AuditLogSource: Send + Sync {
    async fn find_events(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, AttributionError>;
}

/// Rate-limited attribution stage
pub struct AttributionLookup {
    source: Arc<dyn AuditLogSource>,
    gate: FixedDelayGate,
    lookback: chrono::Duration,
}

impl AttributionLookup {
    pub fn new(source: Arc<dyn AuditLogSource>, gate: FixedDelayGate) -> Self {
        Self {
            source,
            gate,
            lookback: chrono::Duration::days(DEFAULT_LOOKBACK_DAYS),
        }
    }

    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    /// Most recent actor for `resource_id` within `lookback`. Never fails.
    pub async fn lookup(&self, resource_id: &str, lookback: chrono::Duration) -> ChangeAttribution {
        let end = Utc::now();
        let Some(start) = end.checked_sub_signed(lookback) else {
            warn!(
                resource_id,
                stage = "attribution",
                error_class = "invalid_window",
                lookback_secs = lookback.num_seconds(),
                "Lookback window is out of range, continuing without attribution"
            );
            return ChangeAttribution::unavailable();
        };

        self.gate.wait().await;
        match self.source.find_events(resource_id, start, end).await {
            Ok(events) => match most_recent(events) {
                Some(event) => ChangeAttribution::from_event(&event),
                None => {
                    debug!(resource_id, "No audit events in lookback window");
                    ChangeAttribution::unavailable()
                }
            },
            Err(err) => {
                warn!(
                    resource_id,
                    stage = "attribution",
                    error_class = "transport",
                    error = %err,
                    "Audit log lookup failed, continuing without attribution"
                );
                ChangeAttribution::unavailable()
            }
        }
    }

    pub async fn attribute(&self, change: &ResourceChange) -> ChangeAttribution {
        match change.resource_id.as_deref() {
            Some(resource_id) => {
                let attribution = self.lookup(resource_id, self.lookback).await;
                debug!(
                    address = %change.address,
                    actor = %attribution.actor_name,
                    available = attribution.available,
                    "Attribution resolved"
                );
                attribution
            }
            None => {
                debug!(address = %change.address, "No cloud identifier, skipping attribution");
                ChangeAttribution::unavailable()
            }
        }
    }

    /// Attribute every change, strictly one query at a time
    pub async fn attribute_all(
        &self,
        changes: Vec<ResourceChange>,
    ) -> Vec<(ResourceChange, ChangeAttribution)> {
        let mut attributed = Vec::with_capacity(changes.len());
        for change in changes {
            let attribution = self.attribute(&change).await;
            attributed.push((change, attribution));
        }
        let found = attributed.iter().filter(|(_, a)| a.available).count();
        info!(total = attributed.len(), attributed = found, "Attribution complete");
        attributed
    }
}

/// Pair every change with the unavailable placeholder
pub fn without_attribution(changes: Vec<ResourceChange>) -> Vec<(ResourceChange, ChangeAttribution)> {
    changes
        .into_iter()
        .map(|change| (change, ChangeAttribution::unavailable()))
        .collect()
}

/// Single most recent event; events without a timestamp sort oldest
fn most_recent(events: Vec<AuditEvent>) -> Option<AuditEvent> {
    events.into_iter().max_by_key(|e| e.event_time)
}
