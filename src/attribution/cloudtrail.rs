use crate::attribution::lookup::{AttributionError, AuditEvent, AuditLogSource};
use async_trait::async_trait;
use aws_sdk_cloudtrail::error::DisplayErrorContext;
use aws_sdk_cloudtrail::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudtrail::types::{Event, LookupAttribute, LookupAttributeKey};
use aws_sdk_cloudtrail::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Events fetched per lookup; only the most recent one is used
const MAX_EVENTS_PER_LOOKUP: i32 = 10;

/// CloudTrail `LookupEvents` keyed by resource name
pub struct CloudTrailSource {
    client: Client,
}

impl CloudTrailSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient AWS credential chain
    pub async fn from_env(region: Option<&str>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }
        let config = loader.load().await;
        Self::new(Client::new(&config))
    }
}

fn to_chrono(time: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(time.secs(), time.subsec_nanos())
}

fn event_from_summary(event: &Event) -> AuditEvent {
    AuditEvent {
        identity_type: "Unknown".to_string(),
        user_name: event.username().map(str::to_string),
        event_name: event.event_name().map(str::to_string),
        event_source: event.event_source().map(str::to_string),
        event_time: event.event_time().and_then(to_chrono),
        ..Default::default()
    }
}

#[async_trait]
impl AuditLogSource for CloudTrailSource {
    async fn find_events(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<AuditEvent>, AttributionError> {
        let attribute = LookupAttribute::builder()
            .attribute_key(LookupAttributeKey::ResourceName)
            .attribute_value(resource_id)
            .build()
            .map_err(|e| AttributionError::InvalidRequest(e.to_string()))?;

        let output = self
            .client
            .lookup_events()
            .lookup_attributes(attribute)
            .start_time(AwsDateTime::from_secs(start.timestamp()))
            .end_time(AwsDateTime::from_secs(end.timestamp()))
            .max_results(MAX_EVENTS_PER_LOOKUP)
            .send()
            .await
            .map_err(|e| AttributionError::Transport(DisplayErrorContext(&e).to_string()))?;

        let mut events = Vec::with_capacity(output.events().len());
        for summary in output.events() {
            let Some(raw) = summary.cloud_trail_event() else {
                events.push(event_from_summary(summary));
                continue;
            };
            match AuditEvent::from_cloudtrail_json(raw) {
                Ok(mut event) => {
                    if event.event_time.is_none() {
                        event.event_time = summary.event_time().and_then(to_chrono);
                    }
                    events.push(event);
                }
                Err(err) => {
                    warn!(resource_id, error = %err, "Skipping unparseable CloudTrail event");
                    events.push(event_from_summary(summary));
                }
            }
        }

        debug!(resource_id, count = events.len(), "CloudTrail lookup returned events");
        Ok(events)
    }
}
