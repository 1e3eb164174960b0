use crate::notify::channel::{ChannelError, ChatChannel, DeliveredMessage, OutboundMessage};
use crate::notify::format::Dialect;
use crate::shared::logging::mask_url;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Conservative text budget for one Adaptive Card
pub const TEAMS_MAX_MESSAGE_LENGTH: usize = 20_000;

/// Rows shown before `+N more`
pub const TEAMS_DEFAULT_DISPLAY_LIMIT: usize = 5;

fn classify(status: StatusCode, headers: &HeaderMap, body: &str) -> Result<DeliveredMessage, ChannelError> {
    if status.is_success() {
        return Ok(DeliveredMessage::default());
    }

    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        body.trim().to_string()
    };
    match status.as_u16() {
        429 => Err(ChannelError::RateLimited {
            retry_after: headers
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs),
        }),
        401 | 403 => Err(ChannelError::InvalidCredentials(detail)),
        404 | 410 => Err(ChannelError::InvalidTarget(detail)),
        code if code >= 500 => Err(ChannelError::Server { status: code }),
        _ => Err(ChannelError::Rejected(detail)),
    }
}

/// Teams incoming webhook posting Adaptive Cards
pub struct TeamsChannel {
    client: Client,
    webhook_url: String,
    display_limit: Option<usize>,
}

impl TeamsChannel {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("tfdrift/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            webhook_url: webhook_url.to_string(),
            display_limit: Some(TEAMS_DEFAULT_DISPLAY_LIMIT),
        }
    }

    pub fn with_display_limit(mut self, display_limit: Option<usize>) -> Self {
        self.display_limit = display_limit;
        self
    }

    fn card(&self, message: &OutboundMessage) -> serde_json::Value {
        let actions: Vec<serde_json::Value> = message
            .actions
            .iter()
            .map(|a| json!({"type": "Action.OpenUrl", "title": a.label, "url": a.url}))
            .collect();

        json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "contentUrl": null,
                "content": {
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "type": "AdaptiveCard",
                    "version": "1.4",
                    "msteams": {"width": "Full"},
                    "body": [{
                        "type": "TextBlock",
                        "text": message.text,
                        "wrap": true,
                    }],
                    "actions": actions,
                }
            }]
        })
    }
}

#[async_trait]
impl ChatChannel for TeamsChannel {
    fn name(&self) -> &str {
        "teams"
    }

    fn dialect(&self) -> Dialect {
        Dialect::TeamsMarkdown
    }

    fn max_message_length(&self) -> usize {
        TEAMS_MAX_MESSAGE_LENGTH
    }

    fn display_limit(&self) -> Option<usize> {
        self.display_limit
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveredMessage, ChannelError> {
        debug!(
            webhook = %mask_url(&self.webhook_url),
            part = message.part_number,
            total_parts = message.total_parts,
            "Posting Teams card"
        );

        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.card(message))
            .send()
            .await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        classify(status, &headers, &body)
    }
}
