use crate::notify::channel::{ChannelError, ChatChannel, DeliveredMessage, OutboundMessage};
use crate::notify::format::Dialect;
use crate::shared::logging::mask_secret;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const TELEGRAM_MAX_MESSAGE_LENGTH: usize = 4096;
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Deserialize)]
struct TelegramResponse {
    #[serde(default)]
    ok: bool,
    result: Option<SentMessage>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Map a Bot API response to a delivery result
fn classify(status: StatusCode, body: &str) -> Result<DeliveredMessage, ChannelError> {
    let parsed: Option<TelegramResponse> = serde_json::from_str(body).ok();
    let description = parsed
        .as_ref()
        .and_then(|r| r.description.clone())
        .unwrap_or_else(|| status.to_string());

    if status.is_success() {
        return match parsed {
            Some(TelegramResponse {
                ok: true,
                result: Some(message),
                ..
            }) => Ok(DeliveredMessage {
                message_id: Some(message.message_id.to_string()),
            }),
            Some(TelegramResponse { ok: true, .. }) => Ok(DeliveredMessage::default()),
            _ => Err(ChannelError::Rejected(description)),
        };
    }

    match status.as_u16() {
        429 => Err(ChannelError::RateLimited {
            retry_after: parsed
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        }),
        401 | 404 => Err(ChannelError::InvalidCredentials(description)),
        403 => Err(ChannelError::InvalidTarget(description)),
        400 if description.to_lowercase().contains("chat not found") => {
            Err(ChannelError::InvalidTarget(description))
        }
        code if code >= 500 => Err(ChannelError::Server { status: code }),
        _ => Err(ChannelError::Rejected(description)),
    }
}

/// Telegram Bot API `sendMessage` with MarkdownV2 formatting
pub struct TelegramChannel {
    client: Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
    display_limit: Option<usize>,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: Client::builder()
                .user_agent(concat!("tfdrift/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
            display_limit: None,
        }
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_display_limit(mut self, display_limit: Option<usize>) -> Self {
        self.display_limit = display_limit;
        self
    }

    fn payload(&self, message: &OutboundMessage) -> serde_json::Value {
        let mut payload = json!({
            "chat_id": self.chat_id,
            "text": message.text,
            "parse_mode": "MarkdownV2",
            "disable_web_page_preview": true,
        });
        if !message.actions.is_empty() {
            let buttons: Vec<serde_json::Value> = message
                .actions
                .iter()
                .map(|a| json!({"text": a.label, "url": a.url}))
                .collect();
            payload["reply_markup"] = json!({ "inline_keyboard": [buttons] });
        }
        payload
    }
}

#[async_trait]
impl ChatChannel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn dialect(&self) -> Dialect {
        Dialect::TelegramMarkdownV2
    }

    fn max_message_length(&self) -> usize {
        TELEGRAM_MAX_MESSAGE_LENGTH
    }

    fn display_limit(&self) -> Option<usize> {
        self.display_limit
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveredMessage, ChannelError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);
        debug!(
            bot = %mask_secret(&self.bot_token),
            part = message.part_number,
            total_parts = message.total_parts,
            chars = message.text.chars().count(),
            "Sending Telegram message"
        );

        let response = self.client.post(&url).json(&self.payload(message)).send().await?;
        let status = response.status();
        let body = response.text().await?;
        classify(status, &body)
    }
}
