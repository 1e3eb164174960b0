use crate::notify::format::Dialect;
use crate::shared::retry::Retryable;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChannelError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Chat service error (status {status})")]
    Server { status: u16 },

    #[error("Rate limited by chat service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Message rejected: {0}")]
    Rejected(String),
}

impl ChannelError {
    /// Stable class name for structured logs
    pub fn class(&self) -> &'static str {
        match self {
            ChannelError::Timeout => "timeout",
            ChannelError::Network(_) => "network",
            ChannelError::Server { .. } => "server",
            ChannelError::RateLimited { .. } => "rate_limited",
            ChannelError::InvalidCredentials(_) => "invalid_credentials",
            ChannelError::InvalidTarget(_) => "invalid_target",
            ChannelError::Rejected(_) => "rejected",
        }
    }
}

impl From<reqwest::Error> for ChannelError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            ChannelError::Timeout
        } else {
            // request URLs can carry the bot token
            ChannelError::Network(error.without_url().to_string())
        }
    }
}

impl Retryable for ChannelError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChannelError::Timeout
                | ChannelError::Network(_)
                | ChannelError::Server { .. }
                | ChannelError::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ChannelError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Link rendered as a button or card action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAction {
    pub label: String,
    pub url: String,
}

/// One part, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub text: String,
    pub actions: Vec<MessageAction>,
    pub part_number: usize,
    pub total_parts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveredMessage {
    /// Platform message id, when the platform returns one
    pub message_id: Option<String>,
}

#[async_trait]
pub trait ChatChannel: Send + Sync {
    fn name(&self) -> &str;

    fn dialect(&self) -> Dialect;

    /// Hard per-message limit in characters
    fn max_message_length(&self) -> usize;

    /// Resource rows rendered before the `+N more` line; `None` lists all
    fn display_limit(&self) -> Option<usize>;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveredMessage, ChannelError>;
}
