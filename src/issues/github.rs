use crate::shared::retry::Retryable;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

#[derive(Error, Debug, Clone)]
pub enum RecordError {
    #[error("Could not reach GitHub: {0}")]
    ConnectError(String),

    /// The request may have reached GitHub, so resending could duplicate the issue
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("GitHub rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("GitHub server error (status {status})")]
    ServerError { status: u16 },

    #[error("GitHub rejected the issue (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response format from GitHub API: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for RecordError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_connect() {
            RecordError::ConnectError(error.to_string())
        } else {
            RecordError::HttpError(error.to_string())
        }
    }
}

impl From<serde_json::Error> for RecordError {
    fn from(error: serde_json::Error) -> Self {
        RecordError::InvalidResponse(error.to_string())
    }
}

impl Retryable for RecordError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            RecordError::ConnectError(_)
                | RecordError::RateLimited { .. }
                | RecordError::ServerError { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RecordError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Issue to be filed
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// Reference to a created issue, linked from chat notifications
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IssueReference {
    pub number: u64,
    #[serde(rename = "html_url")]
    pub url: String,
}

#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn create_issue(&self, issue: &NewIssue) -> Result<IssueReference, RecordError>;
}

fn retry_after_header(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a non-success GitHub response to its error class
pub(crate) fn classify_failure(status: StatusCode, headers: &HeaderMap, message: String) -> RecordError {
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");
    let retry_after = retry_after_header(headers);

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && (exhausted || retry_after.is_some()))
    {
        return RecordError::RateLimited { retry_after };
    }
    if status.is_server_error() {
        return RecordError::ServerError {
            status: status.as_u16(),
        };
    }
    RecordError::Rejected {
        status: status.as_u16(),
        message,
    }
}

/// GitHub REST client for `POST /repos/{owner}/{repo}/issues`
pub struct GitHubIssues {
    client: Client,
    api_url: String,
    repository: String,
    token: String,
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .user_agent(concat!("tfdrift/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl GitHubIssues {
    pub fn new(api_url: &str, repository: &str, token: &str) -> Self {
        Self {
            client: build_client(Duration::from_secs(30)),
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token: token.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(timeout);
        self
    }
}

#[async_trait]
impl IssueTracker for GitHubIssues {
    async fn create_issue(&self, issue: &NewIssue) -> Result<IssueReference, RecordError> {
        let url = format!("{}/repos/{}/issues", self.api_url, self.repository);
        debug!(repository = %self.repository, labels = ?issue.labels, "Creating GitHub issue");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .json(issue)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let headers = response.headers().clone();
            let message = response.text().await.unwrap_or_default();
            let err = classify_failure(status, &headers, message);
            warn!(status = status.as_u16(), error = %err, "GitHub issue creation failed");
            return Err(err);
        }

        let body = response.text().await?;
        let reference: IssueReference = serde_json::from_str(&body)?;
        info!(number = reference.number, url = %reference.url, "GitHub issue created");
        Ok(reference)
    }
}
