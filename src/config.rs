//! Runtime configuration: an optional JSON file overridden by environment
//! variables. Secrets normally arrive through the environment only.

use crate::attribution::lookup::MAX_LOOKBACK_DAYS;
use crate::shared::logging::{mask_secret, mask_url};
use crate::shared::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const MIN_TELEGRAM_TOKEN_LEN: usize = 20;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    ParseError(String),

    #[error("Invalid Telegram bot token: expected at least 20 characters in '<id>:<secret>' form")]
    InvalidTelegramToken,

    #[error("Invalid Telegram channel id '{0}': must start with '@' or '-', or be numeric")]
    InvalidChannelId(String),

    #[error("Invalid GitHub repository '{0}': expected 'owner/repo'")]
    InvalidRepository(String),

    #[error("Invalid Teams webhook URL: must be an https URL")]
    InvalidWebhook,

    #[error("Invalid retry settings: {0}")]
    InvalidRetry(String),

    #[error("Invalid attribution lookback {0} days: must be between 1 and 90")]
    InvalidLookback(i64),

    #[error("Incomplete configuration: {0}")]
    Incomplete(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

/// Deployment environment a run checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl Environment {
    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Prod => "prod",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TerraformConfig {
    pub executable_path: Option<String>,
    pub project_directory: Option<String>,
    pub lock_wait_secs: u64,
    pub run_init: bool,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            project_directory: None,
            lock_wait_secs: 300,
            run_init: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AttributionConfig {
    pub enabled: bool,
    pub region: Option<String>,
    pub lookback_days: i64,
    pub query_interval_ms: u64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            region: None,
            lookback_days: 7,
            query_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    pub repository: Option<String>,
    pub api_url: String,
    pub server_url: String,
    pub run_id: Option<String>,
    pub ref_name: Option<String>,
    pub extra_labels: Vec<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            repository: None,
            api_url: "https://api.github.com".to_string(),
            server_url: "https://github.com".to_string(),
            run_id: None,
            ref_name: None,
            extra_labels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub channel_id: Option<String>,
    pub api_url: String,
    /// `None` lists every resource
    pub display_limit: Option<usize>,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel_id: None,
            api_url: "https://api.telegram.org".to_string(),
            display_limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamsConfig {
    pub webhook_url: Option<String>,
    pub display_limit: Option<usize>,
}

impl Default for TeamsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            display_limit: Some(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    pub max_retries: u32,
    pub initial_retry_delay_secs: u64,
    pub retry_multiplier: u32,
    pub max_retry_delay_secs: u64,
    pub part_interval_ms: u64,
    pub notify_on_clean: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_retry_delay_secs: 2,
            retry_multiplier: 2,
            max_retry_delay_secs: 8,
            part_interval_ms: 100,
            notify_on_clean: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub terraform: TerraformConfig,
    pub attribution: AttributionConfig,
    pub github: GitHubConfig,
    pub telegram: TelegramConfig,
    pub teams: TeamsConfig,
    pub notify: NotifyConfig,
}

/// `~/.tfdrift/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tfdrift").join("config.json"))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_display_limit(value: &str) -> Option<Option<usize>> {
    match value.trim().to_lowercase().as_str() {
        "all" | "none" | "unlimited" => Some(None),
        other => other.parse::<usize>().ok().map(Some),
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Explicit file, else `~/.tfdrift/config.json` when present, else
    /// defaults; then environment overrides and validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(default) if default.exists() => Self::from_file(&default)?,
                _ => Self::default(),
            },
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; empty values are ignored
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).and_then(non_empty);

        if let Some(v) = get("TERRAFORM_DIR") {
            self.terraform.project_directory = Some(v);
        }
        if let Some(v) = get("TFDRIFT_TERRAFORM_PATH") {
            self.terraform.executable_path = Some(v);
        }
        if let Some(v) = get("TFDRIFT_LOCK_WAIT_SECS").and_then(|v| v.parse().ok()) {
            self.terraform.lock_wait_secs = v;
        }

        if let Some(v) = get("TFDRIFT_ATTRIBUTION_ENABLED") {
            self.attribution.enabled = parse_bool(&v);
        }
        if let Some(v) = get("AWS_REGION") {
            self.attribution.region = Some(v);
        }
        if let Some(v) = get("TFDRIFT_LOOKBACK_DAYS").and_then(|v| v.parse().ok()) {
            self.attribution.lookback_days = v;
        }

        if let Some(v) = get("GITHUB_TOKEN") {
            self.github.token = Some(v);
        }
        if let Some(v) = get("GITHUB_REPOSITORY") {
            self.github.repository = Some(v);
        }
        if let Some(v) = get("GITHUB_API_URL") {
            self.github.api_url = v;
        }
        if let Some(v) = get("GITHUB_SERVER_URL") {
            self.github.server_url = v;
        }
        if let Some(v) = get("GITHUB_RUN_ID") {
            self.github.run_id = Some(v);
        }
        if let Some(v) = get("GITHUB_REF_NAME") {
            self.github.ref_name = Some(v);
        }
        if let Some(v) = get("TFDRIFT_EXTRA_LABELS") {
            self.github.extra_labels = v
                .split(',')
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = Some(v);
        }
        if let Some(v) = get("TELEGRAM_CHANNEL_ID") {
            self.telegram.channel_id = Some(v);
        }
        if let Some(v) = get("TFDRIFT_TELEGRAM_DISPLAY_LIMIT").and_then(|v| parse_display_limit(&v)) {
            self.telegram.display_limit = v;
        }

        if let Some(v) = get("TEAMS_WEBHOOK_URL") {
            self.teams.webhook_url = Some(v);
        }
        if let Some(v) = get("TFDRIFT_TEAMS_DISPLAY_LIMIT").and_then(|v| parse_display_limit(&v)) {
            self.teams.display_limit = v;
        }

        if let Some(v) = get("TFDRIFT_MAX_RETRIES").and_then(|v| v.parse().ok()) {
            self.notify.max_retries = v;
        }
        if let Some(v) = get("TFDRIFT_NOTIFY_ON_CLEAN") {
            self.notify.notify_on_clean = parse_bool(&v);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.telegram.bot_token, &self.telegram.channel_id) {
            (Some(token), Some(channel)) => {
                validate_telegram_token(token)?;
                validate_channel_id(channel)?;
            }
            (Some(_), None) => {
                return Err(ConfigError::Incomplete(
                    "TELEGRAM_BOT_TOKEN is set but TELEGRAM_CHANNEL_ID is missing".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete(
                    "TELEGRAM_CHANNEL_ID is set but TELEGRAM_BOT_TOKEN is missing".to_string(),
                ))
            }
            (None, None) => {}
        }

        if let Some(repository) = &self.github.repository {
            let mut segments = repository.split('/');
            let valid = matches!(
                (segments.next(), segments.next(), segments.next()),
                (Some(owner), Some(repo), None) if !owner.is_empty() && !repo.is_empty()
            );
            if !valid {
                return Err(ConfigError::InvalidRepository(repository.clone()));
            }
        }

        if let Some(url) = &self.teams.webhook_url {
            if !url.starts_with("https://") {
                return Err(ConfigError::InvalidWebhook);
            }
        }

        if !(1..=5).contains(&self.notify.max_retries) {
            return Err(ConfigError::InvalidRetry(format!(
                "max_retries must be between 1 and 5, got {}",
                self.notify.max_retries
            )));
        }
        if self.notify.initial_retry_delay_secs == 0 || self.notify.retry_multiplier == 0 {
            return Err(ConfigError::InvalidRetry(
                "initial delay and multiplier must be positive".to_string(),
            ));
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.attribution.lookback_days) {
            return Err(ConfigError::InvalidLookback(self.attribution.lookback_days));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.notify.max_retries,
            initial_delay: Duration::from_secs(self.notify.initial_retry_delay_secs),
            multiplier: self.notify.retry_multiplier,
            max_delay: Duration::from_secs(self.notify.max_retry_delay_secs),
        }
    }

    /// Workflow run URL built from `GITHUB_SERVER_URL`, repository and run id
    pub fn run_url(&self) -> Option<String> {
        match (&self.github.repository, &self.github.run_id) {
            (Some(repository), Some(run_id)) => Some(format!(
                "{}/{}/actions/runs/{}",
                self.github.server_url.trim_end_matches('/'),
                repository,
                run_id
            )),
            _ => None,
        }
    }

    pub fn github_enabled(&self) -> bool {
        self.github.token.is_some() && self.github.repository.is_some()
    }

    pub fn telegram_enabled(&self) -> bool {
        self.telegram.bot_token.is_some() && self.telegram.channel_id.is_some()
    }

    pub fn teams_enabled(&self) -> bool {
        self.teams.webhook_url.is_some()
    }

    /// Terraform directory: CLI flag, then `TERRAFORM_DIR`/config, then cwd
    pub fn resolve_project_directory(&self, cli_dir: Option<&str>) -> Result<PathBuf, ConfigError> {
        let chosen = cli_dir
            .map(str::to_string)
            .or_else(|| self.terraform.project_directory.clone());
        let current_dir = std::env::current_dir()?;
        let path = match chosen {
            Some(dir) => {
                let path = PathBuf::from(dir);
                if path.is_absolute() {
                    path
                } else {
                    current_dir.join(path)
                }
            }
            None => current_dir,
        };
        if !path.is_dir() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Ok(path)
    }

    /// Loggable view with every secret masked
    pub fn sanitized(&self) -> serde_json::Value {
        json!({
            "terraform": {
                "executable_path": self.terraform.executable_path,
                "project_directory": self.terraform.project_directory,
                "lock_wait_secs": self.terraform.lock_wait_secs,
                "run_init": self.terraform.run_init,
            },
            "attribution": {
                "enabled": self.attribution.enabled,
                "region": self.attribution.region,
                "lookback_days": self.attribution.lookback_days,
            },
            "github": {
                "token": self.github.token.as_deref().map(mask_secret),
                "repository": self.github.repository,
                "api_url": self.github.api_url,
                "extra_labels": self.github.extra_labels,
            },
            "telegram": {
                "bot_token": self.telegram.bot_token.as_deref().map(mask_secret),
                "channel_id": self.telegram.channel_id.as_deref().map(mask_secret),
                "display_limit": self.telegram.display_limit,
            },
            "teams": {
                "webhook_url": self.teams.webhook_url.as_deref().map(mask_url),
                "display_limit": self.teams.display_limit,
            },
            "notify": {
                "max_retries": self.notify.max_retries,
                "retry_schedule_secs": self.retry_policy().schedule().iter().map(|d| d.as_secs()).collect::<Vec<_>>(),
                "notify_on_clean": self.notify.notify_on_clean,
            },
        })
    }
}

fn validate_telegram_token(token: &str) -> Result<(), ConfigError> {
    if token.chars().count() < MIN_TELEGRAM_TOKEN_LEN || !token.contains(':') {
        return Err(ConfigError::InvalidTelegramToken);
    }
    Ok(())
}

fn validate_channel_id(channel: &str) -> Result<(), ConfigError> {
    let valid = channel.starts_with('@')
        || channel.starts_with('-')
        || (!channel.is_empty() && channel.chars().all(|c| c.is_ascii_digit()));
    if !valid {
        return Err(ConfigError::InvalidChannelId(channel.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const TOKEN: &str = "123456789:AAEexampleBotTokenValue";

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn with_env(pairs: &[(&str, &str)]) -> Config {
        let vars = env(pairs);
        let mut config = Config::default();
        config.apply_env_with(|key| vars.get(key).cloned());
        config
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(!config.telegram_enabled());
        assert_eq!(config.teams.display_limit, Some(5));
        assert_eq!(config.telegram.display_limit, None);
    }

    #[test]
    fn test_env_overrides() {
        let config = with_env(&[
            ("TELEGRAM_BOT_TOKEN", TOKEN),
            ("TELEGRAM_CHANNEL_ID", "-1001234567890"),
            ("GITHUB_REPOSITORY", "acme/infra"),
            ("GITHUB_RUN_ID", "4242"),
            ("TFDRIFT_EXTRA_LABELS", "oncall, team-platform,"),
            ("TFDRIFT_TEAMS_DISPLAY_LIMIT", "all"),
            ("TFDRIFT_NOTIFY_ON_CLEAN", "true"),
            ("AWS_REGION", ""),
        ]);
        assert!(config.validate().is_ok());
        assert!(config.telegram_enabled());
        assert_eq!(config.github.extra_labels, vec!["oncall", "team-platform"]);
        assert_eq!(config.teams.display_limit, None);
        assert!(config.notify.notify_on_clean);
        assert_eq!(config.attribution.region, None);
        assert_eq!(
            config.run_url().as_deref(),
            Some("https://github.com/acme/infra/actions/runs/4242")
        );
    }

    #[test]
    fn test_invalid_telegram_token() {
        let config = with_env(&[("TELEGRAM_BOT_TOKEN", "short"), ("TELEGRAM_CHANNEL_ID", "@alerts")]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTelegramToken)));

        let config = with_env(&[
            ("TELEGRAM_BOT_TOKEN", "no-colon-in-this-token-at-all"),
            ("TELEGRAM_CHANNEL_ID", "@alerts"),
        ]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidTelegramToken)));
    }

    #[test]
    fn test_channel_id_forms() {
        for valid in ["@drift_alerts", "-1001234567890", "987654321"] {
            assert!(validate_channel_id(valid).is_ok(), "{}", valid);
        }
        for invalid in ["drift_alerts", "", "12ab"] {
            assert!(validate_channel_id(invalid).is_err(), "{}", invalid);
        }
    }

    #[test]
    fn test_half_configured_telegram_is_rejected() {
        let config = with_env(&[("TELEGRAM_BOT_TOKEN", TOKEN)]);
        assert!(matches!(config.validate(), Err(ConfigError::Incomplete(_))));
    }

    #[test]
    fn test_repository_format() {
        for invalid in ["acme", "acme/", "/infra", "acme/infra/extra"] {
            let config = with_env(&[("GITHUB_REPOSITORY", invalid)]);
            assert!(matches!(config.validate(), Err(ConfigError::InvalidRepository(_))), "{}", invalid);
        }
    }

    #[test]
    fn test_retry_bounds() {
        let config = with_env(&[("TFDRIFT_MAX_RETRIES", "9")]);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRetry(_))));
    }

    #[test]
    fn test_lookback_bounds() {
        for invalid in ["0", "-3", "91", "100000000"] {
            let config = with_env(&[("TFDRIFT_LOOKBACK_DAYS", invalid)]);
            assert!(matches!(config.validate(), Err(ConfigError::InvalidLookback(_))), "{}", invalid);
        }
        let config = with_env(&[("TFDRIFT_LOOKBACK_DAYS", "90")]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sanitized_masks_secrets() {
        let config = with_env(&[
            ("TELEGRAM_BOT_TOKEN", TOKEN),
            ("TELEGRAM_CHANNEL_ID", "-1001234567890"),
            ("GITHUB_TOKEN", "ghp_abcdefghijklmnopqrstuvwxyz"),
            ("TEAMS_WEBHOOK_URL", "https://acme.webhook.office.com/webhookb2/secret-path"),
        ]);
        let rendered = config.sanitized().to_string();
        assert!(!rendered.contains(TOKEN));
        assert!(!rendered.contains("ghp_abcdefghijklmnopqrstuvwxyz"));
        assert!(!rendered.contains("secret-path"));
        assert!(rendered.contains("1234***"));
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"terraform": {"project_directory": "/from/file", "lock_wait_secs": 60},
                "github": {"extra_labels": ["from-file"]}}"#,
        )
        .unwrap();

        let mut config = Config::from_file(&path).unwrap();
        assert_eq!(config.terraform.lock_wait_secs, 60);
        assert_eq!(config.attribution.lookback_days, 7);

        let vars = env(&[("TERRAFORM_DIR", "/from/env")]);
        config.apply_env_with(|key| vars.get(key).cloned());
        assert_eq!(config.terraform.project_directory.as_deref(), Some("/from/env"));
        assert_eq!(config.github.extra_labels, vec!["from-file"]);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            Config::from_file(Path::new("/nonexistent/tfdrift.json")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_project_directory_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            terraform: TerraformConfig {
                project_directory: Some("/definitely/not/here".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let cli = dir.path().to_str().unwrap();
        assert_eq!(config.resolve_project_directory(Some(cli)).unwrap(), dir.path());
        assert!(matches!(
            config.resolve_project_directory(None),
            Err(ConfigError::NotFound(_))
        ));
    }
}
