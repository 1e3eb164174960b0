use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable selecting the crate log level
pub const LOG_LEVEL_ENV: &str = "TFDRIFT_LOG_LEVEL";

/// Map a user supplied level name to a tracing filter level
pub fn filter_level(raw: &str) -> &'static str {
    match raw.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `TFDRIFT_LOG_LEVEL`.
/// Output goes to stderr so stdout only carries command results.
pub fn init() {
    let log_level = std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".to_string());
    let filter = filter_level(&log_level);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "tfdrift={},reqwest=warn,hyper=warn,aws_config=warn,aws_smithy_runtime=warn",
                    filter
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Render a secret as a short prefix for log correlation
pub fn mask_secret(secret: &str) -> String {
    if secret.chars().count() < 12 {
        return "[REDACTED]".to_string();
    }
    let prefix: String = secret.chars().take(4).collect();
    format!("{}***", prefix)
}

/// Render a URL carrying credentials (webhooks) as scheme and host only
pub fn mask_url(url: &str) -> String {
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => format!("{}://{}/***", parsed.scheme(), host),
            None => "[REDACTED]".to_string(),
        },
        Err(_) => "[REDACTED]".to_string(),
    }
}
