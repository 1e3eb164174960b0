//! End-to-end drift run: plan, parse, attribute, record, notify.
//!
//! Only plan and parse failures abort a run. Attribution, issue recording
//! and notification degrade and are reported through the outcome.

use crate::attribution::{without_attribution, AttributionLookup, CloudTrailSource};
use crate::config::{Config, ConfigError};
use crate::issues::{GitHubIssues, IssueRecorder, IssueReference};
use crate::notify::{ChatChannel, NotificationAttempt, Notifier, TeamsChannel, TelegramChannel};
use crate::report::{DriftReport, ReportError};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::rate_limit::FixedDelayGate;
use crate::shared::retry::Retryable;
use crate::terraform::plan_parser::{self, ParseError};
use crate::terraform::runner::{PlanOutcome, PlanRunner};
use crate::terraform::service::{TerraformError, TerraformService};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Terraform error: {0}")]
    Terraform(#[from] TerraformError),

    #[error("Plan parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),
}

/// Run metadata carried into the report and messages
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    pub environment: String,
    pub branch: Option<String>,
    pub run_reference: Option<String>,
    pub notify_on_clean: bool,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    Clean {
        notifications: Vec<NotificationAttempt>,
    },
    Drift {
        report: DriftReport,
        issue: Option<IssueReference>,
        notifications: Vec<NotificationAttempt>,
    },
}

impl RunOutcome {
    pub fn is_drift(&self) -> bool {
        matches!(self, RunOutcome::Drift { .. })
    }

    /// 0 for a clean run, 2 when drift was found
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean { .. } => PlanOutcome::NoChange.exit_code(),
            RunOutcome::Drift { .. } => 2,
        }
    }

    pub fn notifications(&self) -> &[NotificationAttempt] {
        match self {
            RunOutcome::Clean { notifications } | RunOutcome::Drift { notifications, .. } => {
                notifications
            }
        }
    }
}

pub struct DriftPipeline {
    runner: PlanRunner,
    attribution: Option<AttributionLookup>,
    recorder: Option<IssueRecorder>,
    notifier: Notifier,
}

impl DriftPipeline {
    pub fn new(runner: PlanRunner, notifier: Notifier) -> Self {
        Self {
            runner,
            attribution: None,
            recorder: None,
            notifier,
        }
    }

    pub fn with_attribution(mut self, lookup: AttributionLookup) -> Self {
        self.attribution = Some(lookup);
        self
    }

    pub fn with_recorder(mut self, recorder: IssueRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub async fn run(&self, context: &RunContext) -> Result<RunOutcome, PipelineError> {
        let detected_at = Utc::now();
        info!(environment = %context.environment, "Starting drift detection");

        match self.runner.run().await? {
            PlanOutcome::NoChange => Ok(self.clean(context, detected_at).await),
            PlanOutcome::Changes(structured) => {
                self.process_plan(&structured, context, detected_at).await
            }
        }
    }

    /// Everything after the plan stage, from a structured plan document
    pub async fn process_plan(
        &self,
        structured: &str,
        context: &RunContext,
        detected_at: DateTime<Utc>,
    ) -> Result<RunOutcome, PipelineError> {
        let changes = plan_parser::parse(structured)?;
        info!(changes = changes.len(), "Structured plan parsed");

        let attributed = match &self.attribution {
            Some(lookup) => lookup.attribute_all(changes).await,
            None => without_attribution(changes),
        };

        let Some(report) = DriftReport::compose(
            &context.environment,
            context.branch.clone(),
            context.run_reference.clone(),
            detected_at,
            attributed,
        ) else {
            // plan reported changes, but none are resource drift
            return Ok(self.clean(context, detected_at).await);
        };

        let issue = match &self.recorder {
            Some(recorder) => match recorder.record(&report).await {
                Ok(issue) => Some(issue),
                Err(err) => {
                    warn!(
                        stage = "issue",
                        error_class = if err.is_retryable() { "retryable" } else { "fatal" },
                        error = %err,
                        "Issue recording failed, notifying without an issue link"
                    );
                    None
                }
            },
            None => None,
        };

        let notifications = self.notifier.notify(&report, issue.as_ref()).await;
        for attempt in notifications.iter().filter(|a| !a.is_sent()) {
            warn!(
                channel = %attempt.channel,
                stage = "notify",
                error = attempt.error.as_deref().unwrap_or("unknown"),
                "Channel notification failed"
            );
        }

        Ok(RunOutcome::Drift {
            report,
            issue,
            notifications,
        })
    }

    async fn clean(&self, context: &RunContext, detected_at: DateTime<Utc>) -> RunOutcome {
        info!(environment = %context.environment, "No drift detected");
        let notifications = if context.notify_on_clean {
            self.notifier
                .notify_clean(
                    &context.environment,
                    context.branch.as_deref(),
                    context.run_reference.as_deref(),
                    detected_at,
                )
                .await
        } else {
            Vec::new()
        };
        RunOutcome::Clean { notifications }
    }
}

/// Chat channels enabled by `config`
pub fn build_notifier(config: &Config, clock: Arc<dyn Clock>) -> Notifier {
    let mut channels: Vec<Arc<dyn ChatChannel>> = Vec::new();
    if let (Some(token), Some(chat)) = (&config.telegram.bot_token, &config.telegram.channel_id) {
        channels.push(Arc::new(
            TelegramChannel::new(token, chat)
                .with_api_url(&config.telegram.api_url)
                .with_display_limit(config.telegram.display_limit),
        ));
    }
    if let Some(webhook) = &config.teams.webhook_url {
        channels.push(Arc::new(
            TeamsChannel::new(webhook).with_display_limit(config.teams.display_limit),
        ));
    }
    if channels.is_empty() {
        warn!("No chat channels configured, notifications are disabled");
    }

    Notifier::new(channels, clock)
        .with_policy(config.retry_policy())
        .with_part_interval(Duration::from_millis(config.notify.part_interval_ms))
}

/// Wire the production pipeline for `project_dir`
pub async fn build_pipeline(
    config: &Config,
    project_dir: PathBuf,
    run_init: bool,
) -> Result<DriftPipeline, PipelineError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let terraform_path = TerraformService::resolve_binary(config.terraform.executable_path.as_deref())?;
    let service = TerraformService::new(terraform_path, project_dir);

    let runner = PlanRunner::new(Box::new(service), clock.clone())
        .with_lock_wait(Duration::from_secs(config.terraform.lock_wait_secs))
        .with_init(run_init || config.terraform.run_init);
    let mut pipeline = DriftPipeline::new(runner, build_notifier(config, clock.clone()));

    if config.attribution.enabled {
        let source = CloudTrailSource::from_env(config.attribution.region.as_deref()).await;
        let gate = FixedDelayGate::new(
            Duration::from_millis(config.attribution.query_interval_ms),
            clock.clone(),
        );
        pipeline = pipeline.with_attribution(
            AttributionLookup::new(Arc::new(source), gate)
                .with_lookback(chrono::Duration::days(config.attribution.lookback_days)),
        );
    } else {
        info!("Attribution disabled, changes will be reported without actors");
    }

    if let (Some(token), Some(repository)) = (&config.github.token, &config.github.repository) {
        let tracker = GitHubIssues::new(&config.github.api_url, repository, token);
        pipeline = pipeline.with_recorder(
            IssueRecorder::new(Arc::new(tracker), clock)
                .with_policy(config.retry_policy())
                .with_extra_labels(config.github.extra_labels.clone()),
        );
    } else {
        info!("GitHub issue recording not configured");
    }

    Ok(pipeline)
}
