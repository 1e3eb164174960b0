// Re-export modules for testing and external use
pub mod shared {
    pub mod clock;
    pub mod logging;
    pub mod rate_limit;
    pub mod retry;
}

pub mod terraform {
    pub mod model;
    pub mod plan_parser;
    pub mod runner;
    pub mod service;

    pub use model::{ChangeAction, ResourceChange};
    pub use plan_parser::ParseError;
    pub use runner::{CommandOutput, PlanOutcome, PlanRunner, TerraformCli};
    pub use service::{TerraformError, TerraformService};
}

pub mod attribution {
    pub mod cloudtrail;
    pub mod lookup;

    pub use cloudtrail::CloudTrailSource;
    pub use lookup::{
        without_attribution, ActorType, AttributionError, AttributionLookup, AuditEvent,
        AuditLogSource, ChangeAttribution,
    };
}

pub mod report {
    pub mod composer;

    pub use composer::{AttributedChange, DriftReport, ReportError};
}

pub mod issues {
    pub mod github;
    pub mod recorder;
    pub mod render;

    pub use github::{GitHubIssues, IssueReference, IssueTracker, NewIssue, RecordError};
    pub use recorder::IssueRecorder;
}

pub mod notify {
    pub mod channel;
    pub mod format;
    pub mod notifier;
    pub mod split;
    pub mod teams;
    pub mod telegram;

    pub use channel::{ChannelError, ChatChannel, DeliveredMessage, MessageAction, OutboundMessage};
    pub use format::Dialect;
    pub use notifier::{DeliveryStatus, MessagePart, NotificationAttempt, Notifier};
    pub use teams::TeamsChannel;
    pub use telegram::TelegramChannel;
}

pub mod formatters {
    pub mod output;

    pub use output::OutputFormatter;
}

pub mod core {
    pub mod pipeline;
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use crate::config::{Config, Environment};
pub use crate::core::pipeline::{DriftPipeline, PipelineError, RunContext, RunOutcome};
pub use report::DriftReport;
pub use terraform::service::TerraformService;
