use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tfdrift::config::{Config, Environment};
use tfdrift::core::pipeline::{build_notifier, build_pipeline, RunContext, RunOutcome};
use tfdrift::formatters::OutputFormatter;
use tfdrift::report::DriftReport;
use tfdrift::shared::clock::SystemClock;
use tfdrift::shared::logging;
use tfdrift::terraform::plan_parser;
use tracing::{error, info};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "tfdrift",
    about = "Detect Terraform drift, attribute it through CloudTrail, file a GitHub issue and alert chat channels.",
    version = APP_VERSION
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short = 'c',
        value_name = "PATH",
        global = true,
        help = "Path to the configuration file"
    )]
    pub config: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    #[command(name = "detect", about = "Run a full drift detection pass")]
    Detect {
        #[arg(long, short = 'e', value_enum, help = "Environment being checked")]
        environment: Environment,

        #[arg(long, short = 'd', value_name = "PATH", help = "Terraform project directory")]
        dir: Option<String>,

        #[arg(long, help = "Send a short confirmation when no drift is found")]
        notify_on_clean: bool,

        #[arg(long, help = "Run terraform init before planning")]
        init: bool,

        #[arg(long, value_name = "PATH", help = "Write the drift report artifact as JSON")]
        report_out: Option<PathBuf>,

        #[arg(long, value_name = "URL", help = "Workflow run URL linked from messages")]
        run_url: Option<String>,

        #[arg(long, help = "Exit with 2 when drift is detected")]
        detailed_exitcode: bool,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    #[command(name = "parse", about = "Parse a saved `terraform show -json` plan and print the changes")]
    Parse {
        #[arg(long, value_name = "PATH")]
        plan: PathBuf,
    },

    #[command(name = "notify", about = "Send notifications for a saved drift report")]
    Notify {
        #[arg(long, value_name = "PATH")]
        report: PathBuf,

        #[arg(long, short = 'e', value_enum, help = "Override the report's environment")]
        environment: Option<Environment>,
    },
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            1
        }
    };
    std::process::exit(code);
}

fn load_config(cli_config: Option<&str>) -> anyhow::Result<Config> {
    let config = Config::load(cli_config.map(Path::new)).context("Failed to load configuration")?;
    info!(config = %config.sanitized(), "Configuration loaded");
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Detect {
            environment,
            dir,
            notify_on_clean,
            init,
            report_out,
            run_url,
            detailed_exitcode,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let project_dir = config.resolve_project_directory(dir.as_deref())?;
            info!(directory = %project_dir.display(), environment = %environment, "Terraform project resolved");

            let pipeline = build_pipeline(&config, project_dir, init).await?;
            let context = RunContext {
                environment: environment.to_string(),
                branch: config.github.ref_name.clone(),
                run_reference: run_url.or_else(|| config.run_url()),
                notify_on_clean: notify_on_clean || config.notify.notify_on_clean,
            };
            let outcome = pipeline.run(&context).await?;

            if let (Some(path), RunOutcome::Drift { report, .. }) = (&report_out, &outcome) {
                report
                    .save(path)
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
                info!(path = %path.display(), "Drift report written");
            }

            match output {
                OutputFormat::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&OutputFormatter::format_run_summary(
                        &context.environment,
                        &outcome
                    ))?
                ),
                OutputFormat::Text => {
                    print!("{}", OutputFormatter::render_text(&context.environment, &outcome))
                }
            }

            Ok(if detailed_exitcode { outcome.exit_code() } else { 0 })
        }
        Commands::Parse { plan } => {
            let content = std::fs::read_to_string(&plan)
                .with_context(|| format!("Failed to read plan {}", plan.display()))?;
            let changes = plan_parser::parse(&content)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&OutputFormatter::format_changes(&changes))?
            );
            Ok(0)
        }
        Commands::Notify {
            report,
            environment,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let mut drift_report = DriftReport::load(&report)
                .with_context(|| format!("Failed to load report {}", report.display()))?;
            if let Some(environment) = environment {
                drift_report.environment = environment.to_string();
            }

            let notifier = build_notifier(&config, Arc::new(SystemClock));
            if !notifier.has_channels() {
                anyhow::bail!("No chat channel configured: set TELEGRAM_BOT_TOKEN/TELEGRAM_CHANNEL_ID or TEAMS_WEBHOOK_URL");
            }
            let attempts = notifier.notify(&drift_report, None).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&OutputFormatter::format_attempts(&attempts))?
            );
            Ok(if attempts.iter().all(|a| a.is_sent()) { 0 } else { 1 })
        }
    }
}
