//! Runs the plan stage and turns terraform's detailed exit code into a
//! tri-state outcome.

use crate::shared::clock::Clock;
use crate::terraform::service::TerraformError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default wait before retrying a plan that hit a locked remote state
pub const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(300);

const LOCK_ERROR_MARKER: &str = "acquiring the state lock";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn is_lock_error(&self) -> bool {
        self.stderr.to_lowercase().contains(LOCK_ERROR_MARKER)
    }
}

/// The terraform commands the plan stage needs
#[async_trait]
pub trait TerraformCli: Send + Sync {
    async fn init(&self) -> Result<(), TerraformError>;

    /// `terraform plan -detailed-exitcode -out=<plan_file>`
    async fn plan(&self, plan_file: &Path) -> Result<CommandOutput, TerraformError>;

    /// `terraform show -json <plan_file>`
    async fn show_json(&self, plan_file: &Path) -> Result<String, TerraformError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    NoChange,
    /// Structured plan (`terraform show -json`) of a plan with changes
    Changes(String),
}

impl PlanOutcome {
    /// Detailed exit code signalled by this outcome. Errors map to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            PlanOutcome::NoChange => 0,
            PlanOutcome::Changes(_) => 2,
        }
    }
}

pub struct PlanRunner {
    cli: Box<dyn TerraformCli>,
    clock: Arc<dyn Clock>,
    lock_wait: Duration,
    run_init: bool,
}

impl PlanRunner {
    pub fn new(cli: Box<dyn TerraformCli>, clock: Arc<dyn Clock>) -> Self {
        Self {
            cli,
            clock,
            lock_wait: DEFAULT_LOCK_WAIT,
            run_init: false,
        }
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn with_init(mut self, run_init: bool) -> Self {
        self.run_init = run_init;
        self
    }

    pub async fn run(&self) -> Result<PlanOutcome, TerraformError> {
        if self.run_init {
            info!("Running terraform init");
            self.cli.init().await?;
        }

        let workdir = tempfile::tempdir()?;
        let plan_file = workdir.path().join("drift.tfplan");
        let mut lock_retried = false;

        loop {
            let output = self.cli.plan(&plan_file).await?;
            match output.exit_code {
                Some(0) => {
                    info!("Plan reports no changes");
                    return Ok(PlanOutcome::NoChange);
                }
                Some(2) => {
                    info!("Plan reports changes, reading structured plan");
                    let structured = self.cli.show_json(&plan_file).await?;
                    return Ok(PlanOutcome::Changes(structured));
                }
                _ if output.is_lock_error() => {
                    if lock_retried {
                        return Err(TerraformError::LockContention {
                            waited_secs: self.lock_wait.as_secs(),
                        });
                    }
                    warn!(
                        wait_secs = self.lock_wait.as_secs(),
                        "Remote state is locked, waiting before a single retry"
                    );
                    self.clock.sleep(self.lock_wait).await;
                    lock_retried = true;
                }
                exit_code => {
                    return Err(TerraformError::PlanFailed {
                        exit_code,
                        stderr: output.stderr.trim().to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::clock::ManualClock;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedCli {
        plans: Mutex<VecDeque<CommandOutput>>,
        show_calls: AtomicUsize,
        init_calls: AtomicUsize,
    }

    impl ScriptedCli {
        fn new(plans: Vec<CommandOutput>) -> Self {
            Self {
                plans: Mutex::new(plans.into()),
                show_calls: AtomicUsize::new(0),
                init_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TerraformCli for Arc<ScriptedCli> {
        async fn init(&self) -> Result<(), TerraformError> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn plan(&self, _plan_file: &Path) -> Result<CommandOutput, TerraformError> {
            Ok(self
                .plans
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected plan call"))
        }

        async fn show_json(&self, _plan_file: &Path) -> Result<String, TerraformError> {
            self.show_calls.fetch_add(1, Ordering::SeqCst);
            Ok(r#"{"resource_changes": []}"#.to_string())
        }
    }

    fn exit(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    const LOCKED: &str = "Error: Error acquiring the state lock\n\nLock Info:\n  ID: 1234";

    fn runner(cli: &Arc<ScriptedCli>, clock: &ManualClock) -> PlanRunner {
        PlanRunner::new(Box::new(cli.clone()), Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_no_change() {
        let cli = Arc::new(ScriptedCli::new(vec![exit(0, "")]));
        let clock = ManualClock::new();
        let outcome = runner(&cli, &clock).run().await.unwrap();
        assert_eq!(outcome, PlanOutcome::NoChange);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(cli.show_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_changes_read_structured_plan() {
        let cli = Arc::new(ScriptedCli::new(vec![exit(2, "")]));
        let clock = ManualClock::new();
        let outcome = runner(&cli, &clock).with_init(true).run().await.unwrap();
        assert!(matches!(outcome, PlanOutcome::Changes(ref json) if json.contains("resource_changes")));
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(cli.init_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_plan_error() {
        let cli = Arc::new(ScriptedCli::new(vec![exit(1, "Error: Invalid provider configuration")]));
        let clock = ManualClock::new();
        let err = runner(&cli, &clock).run().await.unwrap_err();
        assert!(matches!(err, TerraformError::PlanFailed { exit_code: Some(1), .. }));
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_lock_waits_and_retries_once() {
        let cli = Arc::new(ScriptedCli::new(vec![exit(1, LOCKED), exit(2, "")]));
        let clock = ManualClock::new();
        let outcome = runner(&cli, &clock).run().await.unwrap();
        assert!(matches!(outcome, PlanOutcome::Changes(_)));
        assert_eq!(clock.sleeps(), vec![DEFAULT_LOCK_WAIT]);
    }

    #[tokio::test]
    async fn test_persistent_lock_is_fatal() {
        let cli = Arc::new(ScriptedCli::new(vec![exit(1, LOCKED), exit(1, LOCKED)]));
        let clock = ManualClock::new();
        let err = runner(&cli, &clock)
            .with_lock_wait(Duration::from_secs(60))
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, TerraformError::LockContention { waited_secs: 60 }));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(60)]);
    }
}
