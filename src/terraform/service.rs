use crate::terraform::runner::{CommandOutput, TerraformCli};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum TerraformError {
    #[error("Terraform command failed: {0}")]
    CommandError(String),

    #[error("Terraform binary not found: {0}")]
    BinaryNotFound(String),

    #[error("Terraform plan failed (exit code {exit_code:?}): {stderr}")]
    PlanFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Remote state is still locked after waiting {waited_secs}s and retrying once")]
    LockContention { waited_secs: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Terraform init required")]
    InitRequired,
}

/// Thin wrapper around the terraform binary for one working directory
pub struct TerraformService {
    terraform_path: PathBuf,
    project_directory: PathBuf,
}

impl TerraformService {
    pub fn new(terraform_path: PathBuf, project_directory: PathBuf) -> Self {
        debug!(
            terraform = %terraform_path.display(),
            directory = %project_directory.display(),
            "TerraformService initialized"
        );
        Self {
            terraform_path,
            project_directory,
        }
    }

    /// Locate the terraform binary: explicit path first, then
    /// `TERRAFORM_BINARY_NAME` (default `terraform`) on `PATH`.
    pub fn resolve_binary(explicit: Option<&str>) -> Result<PathBuf, TerraformError> {
        if let Some(path) = explicit {
            let path_buf = PathBuf::from(path);
            let path_buf = if path_buf.is_absolute() {
                path_buf
            } else {
                std::env::current_dir()?.join(path_buf)
            };
            if !path_buf.exists() {
                return Err(TerraformError::BinaryNotFound(path_buf.display().to_string()));
            }
            info!(terraform = %path_buf.display(), "Using configured Terraform binary");
            return Ok(path_buf);
        }

        let binary_name =
            std::env::var("TERRAFORM_BINARY_NAME").unwrap_or_else(|_| "terraform".to_string());
        match which::which(&binary_name) {
            Ok(path) => {
                info!(binary = %binary_name, terraform = %path.display(), "Found Terraform binary in PATH");
                Ok(path)
            }
            Err(_) => Err(TerraformError::BinaryNotFound(binary_name)),
        }
    }

    async fn execute(&self, args: &[&str]) -> Result<CommandOutput, TerraformError> {
        debug!(args = ?args, directory = %self.project_directory.display(), "Running terraform");
        let output = Command::new(&self.terraform_path)
            .args(args)
            .current_dir(&self.project_directory)
            .env("TF_IN_AUTOMATION", "1")
            .output()
            .await?;

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[async_trait]
impl TerraformCli for TerraformService {
    async fn init(&self) -> Result<(), TerraformError> {
        let output = self.execute(&["init", "-input=false", "-no-color"]).await?;
        if output.success() {
            Ok(())
        } else {
            Err(TerraformError::CommandError(format!(
                "Terraform init failed: {}",
                output.stderr
            )))
        }
    }

    async fn plan(&self, plan_file: &Path) -> Result<CommandOutput, TerraformError> {
        let out_arg = format!("-out={}", plan_file.display());
        self.execute(&[
            "plan",
            "-detailed-exitcode",
            "-input=false",
            "-no-color",
            "-lock-timeout=0s",
            &out_arg,
        ])
        .await
    }

    async fn show_json(&self, plan_file: &Path) -> Result<String, TerraformError> {
        let plan_arg = plan_file.display().to_string();
        let output = self.execute(&["show", "-json", "-no-color", &plan_arg]).await?;
        if output.success() {
            Ok(output.stdout)
        } else if output.stderr.contains("terraform init") {
            Err(TerraformError::InitRequired)
        } else {
            Err(TerraformError::CommandError(format!(
                "Terraform show failed: {}",
                output.stderr
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_missing_explicit_binary() {
        let result = TerraformService::resolve_binary(Some("/nonexistent/terraform-bin"));
        assert!(matches!(result, Err(TerraformError::BinaryNotFound(_))));
    }

    #[test]
    fn test_resolve_existing_explicit_binary() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("terraform");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();

        let resolved = TerraformService::resolve_binary(binary.to_str()).unwrap();
        assert_eq!(resolved, binary);
    }

    #[test]
    fn test_lock_contention_message() {
        let err = TerraformError::LockContention { waited_secs: 300 };
        assert!(err.to_string().contains("300s"));
    }
}
