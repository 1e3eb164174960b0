//! The drift report: changes joined with attribution plus run metadata.

use crate::attribution::ChangeAttribution;
use crate::terraform::model::{ChangeAction, ResourceChange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid report artifact: {0}")]
    InvalidArtifact(String),

    #[error("Report artifact contains no changes")]
    Empty,
}

impl From<serde_json::Error> for ReportError {
    fn from(err: serde_json::Error) -> Self {
        ReportError::InvalidArtifact(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttributedChange {
    pub change: ResourceChange,
    pub attribution: ChangeAttribution,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriftReport {
    pub environment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_reference: Option<String>,
    pub changes: Vec<AttributedChange>,
}

impl DriftReport {
    /// Build a report, preserving plan order. `None` when nothing drifted.
    pub fn compose(
        environment: &str,
        branch: Option<String>,
        run_reference: Option<String>,
        detected_at: DateTime<Utc>,
        changes: Vec<(ResourceChange, ChangeAttribution)>,
    ) -> Option<Self> {
        if changes.is_empty() {
            return None;
        }

        Some(Self {
            environment: environment.to_string(),
            branch,
            detected_at,
            run_reference,
            changes: changes
                .into_iter()
                .map(|(change, attribution)| AttributedChange {
                    change,
                    attribution,
                })
                .collect(),
        })
    }

    pub fn total(&self) -> usize {
        self.changes.len()
    }

    /// Non-zero counts per action, in create/update/delete/replace order
    pub fn counts(&self) -> Vec<(ChangeAction, usize)> {
        ChangeAction::ALL
            .iter()
            .map(|action| {
                let count = self
                    .changes
                    .iter()
                    .filter(|c| c.change.action == *action)
                    .count();
                (*action, count)
            })
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    pub fn count_of(&self, action: ChangeAction) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change.action == action)
            .count()
    }

    pub fn to_json(&self) -> Result<String, ReportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReportError> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load a report artifact written by `save`
    pub fn load(path: &Path) -> Result<Self, ReportError> {
        let content = std::fs::read_to_string(path)?;
        let report: DriftReport = serde_json::from_str(&content)?;
        if report.changes.is_empty() {
            return Err(ReportError::Empty);
        }
        Ok(report)
    }
}
