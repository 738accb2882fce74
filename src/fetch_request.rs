use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::MergeState;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchRequestError {
    #[error("Range start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Field '{0}' must not be empty")]
    EmptyField(&'static str),

    #[error("Source and target branch are both '{0}'")]
    SameBranch(String),
}

impl FetchRequestError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRange { .. } => "FetchRequest.InvalidRange",
            Self::EmptyField(_) => "FetchRequest.EmptyField",
            Self::SameBranch(_) => "FetchRequest.SameBranch",
        }
    }
}

/// A validated "what changed" query against one project.
///
/// Values can only be built through [`FetchRequest::date_range`] and
/// [`FetchRequest::branch_diff`], so a gateway never sees an inverted range or
/// a blank branch name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FetchRequest {
    DateTimeRange {
        project_id: String,
        target_branch: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        state: Option<MergeState>,
    },
    BranchDiff {
        project_id: String,
        source_branch: String,
        target_branch: String,
    },
}

impl FetchRequest {
    pub fn date_range(
        project_id: &str,
        target_branch: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        state: Option<MergeState>,
    ) -> Result<Self, FetchRequestError> {
        let project_id = non_blank("project_id", project_id)?;
        let target_branch = non_blank("target_branch", target_branch)?;
        if start > end {
            return Err(FetchRequestError::InvalidRange { start, end });
        }

        Ok(Self::DateTimeRange {
            project_id,
            target_branch,
            start,
            end,
            state,
        })
    }

    pub fn branch_diff(
        project_id: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Self, FetchRequestError> {
        let project_id = non_blank("project_id", project_id)?;
        let source_branch = non_blank("source_branch", source_branch)?;
        let target_branch = non_blank("target_branch", target_branch)?;
        if source_branch == target_branch {
            return Err(FetchRequestError::SameBranch(source_branch));
        }

        Ok(Self::BranchDiff {
            project_id,
            source_branch,
            target_branch,
        })
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::DateTimeRange { project_id, .. } | Self::BranchDiff { project_id, .. } => {
                project_id
            }
        }
    }

    /// Short human description used in logs and progress messages.
    pub fn describe(&self) -> String {
        match self {
            Self::DateTimeRange {
                project_id,
                target_branch,
                start,
                end,
                ..
            } => format!(
                "{project_id}: merged into {target_branch} between {} and {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ),
            Self::BranchDiff {
                project_id,
                source_branch,
                target_branch,
            } => format!("{project_id}: {source_branch} not in {target_branch}"),
        }
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<String, FetchRequestError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(FetchRequestError::EmptyField(field));
    }
    Ok(trimmed.to_owned())
}
