use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{Author, MergeRequest, MergeState, Platform};

/// Merge request as returned by the GitLab v4 REST API.
#[derive(Debug, Clone, Deserialize)]
pub struct GitLabMergeRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `opened`, `closed`, `locked` or `merged`
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    pub source_branch: String,
    pub target_branch: String,
    pub author: GitLabUser,
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitLabUser {
    pub username: String,
    pub name: String,
}

/// Response of `repository/compare`; only the commit list is used.
#[derive(Debug, Deserialize)]
pub struct GitLabCompare {
    #[serde(default)]
    pub commits: Vec<GitLabCommit>,
}

#[derive(Debug, Deserialize)]
pub struct GitLabCommit {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct GitLabBranch {
    pub name: String,
}

impl GitLabMergeRequest {
    /// Converts to the shared shape. Unknown states are dropped.
    pub fn into_merge_request(self, project_path: &str) -> Option<MergeRequest> {
        let state = MergeState::from_platform(&self.state)?;
        Some(MergeRequest {
            title: self.title,
            description: self.description.filter(|d| !d.is_empty()),
            source_branch: self.source_branch,
            target_branch: self.target_branch,
            created_at: self.created_at,
            merged_at: self.merged_at,
            state,
            author: Author {
                id: self.author.username,
                name: self.author.name,
            },
            url: self.web_url,
            platform: Platform::GitLab,
            project_path: project_path.to_owned(),
        })
    }
}
