use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::models::{Author, MergeRequest, MergeState, Platform};

/// One page of a Bitbucket Cloud collection; `next` is an absolute URL.
#[derive(Debug, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub values: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
}

/// Pull request as returned by the Bitbucket Cloud 2.0 API.
#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketPullRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    /// `OPEN`, `MERGED`, `DECLINED` or `SUPERSEDED`
    pub state: String,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub source: Endpoint,
    pub destination: Endpoint,
    pub author: BitbucketAccount,
    pub links: Links,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub branch: BranchRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchRef {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BitbucketAccount {
    pub display_name: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Links {
    pub html: Link,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Deserialize)]
pub struct BitbucketCommit {
    pub hash: String,
}

impl BitbucketPullRequest {
    /// Converts to the shared shape. Bitbucket has no merge timestamp, so the
    /// last update of a merged pull request stands in for it.
    pub fn into_merge_request(self, project_path: &str) -> Option<MergeRequest> {
        let state = MergeState::from_platform(&self.state)?;
        let merged_at = (state == MergeState::Merged).then_some(self.updated_on);
        let author_id = self
            .author
            .nickname
            .or(self.author.uuid)
            .unwrap_or_else(|| self.author.display_name.clone());

        Some(MergeRequest {
            title: self.title,
            description: self.description.filter(|d| !d.is_empty()),
            source_branch: self.source.branch.name,
            target_branch: self.destination.branch.name,
            created_at: self.created_on,
            merged_at,
            state,
            author: Author {
                id: author_id,
                name: self.author.display_name,
            },
            url: self.links.html.href,
            platform: Platform::Bitbucket,
            project_path: project_path.to_owned(),
        })
    }
}
