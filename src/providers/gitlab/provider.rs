use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info};

use crate::auth::Token;
use crate::error::{Result, SourceControlError};
use crate::models::{MergeRequest, MergeState, Platform};
use crate::providers::http::RetryPolicy;
use crate::providers::SourceControlGateway;

use super::client::GitLabClient;
use super::types::GitLabMergeRequest;

/// GitLab merge-request gateway.
///
/// Date-range queries use the merge request list filtered server-side by target
/// branch and `updated_after`, then narrowed to the exact merge window locally.
/// Branch diffs use the native compare endpoint and look up the merge requests
/// that introduced each compared commit.
pub struct GitLabProvider {
    client: GitLabClient,
}

impl GitLabProvider {
    /// Creates a GitLab gateway.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitLab instance base URL (e.g., <https://gitlab.com>)
    /// * `token` - Optional personal access token
    /// * `retry` - Retry policy for rate limits and transient failures
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL cannot be constructed.
    pub fn new(base_url: &str, token: Option<Token>, retry: RetryPolicy) -> Result<Self> {
        let client = GitLabClient::new(base_url, token, retry)?;
        Ok(Self { client })
    }

    fn convert(project_path: &str, nodes: Vec<GitLabMergeRequest>) -> Vec<MergeRequest> {
        nodes
            .into_iter()
            .filter_map(|node| node.into_merge_request(project_path))
            .collect()
    }
}

#[async_trait]
impl SourceControlGateway for GitLabProvider {
    fn platform(&self) -> Platform {
        Platform::GitLab
    }

    async fn fetch_by_date_range(
        &self,
        project_path: &str,
        target_branch: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<Vec<MergeRequest>, SourceControlError> {
        info!("Fetching GitLab merge requests for {project_path} into {target_branch}...");

        let nodes = self
            .client
            .fetch_merged_merge_requests(project_path, target_branch, start)
            .await?;
        let fetched = nodes.len();

        let merge_requests: Vec<_> = Self::convert(project_path, nodes)
            .into_iter()
            .filter(|mr| mr.target_branch == target_branch)
            .filter(|mr| (start..=end).contains(&mr.effective_time()))
            .collect();

        debug!(
            "Kept {} of {fetched} GitLab merge requests inside the window",
            merge_requests.len()
        );

        Ok(merge_requests)
    }

    async fn fetch_by_branch_diff(
        &self,
        project_path: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> std::result::Result<Vec<MergeRequest>, SourceControlError> {
        info!("Comparing {target_branch}...{source_branch} in {project_path}...");

        let commits = self
            .client
            .compare(project_path, target_branch, source_branch)
            .await?;

        debug!("{} commits in {source_branch} not in {target_branch}", commits.len());

        let mut unique: IndexMap<String, MergeRequest> = IndexMap::new();
        for sha in &commits {
            let nodes = self.client.commit_merge_requests(project_path, sha).await?;
            for mr in Self::convert(project_path, nodes) {
                if mr.state == MergeState::Merged {
                    unique.entry(mr.url.clone()).or_insert(mr);
                }
            }
        }

        Ok(unique.into_values().collect())
    }

    async fn list_branches(
        &self,
        project_path: &str,
    ) -> std::result::Result<Vec<String>, SourceControlError> {
        self.client.branches(project_path, "release/").await
    }
}
