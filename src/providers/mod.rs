mod http;

pub mod azure_devops;
pub mod bitbucket;
pub mod gitlab;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{AzureDevOpsError, SourceControlError};
use crate::fetch_request::FetchRequest;
use crate::models::{MergeRequest, Platform, WorkItem};

pub use azure_devops::AzureDevOpsClient;
pub use bitbucket::BitbucketProvider;
pub use gitlab::GitLabProvider;
pub use http::RetryPolicy;

/// One source-control platform behind the shared fetch contract.
///
/// Implementations translate their wire format into [`MergeRequest`] and map
/// every failure onto [`SourceControlError`].
#[async_trait]
pub trait SourceControlGateway: Send + Sync {
    fn platform(&self) -> Platform;

    /// Merge requests into `target_branch` whose merge time lies in `[start, end]`.
    async fn fetch_by_date_range(
        &self,
        project_path: &str,
        target_branch: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MergeRequest>, SourceControlError>;

    /// Merge requests behind the commits that are in `source_branch` but not in `target_branch`.
    async fn fetch_by_branch_diff(
        &self,
        project_path: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<Vec<MergeRequest>, SourceControlError>;

    async fn list_branches(&self, project_path: &str) -> Result<Vec<String>, SourceControlError>;

    async fn fetch(&self, request: &FetchRequest) -> Result<Vec<MergeRequest>, SourceControlError> {
        match request {
            FetchRequest::DateTimeRange {
                project_id,
                target_branch,
                start,
                end,
                state,
            } => {
                let mut merge_requests = self
                    .fetch_by_date_range(project_id, target_branch, *start, *end)
                    .await?;
                if let Some(state) = state {
                    merge_requests.retain(|mr| mr.state == *state);
                }
                Ok(merge_requests)
            }
            FetchRequest::BranchDiff {
                project_id,
                source_branch,
                target_branch,
            } => {
                self.fetch_by_branch_diff(project_id, source_branch, target_branch)
                    .await
            }
        }
    }
}

/// Single-item lookup into the work-tracking system.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    async fn fetch_work_item(&self, id: u64) -> Result<WorkItem, AzureDevOpsError>;
}

/// Gateways keyed by platform, handed to the pipeline.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<Platform, Arc<dyn SourceControlGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, gateway: Arc<dyn SourceControlGateway>) {
        self.gateways.insert(gateway.platform(), gateway);
    }

    pub fn get(&self, platform: Platform) -> Option<&Arc<dyn SourceControlGateway>> {
        self.gateways.get(&platform)
    }
}
