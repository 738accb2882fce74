use async_trait::async_trait;
use log::debug;
use url::Url;

use crate::auth::Token;
use crate::error::{AzureDevOpsError, Result};
use crate::models::WorkItem;
use crate::providers::http::{build_url, parse_base_url, Auth, HttpFailure, RestClient, RetryPolicy};
use crate::providers::WorkItemSource;

use super::types::AzureWorkItem;

const API_VERSION: &str = "7.1";

/// Azure DevOps Boards client for single work item lookups.
pub struct AzureDevOpsClient {
    rest: RestClient,
    project_url: Url,
}

impl AzureDevOpsClient {
    /// Creates a client for `{organization_url}/{project}`.
    ///
    /// The personal access token is sent with basic auth and an empty user name,
    /// which is what Azure DevOps expects for PATs.
    ///
    /// # Errors
    ///
    /// Returns an error if the organization URL is invalid.
    pub fn new(
        organization_url: &str,
        project: &str,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let auth = match token {
            Some(password) => Auth::Basic {
                username: String::new(),
                password,
            },
            None => Auth::Anonymous,
        };
        let project_url = build_url(
            &parse_base_url(organization_url)?,
            &format!("{}/", urlencoding::encode(project)),
            &[],
        )?;

        Ok(Self {
            rest: RestClient::new(auth, retry)?,
            project_url,
        })
    }

    fn map_failure(id: u64, failure: HttpFailure) -> AzureDevOpsError {
        match failure {
            HttpFailure::Status { status: 404, .. } => AzureDevOpsError::WorkItemNotFound(id),
            HttpFailure::Status {
                status: 401 | 403,
                body,
            } => AzureDevOpsError::Unauthorized(body),
            HttpFailure::Status { status, body } => {
                AzureDevOpsError::ApiError(format!("HTTP {status}: {body}"))
            }
            HttpFailure::Transport(message) | HttpFailure::Decode(message) => {
                AzureDevOpsError::ApiError(message)
            }
        }
    }
}

#[async_trait]
impl WorkItemSource for AzureDevOpsClient {
    async fn fetch_work_item(&self, id: u64) -> std::result::Result<WorkItem, AzureDevOpsError> {
        let url = build_url(
            &self.project_url,
            &format!("_apis/wit/workitems/{id}"),
            &[("$expand", "all"), ("api-version", API_VERSION)],
        )
        .map_err(|e| AzureDevOpsError::ApiError(e.to_string()))?;

        let (raw, _): (AzureWorkItem, _) = self
            .rest
            .get_json(url)
            .await
            .map_err(|f| Self::map_failure(id, f))?;

        debug!("Fetched work item {id}");

        let fallback_url = format!("{}_workitems/edit/{id}", self.project_url);
        Ok(raw.into_work_item(fallback_url))
    }
}
