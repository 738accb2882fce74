use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{Result, SourceControlError};
use crate::providers::http::{build_url, parse_base_url, Auth, RestClient, RetryPolicy};

use super::types::{GitLabBranch, GitLabCompare, GitLabMergeRequest};

const PAGE_SIZE: &str = "100";

pub struct GitLabClient {
    rest: RestClient,
    api_url: Url,
}

impl GitLabClient {
    pub fn new(base_url: &str, token: Option<Token>, retry: RetryPolicy) -> Result<Self> {
        let api_url = build_url(&parse_base_url(base_url)?, "api/v4/", &[])?;
        let rest = RestClient::new(Auth::bearer(token), retry)?;

        Ok(Self { rest, api_url })
    }

    /// Construct a project-relative URL; the project path is sent URL-encoded.
    fn project_url(
        &self,
        project_path: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Url, SourceControlError> {
        let relative = format!("projects/{}/{path}", urlencoding::encode(project_path));
        build_url(&self.api_url, &relative, query)
            .map_err(|e| SourceControlError::ApiError(e.to_string()))
    }

    /// Follows `x-next-page` until GitLab reports no further page.
    async fn get_all_pages<T>(
        &self,
        url: Url,
        not_found: impl Fn() -> SourceControlError,
    ) -> std::result::Result<Vec<T>, SourceControlError>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = String::from("1");

        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("per_page", PAGE_SIZE)
                .append_pair("page", &page);

            let (batch, headers): (Vec<T>, _) = self
                .rest
                .get_json(page_url)
                .await
                .map_err(|f| f.into_source_control(&not_found))?;
            items.extend(batch);

            let next = headers
                .get("x-next-page")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty());

            match next {
                Some(next) => page = next.to_owned(),
                None => break,
            }
        }

        Ok(items)
    }

    pub async fn fetch_merged_merge_requests(
        &self,
        project_path: &str,
        target_branch: &str,
        updated_after: DateTime<Utc>,
    ) -> std::result::Result<Vec<GitLabMergeRequest>, SourceControlError> {
        let updated_after = updated_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = self.project_url(
            project_path,
            "merge_requests",
            &[
                ("state", "merged"),
                ("scope", "all"),
                ("target_branch", target_branch),
                ("updated_after", &updated_after),
            ],
        )?;

        self.get_all_pages(url, || {
            SourceControlError::ProjectNotFound(project_path.to_owned())
        })
        .await
    }

    /// Commit ids reachable from `to` but not from `from`.
    pub async fn compare(
        &self,
        project_path: &str,
        from: &str,
        to: &str,
    ) -> std::result::Result<Vec<String>, SourceControlError> {
        let url = self.project_url(
            project_path,
            "repository/compare",
            &[("from", from), ("to", to)],
        )?;

        let (compare, _): (GitLabCompare, _) = self.rest.get_json(url).await.map_err(|f| {
            f.into_source_control(|| {
                SourceControlError::BranchNotFound(format!("{project_path}: {from}...{to}"))
            })
        })?;

        Ok(compare.commits.into_iter().map(|c| c.id).collect())
    }

    pub async fn commit_merge_requests(
        &self,
        project_path: &str,
        sha: &str,
    ) -> std::result::Result<Vec<GitLabMergeRequest>, SourceControlError> {
        let url = self.project_url(
            project_path,
            &format!("repository/commits/{sha}/merge_requests"),
            &[],
        )?;

        let (merge_requests, _) = self.rest.get_json(url).await.map_err(|f| {
            f.into_source_control(|| SourceControlError::ProjectNotFound(project_path.to_owned()))
        })?;

        Ok(merge_requests)
    }

    pub async fn branches(
        &self,
        project_path: &str,
        search: &str,
    ) -> std::result::Result<Vec<String>, SourceControlError> {
        let url = self.project_url(project_path, "repository/branches", &[("search", search)])?;

        let branches: Vec<GitLabBranch> = self
            .get_all_pages(url, || {
                SourceControlError::ProjectNotFound(project_path.to_owned())
            })
            .await?;

        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}
