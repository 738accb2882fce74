use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use url::Url;

use crate::auth::Token;
use crate::error::{Result, SourceControlError};
use crate::providers::http::{build_url, parse_base_url, Auth, RestClient, RetryPolicy};

use super::types::{BitbucketCommit, BitbucketPullRequest, BranchRef, Page};

const PAGE_LEN: &str = "50";

pub struct BitbucketClient {
    rest: RestClient,
    api_url: Url,
}

impl BitbucketClient {
    /// With a `username` the token is sent as an app password over basic auth,
    /// otherwise as a bearer access token.
    pub fn new(
        base_url: &str,
        username: Option<String>,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let auth = match (username, token) {
            (Some(username), Some(password)) => Auth::Basic { username, password },
            (_, token) => Auth::bearer(token),
        };

        Ok(Self {
            rest: RestClient::new(auth, retry)?,
            api_url: parse_base_url(base_url)?,
        })
    }

    /// `workspace/repo` becomes `repositories/workspace/repo/{path}`.
    fn repo_url(
        &self,
        project_path: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Url, SourceControlError> {
        let (workspace, repo) = split_project_path(project_path)?;
        let relative = format!(
            "repositories/{}/{}/{path}",
            urlencoding::encode(workspace),
            urlencoding::encode(repo)
        );
        build_url(&self.api_url, &relative, query)
            .map_err(|e| SourceControlError::ApiError(e.to_string()))
    }

    /// Follows the `next` links of a paginated collection.
    async fn get_all_pages<T>(
        &self,
        url: Url,
        not_found: impl Fn() -> SourceControlError,
    ) -> std::result::Result<Vec<T>, SourceControlError>
    where
        T: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            let (page, _): (Page<T>, _) = self
                .rest
                .get_json(url)
                .await
                .map_err(|f| f.into_source_control(&not_found))?;
            items.extend(page.values);

            next = page
                .next
                .map(|link| {
                    Url::parse(&link).map_err(|e| {
                        SourceControlError::InvalidResponse(format!("Bad next link {link}: {e}"))
                    })
                })
                .transpose()?;
        }

        Ok(items)
    }

    pub async fn merged_pull_requests(
        &self,
        project_path: &str,
        target_branch: &str,
        updated_after: DateTime<Utc>,
    ) -> std::result::Result<Vec<BitbucketPullRequest>, SourceControlError> {
        let query = format!(
            "destination.branch.name = \"{target_branch}\" AND updated_on >= {}",
            updated_after.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let url = self.repo_url(
            project_path,
            "pullrequests",
            &[("state", "MERGED"), ("q", &query), ("pagelen", PAGE_LEN)],
        )?;

        self.get_all_pages(url, || {
            SourceControlError::ProjectNotFound(project_path.to_owned())
        })
        .await
    }

    /// Commit hashes reachable from `include` but not from `exclude`.
    pub async fn commits_between(
        &self,
        project_path: &str,
        include: &str,
        exclude: &str,
    ) -> std::result::Result<Vec<String>, SourceControlError> {
        let url = self.repo_url(
            project_path,
            "commits",
            &[("include", include), ("exclude", exclude), ("pagelen", PAGE_LEN)],
        )?;

        let commits: Vec<BitbucketCommit> = self
            .get_all_pages(url, || {
                SourceControlError::BranchNotFound(format!("{project_path}: {exclude}..{include}"))
            })
            .await?;

        Ok(commits.into_iter().map(|c| c.hash).collect())
    }

    pub async fn commit_pull_requests(
        &self,
        project_path: &str,
        hash: &str,
    ) -> std::result::Result<Vec<BitbucketPullRequest>, SourceControlError> {
        let url = self.repo_url(
            project_path,
            &format!("commit/{hash}/pullrequests"),
            &[("pagelen", PAGE_LEN)],
        )?;

        self.get_all_pages(url, || {
            SourceControlError::ProjectNotFound(project_path.to_owned())
        })
        .await
    }

    pub async fn branches(
        &self,
        project_path: &str,
        prefix: &str,
    ) -> std::result::Result<Vec<String>, SourceControlError> {
        let query = format!("name ~ \"{prefix}\"");
        let url = self.repo_url(
            project_path,
            "refs/branches",
            &[("q", &query), ("pagelen", PAGE_LEN)],
        )?;

        let branches: Vec<BranchRef> = self
            .get_all_pages(url, || {
                SourceControlError::ProjectNotFound(project_path.to_owned())
            })
            .await?;

        Ok(branches.into_iter().map(|b| b.name).collect())
    }
}

fn split_project_path(project_path: &str) -> std::result::Result<(&str, &str), SourceControlError> {
    match project_path.split('/').collect::<Vec<_>>().as_slice() {
        [workspace, repo] if !workspace.is_empty() && !repo.is_empty() => Ok((*workspace, *repo)),
        _ => Err(SourceControlError::ProjectNotFound(format!(
            "{project_path} (expected 'workspace/repo')"
        ))),
    }
}
