use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info};

use crate::auth::Token;
use crate::error::{Result, SourceControlError};
use crate::models::{MergeRequest, MergeState, Platform};
use crate::providers::http::RetryPolicy;
use crate::providers::SourceControlGateway;

use super::client::BitbucketClient;
use super::types::BitbucketPullRequest;

/// Bitbucket Cloud pull-request gateway.
///
/// Bitbucket has no compare endpoint that lists pull requests, so branch diffs
/// are built from `commits?include=&exclude=` plus a per-commit pull request lookup.
pub struct BitbucketProvider {
    client: BitbucketClient,
}

impl BitbucketProvider {
    /// Creates a Bitbucket gateway.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        username: Option<String>,
        token: Option<Token>,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = BitbucketClient::new(base_url, username, token, retry)?;
        Ok(Self { client })
    }

    fn convert(project_path: &str, nodes: Vec<BitbucketPullRequest>) -> Vec<MergeRequest> {
        nodes
            .into_iter()
            .filter_map(|node| node.into_merge_request(project_path))
            .collect()
    }
}

#[async_trait]
impl SourceControlGateway for BitbucketProvider {
    fn platform(&self) -> Platform {
        Platform::Bitbucket
    }

    async fn fetch_by_date_range(
        &self,
        project_path: &str,
        target_branch: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> std::result::Result<Vec<MergeRequest>, SourceControlError> {
        info!("Fetching Bitbucket pull requests for {project_path} into {target_branch}...");

        let nodes = self
            .client
            .merged_pull_requests(project_path, target_branch, start)
            .await?;

        Ok(Self::convert(project_path, nodes)
            .into_iter()
            .filter(|mr| mr.target_branch == target_branch)
            .filter(|mr| (start..=end).contains(&mr.effective_time()))
            .collect())
    }

    async fn fetch_by_branch_diff(
        &self,
        project_path: &str,
        source_branch: &str,
        target_branch: &str,
    ) -> std::result::Result<Vec<MergeRequest>, SourceControlError> {
        info!("Collecting commits in {source_branch} not in {target_branch} for {project_path}...");

        let commits = self
            .client
            .commits_between(project_path, source_branch, target_branch)
            .await?;

        debug!("{} commits to resolve into pull requests", commits.len());

        let mut unique: IndexMap<String, MergeRequest> = IndexMap::new();
        for hash in &commits {
            let nodes = self.client.commit_pull_requests(project_path, hash).await?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Matcher;

    fn pr_json(title: &str, state: &str, updated_on: &str, href: &str) -> serde_json::Value {
        serde_json::json!({
            "id": 12,
            "title": title,
            "description": "Adds things",
            "state": state,
            "created_on": "2024-01-02T09:00:00+00:00",
            "updated_on": updated_on,
            "source": { "branch": { "name": "VSTS200-b" } },
            "destination": { "branch": { "name": "main" } },
            "author": { "display_name": "Sam Lee", "nickname": "slee", "uuid": "{1234}" },
            "links": { "html": { "href": href } }
        })
    }

    fn provider(server: &mockito::ServerGuard) -> BitbucketProvider {
        BitbucketProvider::new(
            &format!("{}/2.0", server.url()),
            Some("bot".to_string()),
            Some(Token::from("app-password")),
            RetryPolicy::none(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_date_range_follows_next_links() {
        let mut server = mockito::Server::new_async().await;
        let page_one = serde_json::json!({
            "values": [pr_json("first", "MERGED", "2024-01-03T00:00:00+00:00", "https://bb/pr/1")],
            "next": format!("{}/2.0/repositories/acme/api/pullrequests?page=2", server.url())
        });
        let page_two = serde_json::json!({
            "values": [
                pr_json("second", "MERGED", "2024-01-04T00:00:00+00:00", "https://bb/pr/2"),
                pr_json("outside", "MERGED", "2024-02-04T00:00:00+00:00", "https://bb/pr/3")
            ]
        });
        server
            .mock("GET", "/2.0/repositories/acme/api/pullrequests")
            .match_query(Matcher::UrlEncoded("state".into(), "MERGED".into()))
            .match_header("authorization", Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_body(page_one.to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/2.0/repositories/acme/api/pullrequests")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(page_two.to_string())
            .create_async()
            .await;

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap();
        let merge_requests = provider(&server)
            .fetch_by_date_range("acme/api", "main", start, end)
            .await
            .unwrap();

        let titles: Vec<_> = merge_requests.iter().map(|m| m.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second"]);
        assert_eq!(merge_requests[0].platform, Platform::Bitbucket);
        assert_eq!(merge_requests[0].author.id, "slee");
        assert_eq!(merge_requests[0].source_branch, "VSTS200-b");
        assert_eq!(
            merge_requests[0].merged_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_branch_diff_synthesized_from_commits() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/2.0/repositories/acme/api/commits")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("include".into(), "release/20240201".into()),
                Matcher::UrlEncoded("exclude".into(), "release/20240115".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"values":[{"hash":"c1"},{"hash":"c2"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/2.0/repositories/acme/api/commit/c1/pullrequests")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "values": [
                        pr_json("merged", "MERGED", "2024-01-20T00:00:00+00:00", "https://bb/pr/7"),
                        pr_json("declined", "DECLINED", "2024-01-20T00:00:00+00:00", "https://bb/pr/8")
                    ]
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/2.0/repositories/acme/api/commit/c2/pullrequests")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                serde_json::json!({
                    "values": [pr_json("merged", "MERGED", "2024-01-20T00:00:00+00:00", "https://bb/pr/7")]
                })
                .to_string(),
            )
            .create_async()
            .await;

        let merge_requests = provider(&server)
            .fetch_by_branch_diff("acme/api", "release/20240201", "release/20240115")
            .await
            .unwrap();

        assert_eq!(merge_requests.len(), 1);
        assert_eq!(merge_requests[0].url, "https://bb/pr/7");
    }

    #[tokio::test]
    async fn test_unknown_branch_in_diff() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/2.0/repositories/acme/api/commits")
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let err = provider(&server)
            .fetch_by_branch_diff("acme/api", "release/20990101", "main")
            .await
            .unwrap_err();

        assert_eq!(err.code(), "SourceControl.BranchNotFound");
    }

    #[tokio::test]
    async fn test_malformed_project_path() {
        let server = mockito::Server::new_async().await;

        let err = provider(&server).list_branches("no-slash").await.unwrap_err();

        assert_eq!(err.code(), "SourceControl.ProjectNotFound");
    }

    #[tokio::test]
    async fn test_server_error_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/2.0/repositories/acme/api/refs/branches")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("down")
            .create_async()
            .await;

        let err = provider(&server).list_branches("acme/api").await.unwrap_err();

        assert_eq!(err, SourceControlError::ApiError("HTTP 503: down".into()));
    }
}
