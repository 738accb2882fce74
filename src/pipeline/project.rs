use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{ReconError, Result};
use crate::fetch_request::FetchRequest;
use crate::models::{Platform, TeamMapping, TeamSortRule, UserMapping};
use crate::release_branch;

/// Diff the configured release against whichever release follows it.
///
/// The source branch is only known once the project's branches are listed:
/// it is the next newer release, or `fallback_branch` when `current_release`
/// is the newest one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct NextRelease {
    pub project_id: String,
    pub current_release: String,
    pub fallback_branch: String,
}

impl NextRelease {
    /// # Errors
    ///
    /// Returns [`ReconError::Config`] if a field is blank or `current_release`
    /// is not a `release/yyyyMMdd` branch.
    pub fn new(project_id: &str, current_release: &str, fallback_branch: &str) -> Result<Self> {
        let (project_id, current_release, fallback_branch) =
            (project_id.trim(), current_release.trim(), fallback_branch.trim());

        if project_id.is_empty() || fallback_branch.is_empty() {
            return Err(ReconError::Config(
                "next-release projects need a project id and a fallback branch".into(),
            ));
        }
        if release_branch::parse_date(current_release).is_none() {
            return Err(ReconError::Config(format!(
                "'{current_release}' is not a release/yyyyMMdd branch"
            )));
        }

        Ok(Self {
            project_id: project_id.to_owned(),
            current_release: current_release.to_owned(),
            fallback_branch: fallback_branch.to_owned(),
        })
    }

    /// Turns the listed branches into a concrete branch diff.
    ///
    /// # Errors
    ///
    /// Returns [`ReconError::Config`] when the fallback branch is the current release.
    pub fn plan<S: AsRef<str>>(&self, branches: &[S]) -> Result<FetchRequest> {
        let source = release_branch::find_next_newer(&self.current_release, branches)
            .unwrap_or_else(|| self.fallback_branch.clone());

        FetchRequest::branch_diff(&self.project_id, &source, &self.current_release)
            .map_err(|e| ReconError::Config(format!("{}: {e}", self.project_id)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChangeSelection {
    Fixed(FetchRequest),
    NextRelease(NextRelease),
}

/// One project to reconcile and how its changes are selected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectSource {
    pub platform: Platform,
    pub selection: ChangeSelection,
}

impl ProjectSource {
    pub fn fixed(platform: Platform, request: FetchRequest) -> Self {
        Self {
            platform,
            selection: ChangeSelection::Fixed(request),
        }
    }

    pub fn next_release(platform: Platform, next: NextRelease) -> Self {
        Self {
            platform,
            selection: ChangeSelection::NextRelease(next),
        }
    }

    pub fn project_id(&self) -> &str {
        match &self.selection {
            ChangeSelection::Fixed(request) => request.project_id(),
            ChangeSelection::NextRelease(next) => &next.project_id,
        }
    }
}

/// Everything a cached stage depends on.
///
/// Changing any of it must land the run in a different dataset, or earlier
/// stages would be replayed under the old settings.
#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatasetScope<'a> {
    pub projects: &'a [ProjectSource],
    pub users: &'a [UserMapping],
    pub teams: &'a [TeamMapping],
    pub team_order: &'a [TeamSortRule],
    pub ticket_pattern: &'a str,
}

/// Stable 16-hex-digit key for a dataset scope.
///
/// Two runs with the same projects and settings share cached stages.
///
/// # Errors
///
/// Returns [`ReconError::Json`] if the scope cannot be serialized.
pub fn dataset_key(scope: &DatasetScope<'_>) -> Result<String> {
    let canonical = serde_json::to_vec(scope)?;
    let digest = Sha256::digest(&canonical);
    let mut key = hex::encode(digest);
    key.truncate(16);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn gitlab_range(project: &str) -> ProjectSource {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap();
        ProjectSource::fixed(
            Platform::GitLab,
            FetchRequest::date_range(project, "main", start, end, None).unwrap(),
        )
    }

    fn scope<'a>(projects: &'a [ProjectSource]) -> DatasetScope<'a> {
        DatasetScope {
            projects,
            users: &[],
            teams: &[],
            team_order: &[],
            ticket_pattern: r"VSTS(\d+)",
        }
    }

    #[test]
    fn test_dataset_key_is_stable_and_distinct() {
        let app = [gitlab_range("group/app")];
        let other = [gitlab_range("group/other")];
        let a = dataset_key(&scope(&app)).unwrap();
        let again = dataset_key(&scope(&app)).unwrap();
        let b = dataset_key(&scope(&other)).unwrap();

        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a, again);
        assert_ne!(a, b);
    }

    #[test]
    fn test_dataset_key_follows_settings() {
        let projects = [gitlab_range("group/app")];
        let users = [UserMapping {
            author: "jdoe".to_string(),
            display_name: "Jane Doe".to_string(),
        }];
        let teams = [TeamMapping {
            original: "Shop\\Payments".to_string(),
            display: "Payments".to_string(),
        }];
        let team_order = [TeamSortRule {
            team: "Payments".to_string(),
            rank: 1,
        }];
        let base = dataset_key(&scope(&projects)).unwrap();

        let variants = [
            DatasetScope { users: &users, ..scope(&projects) },
            DatasetScope { teams: &teams, ..scope(&projects) },
            DatasetScope { team_order: &team_order, ..scope(&projects) },
            DatasetScope { ticket_pattern: r"JIRA-(\d+)", ..scope(&projects) },
        ];

        for variant in &variants {
            assert_ne!(dataset_key(variant).unwrap(), base, "{variant:?}");
        }
    }

    #[test]
    fn test_next_release_picks_following_release() {
        let next = NextRelease::new("group/app", "release/20240115", "main").unwrap();
        let branches = [
            "release/20240101",
            "release/20240115",
            "release/20240201",
            "release/20240301",
            "main",
        ];

        let request = next.plan(&branches).unwrap();

        assert_eq!(
            request,
            FetchRequest::branch_diff("group/app", "release/20240201", "release/20240115").unwrap()
        );
    }

    #[test]
    fn test_latest_release_falls_back_to_configured_branch() {
        let next = NextRelease::new("group/app", "release/20240301", "main").unwrap();

        let request = next
            .plan(&["release/20240201", "release/20240301"])
            .unwrap();

        assert_eq!(
            request,
            FetchRequest::branch_diff("group/app", "main", "release/20240301").unwrap()
        );
    }

    #[test]
    fn test_next_release_requires_release_branch() {
        let err = NextRelease::new("group/app", "main", "develop").unwrap_err();
        assert_eq!(err.code(), "Config.Invalid");

        let err = NextRelease::new("group/app", "release/20240230", "main").unwrap_err();
        assert_eq!(err.code(), "Config.Invalid");

        let err = NextRelease::new(" ", "release/20240101", "main").unwrap_err();
        assert_eq!(err.code(), "Config.Invalid");
    }
}
