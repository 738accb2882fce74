use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Source-control platform a merge request was fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    GitLab,
    Bitbucket,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitLab => f.write_str("GitLab"),
            Self::Bitbucket => f.write_str("Bitbucket"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MergeState {
    #[default]
    Merged,
    Open,
    Closed,
}

impl MergeState {
    /// Maps a platform state string (GitLab `opened`/`merged`/`closed`/`locked`,
    /// Bitbucket `OPEN`/`MERGED`/`DECLINED`/`SUPERSEDED`) onto the shared states.
    pub fn from_platform(state: &str) -> Option<Self> {
        match state.to_ascii_lowercase().as_str() {
            "merged" => Some(Self::Merged),
            "opened" | "open" | "locked" => Some(Self::Open),
            "closed" | "declined" | "superseded" => Some(Self::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Platform login or account id
    pub id: String,
    /// Human-readable display name
    pub name: String,
}

/// A completed (or in-flight) code change, normalized across platforms.
///
/// Two merge requests are the same change when platform, project path and URL
/// agree; see [`MergeRequest::identity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub title: String,
    pub description: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    pub created_at: DateTime<Utc>,
    pub merged_at: Option<DateTime<Utc>>,
    pub state: MergeState,
    pub author: Author,
    pub url: String,
    pub platform: Platform,
    pub project_path: String,
}

impl MergeRequest {
    pub fn identity(&self) -> (Platform, &str, &str) {
        (self.platform, &self.project_path, &self.url)
    }

    /// Timestamp used for date-window checks: merge time, or creation time for
    /// changes that never merged.
    pub fn effective_time(&self) -> DateTime<Utc> {
        self.merged_at.unwrap_or(self.created_at)
    }
}

const GOVERNING_TYPES: [&str; 3] = ["user story", "feature", "epic"];

/// A tracked unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    pub title: String,
    pub work_item_type: String,
    pub state: String,
    pub url: String,
    /// Team or area name as reported by the tracker, before display mapping
    pub team: String,
    pub parent_id: Option<u64>,
}

impl WorkItem {
    /// True for User Story, Feature and Epic, ignoring case.
    pub fn is_user_story_or_above(&self) -> bool {
        let kind = self.work_item_type.trim();
        GOVERNING_TYPES.iter().any(|t| kind.eq_ignore_ascii_case(t))
    }
}

/// A work item paired with its governing ancestor (which may be itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedWorkItem {
    pub item: WorkItem,
    pub governing: WorkItem,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TeamMapping {
    pub original: String,
    pub display: String,
}

/// Lookup from tracker team names to report display names.
#[derive(Debug, Clone, Default)]
pub struct TeamDirectory {
    names: HashMap<String, String>,
}

impl TeamDirectory {
    pub fn new(mappings: &[TeamMapping]) -> Self {
        let names = mappings
            .iter()
            .map(|m| (m.original.clone(), m.display.clone()))
            .collect();
        Self { names }
    }

    /// Display name for `original`, or `original` itself when unmapped.
    pub fn display_name<'a>(&'a self, original: &'a str) -> &'a str {
        self.names.get(original).map_or(original, String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TeamSortRule {
    pub team: String,
    pub rank: u32,
}

#[derive(Debug, Clone, Default)]
pub struct TeamRanking {
    ranks: HashMap<String, u32>,
}

impl TeamRanking {
    pub fn new(rules: &[TeamSortRule]) -> Self {
        let ranks = rules.iter().map(|r| (r.team.clone(), r.rank)).collect();
        Self { ranks }
    }

    pub fn rank(&self, display_team: &str) -> Option<u32> {
        self.ranks.get(display_team).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserMapping {
    /// Author login/id as reported by the platform
    pub author: String,
    pub display_name: String,
}

/// Known authors. Merge requests by anyone else are dropped by the user filter.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<UserMapping>,
}

impl UserDirectory {
    pub fn new(users: Vec<UserMapping>) -> Self {
        Self { users }
    }

    pub fn lookup(&self, author: &Author) -> Option<&UserMapping> {
        self.users
            .iter()
            .find(|u| u.author == author.id || u.author.eq_ignore_ascii_case(&author.name))
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// One line of the consolidated release report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsolidatedRow {
    pub team: String,
    pub team_rank: Option<u32>,
    pub feature_id: u64,
    pub feature_title: String,
    pub feature_type: String,
    pub feature_state: String,
    pub feature_url: String,
    pub work_item_id: u64,
    pub work_item_title: String,
    pub work_item_type: String,
    pub merge_request_title: String,
    pub merge_request_url: String,
    pub author: String,
    pub project: String,
    pub platform: Platform,
    pub merged_at: Option<DateTime<Utc>>,
    pub source_branch: String,
    pub target_branch: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(kind: &str) -> WorkItem {
        WorkItem {
            id: 1,
            title: "t".into(),
            work_item_type: kind.into(),
            state: "Active".into(),
            url: String::new(),
            team: "Core".into(),
            parent_id: None,
        }
    }

    #[test]
    fn test_user_story_or_above_is_case_insensitive() {
        assert!(item("User Story").is_user_story_or_above());
        assert!(item("user story").is_user_story_or_above());
        assert!(item("EPIC").is_user_story_or_above());
        assert!(item("Feature").is_user_story_or_above());
        assert!(!item("Task").is_user_story_or_above());
        assert!(!item("Bug").is_user_story_or_above());
        assert!(!item("Story").is_user_story_or_above());
    }

    #[test]
    fn test_team_directory_defaults_to_identity() {
        let teams = TeamDirectory::new(&[TeamMapping {
            original: "Proj\\Payments".into(),
            display: "Payments".into(),
        }]);
        assert_eq!(teams.display_name("Proj\\Payments"), "Payments");
        assert_eq!(teams.display_name("Search"), "Search");
    }

    #[test]
    fn test_user_directory_matches_id_or_name() {
        let users = UserDirectory::new(vec![UserMapping {
            author: "jdoe".into(),
            display_name: "Jane Doe".into(),
        }]);
        let by_id = Author {
            id: "jdoe".into(),
            name: "Someone".into(),
        };
        let by_name = Author {
            id: "{uuid}".into(),
            name: "JDOE".into(),
        };
        let stranger = Author {
            id: "other".into(),
            name: "Other".into(),
        };
        assert!(users.lookup(&by_id).is_some());
        assert!(users.lookup(&by_name).is_some());
        assert!(users.lookup(&stranger).is_none());
    }

    #[test]
    fn test_merge_state_from_platform() {
        assert_eq!(MergeState::from_platform("MERGED"), Some(MergeState::Merged));
        assert_eq!(MergeState::from_platform("opened"), Some(MergeState::Open));
        assert_eq!(MergeState::from_platform("DECLINED"), Some(MergeState::Closed));
        assert_eq!(MergeState::from_platform("draft"), None);
    }
}
