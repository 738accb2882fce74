use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::fetch_request::FetchRequest;
use crate::models::{MergeState, Platform, TeamMapping, TeamSortRule, UserMapping};
use crate::pipeline::{NextRelease, ProjectSource, DEFAULT_TICKET_PATTERN};
use crate::providers::RetryPolicy;

const CANDIDATES: [&str; 4] = [
    "release-recon.toml",
    "release-recon.json",
    "release-recon.yaml",
    "release-recon.yml",
];

/// Configuration file structure for release-recon.
///
/// Describes the connections, the projects to reconcile and the lookup tables
/// used to annotate the consolidated report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub gitlab: GitLabConfig,

    #[serde(default)]
    pub bitbucket: BitbucketConfig,

    #[serde(default)]
    pub azure_devops: AzureDevOpsConfig,

    /// Projects to reconcile, in fetch order
    #[serde(default)]
    pub projects: Vec<ProjectConfig>,

    /// Authors whose changes are kept
    #[serde(default)]
    pub users: Vec<UserMapping>,

    /// Tracker team name to report team name
    #[serde(default)]
    pub teams: Vec<TeamMapping>,

    /// Report order of display team names
    #[serde(default)]
    pub team_order: Vec<TeamSortRule>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitLabConfig {
    /// GitLab personal access token
    pub token: Option<String>,

    /// GitLab instance base URL
    #[serde(default = "default_gitlab_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BitbucketConfig {
    /// Account name for app-password authentication; bearer auth when absent
    pub username: Option<String>,

    pub token: Option<String>,

    #[serde(default = "default_bitbucket_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AzureDevOpsConfig {
    /// Organization URL (e.g., <https://dev.azure.com/contoso>)
    pub organization_url: Option<String>,

    pub project: Option<String>,

    /// Personal access token
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProjectConfig {
    pub platform: Platform,

    /// Project path (GitLab `group/project`, Bitbucket `workspace/repo`)
    pub path: String,

    #[serde(flatten)]
    pub mode: FetchMode,
}

/// How a project's changes are selected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FetchMode {
    #[serde(rename_all = "kebab-case")]
    DateRange {
        target_branch: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[serde(default)]
        state: Option<MergeState>,
    },

    #[serde(rename_all = "kebab-case")]
    BranchDiff {
        source_branch: String,
        target_branch: String,
    },

    /// Diff `current-release` against the release that follows it.
    #[serde(rename_all = "kebab-case")]
    NextRelease {
        current_release: String,
        #[serde(default = "default_fallback_branch")]
        fallback_branch: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Cache directory; defaults to the platform cache directory
    pub directory: Option<PathBuf>,

    /// Prepended to every cache key
    #[serde(default = "default_cache_prefix")]
    pub prefix: String,

    /// Stage lifetime; stages never expire when absent
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Regex with one capture group for the work item id in a branch name
    #[serde(default = "default_ticket_pattern")]
    pub ticket_pattern: String,

    /// Ignore cached stages
    #[serde(default)]
    pub force_refresh: bool,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,

    /// Pretty-print JSON output
    #[serde(default)]
    pub pretty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Summary,
    Json,
    Csv,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            token: None,
            base_url: default_gitlab_base_url(),
        }
    }
}

impl Default for BitbucketConfig {
    fn default() -> Self {
        Self {
            username: None,
            token: None,
            base_url: default_bitbucket_base_url(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::File,
            directory: None,
            prefix: default_cache_prefix(),
            ttl_hours: default_ttl_hours(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ticket_pattern: default_ticket_pattern(),
            force_refresh: false,
            max_retries: default_max_retries(),
            retry_delay_seconds: default_retry_delay_seconds(),
        }
    }
}

fn default_gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn default_bitbucket_base_url() -> String {
    "https://api.bitbucket.org/2.0".to_string()
}

fn default_fallback_branch() -> String {
    "main".to_string()
}

fn default_cache_prefix() -> String {
    "release-recon:".to_string()
}

#[allow(clippy::unnecessary_wraps)]
fn default_ttl_hours() -> Option<u64> {
    Some(24)
}

fn default_ticket_pattern() -> String {
    DEFAULT_TICKET_PATTERN.to_string()
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_seconds() -> u64 {
    2
}

impl ProjectConfig {
    /// Validates the entry and turns it into a pipeline project.
    pub fn to_source(&self) -> crate::error::Result<ProjectSource> {
        let invalid = |e: crate::fetch_request::FetchRequestError| {
            crate::error::ReconError::Config(format!("{}: {e} ({})", self.path, e.code()))
        };

        match &self.mode {
            FetchMode::DateRange {
                target_branch,
                start,
                end,
                state,
            } => {
                let request = FetchRequest::date_range(
                    &self.path,
                    target_branch,
                    *start,
                    *end,
                    Some(state.unwrap_or_default()),
                )
                .map_err(invalid)?;
                Ok(ProjectSource::fixed(self.platform, request))
            }
            FetchMode::BranchDiff {
                source_branch,
                target_branch,
            } => {
                let request = FetchRequest::branch_diff(&self.path, source_branch, target_branch)
                    .map_err(invalid)?;
                Ok(ProjectSource::fixed(self.platform, request))
            }
            FetchMode::NextRelease {
                current_release,
                fallback_branch,
            } => {
                let next = NextRelease::new(&self.path, current_release, fallback_branch)?;
                Ok(ProjectSource::next_release(self.platform, next))
            }
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_hours.map(|hours| Duration::from_secs(hours * 3600))
    }
}

impl PipelineConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            delay: Duration::from_secs(self.retry_delay_seconds),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./release-recon.toml
    /// 3. ./release-recon.json
    /// 4. ./release-recon.yaml
    /// 5. ./release-recon.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::discover(Path::new(".")),
        }
    }

    /// First candidate file found in `dir`, or defaults.
    fn discover(dir: &Path) -> Result<Self> {
        for candidate in CANDIDATES {
            let path = dir.join(candidate);
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }

    /// Every configured project as a validated pipeline project.
    pub fn project_sources(&self) -> Result<Vec<ProjectSource>> {
        if self.projects.is_empty() {
            anyhow::bail!("No projects configured; add at least one [[projects]] entry");
        }

        self.projects
            .iter()
            .map(|p| {
                p.to_source()
                    .with_context(|| format!("Invalid project entry '{}'", p.path))
            })
            .collect()
    }
}
