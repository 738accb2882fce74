use thiserror::Error;

/// Failures reported by a source-control gateway.
///
/// Every platform collapses its HTTP and decoding failures onto this taxonomy so
/// the pipeline can reason about them without knowing which platform produced them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceControlError {
    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),
}

impl SourceControlError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BranchNotFound(_) => "SourceControl.BranchNotFound",
            Self::ApiError(_) => "SourceControl.ApiError",
            Self::Unauthorized(_) => "SourceControl.Unauthorized",
            Self::RateLimitExceeded(_) => "SourceControl.RateLimitExceeded",
            Self::NetworkError(_) => "SourceControl.NetworkError",
            Self::InvalidResponse(_) => "SourceControl.InvalidResponse",
            Self::ProjectNotFound(_) => "SourceControl.ProjectNotFound",
        }
    }
}

/// Failures reported by the work-tracking client.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AzureDevOpsError {
    #[error("Work item {0} not found")]
    WorkItemNotFound(u64),

    #[error("Azure DevOps request failed: {0}")]
    ApiError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl AzureDevOpsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkItemNotFound(_) => "AzureDevOps.WorkItemNotFound",
            Self::ApiError(_) => "AzureDevOps.ApiError",
            Self::Unauthorized(_) => "AzureDevOps.Unauthorized",
        }
    }
}

/// Failures of the governing-ancestor walk.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("Work item {id} has no User Story, Feature or Epic above it")]
    NoGoverningAncestor { id: u64 },

    #[error("Hierarchy above work item {id} exceeds {depth} levels (possible cycle: {trail:?})")]
    MaxDepthExceeded {
        id: u64,
        depth: usize,
        trail: Vec<u64>,
    },

    #[error(transparent)]
    Fetch(#[from] AzureDevOpsError),
}

impl HierarchyError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoGoverningAncestor { .. } => "Hierarchy.NoGoverningAncestor",
            Self::MaxDepthExceeded { .. } => "Hierarchy.MaxDepthExceeded",
            Self::Fetch(e) => e.code(),
        }
    }
}

/// Errors that abort a reconciliation run.
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("{project}: {source}")]
    SourceControl {
        project: String,
        #[source]
        source: SourceControlError,
    },

    #[error(transparent)]
    WorkTracking(#[from] AzureDevOpsError),

    #[error("Cache write failed for stage '{0}'")]
    CacheWrite(String),

    #[error("Cache unavailable: {0}")]
    Cache(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ReconError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::SourceControl { source, .. } => source.code(),
            Self::WorkTracking(e) => e.code(),
            Self::CacheWrite(_) => "Cache.WriteFailed",
            Self::Cache(_) => "Cache.Unavailable",
            Self::Io(_) => "IO.Failed",
            Self::Config(_) => "Config.Invalid",
            Self::Cancelled => "Pipeline.Cancelled",
            Self::Json(_) => "Serialization.Json",
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconError>;
