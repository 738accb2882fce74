use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::store::CacheStore;

/// Named intermediate artifacts of a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RawPullRequests,
    FilteredPullRequests,
    ReleaseBranches,
    WorkItems,
    ResolvedWorkItems,
    Consolidated,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::RawPullRequests,
        Stage::FilteredPullRequests,
        Stage::ReleaseBranches,
        Stage::WorkItems,
        Stage::ResolvedWorkItems,
        Stage::Consolidated,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::RawPullRequests => "raw_pull_requests",
            Stage::FilteredPullRequests => "filtered_pull_requests",
            Stage::ReleaseBranches => "release_branches",
            Stage::WorkItems => "work_items",
            Stage::ResolvedWorkItems => "user_story_work_items",
            Stage::Consolidated => "consolidated",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One JSON payload per `(dataset, stage)`, stored under
/// `{prefix}{dataset}:{stage}` in the underlying [`CacheStore`].
///
/// Writes replace whatever was there; there is no versioning.
#[derive(Clone)]
pub struct StagedCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    default_ttl: Option<Duration>,
}

impl StagedCache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>, default_ttl: Option<Duration>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            default_ttl,
        }
    }

    fn key(&self, dataset: &str, stage: Stage) -> String {
        format!("{}{dataset}:{}", self.prefix, stage.name())
    }

    /// Best-effort write; a `false` return has already been logged.
    pub async fn write_stage(
        &self,
        dataset: &str,
        stage: Stage,
        payload: &str,
        ttl: Option<Duration>,
    ) -> bool {
        let written = self
            .store
            .set(&self.key(dataset, stage), payload, ttl.or(self.default_ttl))
            .await;
        if !written {
            warn!("Failed to cache stage {stage} for dataset {dataset}");
        }
        written
    }

    pub async fn read_stage(&self, dataset: &str, stage: Stage) -> Option<String> {
        self.store.get(&self.key(dataset, stage)).await
    }

    pub async fn has_stage(&self, dataset: &str, stage: Stage) -> bool {
        self.store.exists(&self.key(dataset, stage)).await
    }

    /// Serializes `value` and writes it with the default TTL.
    pub async fn store<T: Serialize>(&self, dataset: &str, stage: Stage, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(payload) => self.write_stage(dataset, stage, &payload, None).await,
            Err(e) => {
                warn!("Failed to serialize stage {stage}: {e}");
                false
            }
        }
    }

    /// Reads and decodes a stage. A payload that no longer decodes is treated as absent.
    pub async fn load<T: DeserializeOwned>(&self, dataset: &str, stage: Stage) -> Option<T> {
        let payload = self.read_stage(dataset, stage).await?;
        match serde_json::from_str(&payload) {
            Ok(value) => {
                debug!("Cache hit for {stage} ({dataset})");
                Some(value)
            }
            Err(e) => {
                warn!("Ignoring unreadable cached stage {stage}: {e}");
                None
            }
        }
    }

    /// Deletes every stage of `dataset`; returns how many existed.
    pub async fn clear(&self, dataset: &str) -> usize {
        let mut removed = 0;
        for stage in Stage::ALL {
            if self.store.delete(&self.key(dataset, stage)).await {
                removed += 1;
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn cache() -> (Arc<MemoryStore>, StagedCache) {
        let store = Arc::new(MemoryStore::new());
        let staged = StagedCache::new(store.clone(), "recon:", None);
        (store, staged)
    }

    #[tokio::test]
    async fn test_key_is_prefix_concatenated_without_separator() {
        let (store, staged) = cache();

        assert!(staged.write_stage("abc123", Stage::WorkItems, "[]", None).await);

        assert!(store.exists("recon:abc123:work_items").await);
    }

    #[tokio::test]
    async fn test_round_trip_and_has_stage() {
        let (_, staged) = cache();
        assert!(!staged.has_stage("d1", Stage::RawPullRequests).await);

        assert!(staged.store("d1", Stage::RawPullRequests, &vec![1, 2, 3]).await);

        assert!(staged.has_stage("d1", Stage::RawPullRequests).await);
        assert!(!staged.has_stage("d2", Stage::RawPullRequests).await);
        let loaded: Vec<i32> = staged.load("d1", Stage::RawPullRequests).await.unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_content() {
        let (_, staged) = cache();
        staged.write_stage("d", Stage::Consolidated, "\"old\"", None).await;
        staged.write_stage("d", Stage::Consolidated, "\"new\"", None).await;

        assert_eq!(
            staged.read_stage("d", Stage::Consolidated).await.as_deref(),
            Some("\"new\"")
        );
    }

    #[tokio::test]
    async fn test_undecodable_payload_loads_as_none() {
        let (_, staged) = cache();
        staged.write_stage("d", Stage::WorkItems, "{not json", None).await;

        let loaded: Option<Vec<u64>> = staged.load("d", Stage::WorkItems).await;

        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_clear_removes_all_stages_of_dataset() {
        let (_, staged) = cache();
        staged.write_stage("d", Stage::WorkItems, "[]", None).await;
        staged.write_stage("d", Stage::Consolidated, "[]", None).await;
        staged.write_stage("other", Stage::WorkItems, "[]", None).await;

        assert_eq!(staged.clear("d").await, 2);

        assert!(!staged.has_stage("d", Stage::WorkItems).await);
        assert!(staged.has_stage("other", Stage::WorkItems).await);
    }

    #[test]
    fn test_stage_names() {
        let names: Vec<_> = Stage::ALL.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "raw_pull_requests",
                "filtered_pull_requests",
                "release_branches",
                "work_items",
                "user_story_work_items",
                "consolidated"
            ]
        );
    }
}
