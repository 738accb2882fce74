//! Staged reconciliation of merged changes against work items.
//!
//! ```text
//! FetchChanges -> FilterByUser -> FetchWorkItems -> ResolveHierarchy -> Consolidate
//! ```
//!
//! Each stage stores its artifact in the [`StagedCache`] under the run's dataset
//! key. A later run reuses a stored artifact instead of recomputing it unless
//! force refresh is on.

mod consolidate;
mod project;
mod ticket;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::cache::{Stage, StagedCache};
use crate::error::{AzureDevOpsError, ReconError, Result};
use crate::hierarchy::resolve_governing_ancestor;
use crate::models::{
    ConsolidatedRow, MergeRequest, Platform, ResolvedWorkItem, TeamDirectory, TeamRanking,
    UserDirectory, WorkItem,
};
use crate::output::StageSpinner;
use crate::providers::{GatewayRegistry, SourceControlGateway, WorkItemSource};
use crate::release_branch;

pub use consolidate::{consolidate, ChangeLink, Directories};
pub use project::{dataset_key, ChangeSelection, DatasetScope, NextRelease, ProjectSource};
pub use ticket::{TicketExtractor, DEFAULT_TICKET_PATTERN};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Cached,
    Computed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    pub outcome: StageOutcome,
    pub count: usize,
}

/// Something a stage left out of its artifact, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedItem {
    pub stage: Stage,
    pub subject: String,
    pub code: String,
    pub reason: String,
}

impl SkippedItem {
    fn new(stage: Stage, subject: impl Into<String>, code: &str, reason: impl Into<String>) -> Self {
        Self {
            stage,
            subject: subject.into(),
            code: code.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Stored artifact of a stage that may drop inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Batch<T> {
    items: Vec<T>,
    skipped: Vec<SkippedItem>,
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkItemBatch {
    work_items: Vec<WorkItem>,
    links: Vec<ChangeLink>,
    skipped: Vec<SkippedItem>,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub dataset: String,
    pub stages: Vec<StageReport>,
    pub rows: Vec<ConsolidatedRow>,
    pub skipped: Vec<SkippedItem>,
}

impl RunReport {
    fn new(dataset: &str) -> Self {
        Self {
            dataset: dataset.to_owned(),
            stages: Vec::new(),
            rows: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, outcome: StageOutcome, count: usize) {
        self.stages.push(StageReport {
            stage,
            outcome,
            count,
        });
    }

    pub fn outcome(&self, stage: Stage) -> Option<StageOutcome> {
        self.stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.outcome)
    }
}

/// Lookup tables and switches for a pipeline.
#[derive(Debug, Clone, Default)]
pub struct PipelineSettings {
    pub users: UserDirectory,
    pub teams: TeamDirectory,
    pub ranking: TeamRanking,
    pub tickets: TicketExtractor,
    pub force_refresh: bool,
    pub show_progress: bool,
}

pub struct ReconciliationPipeline {
    gateways: GatewayRegistry,
    work_items: Arc<dyn WorkItemSource>,
    cache: StagedCache,
    settings: PipelineSettings,
}

impl ReconciliationPipeline {
    pub fn new(
        gateways: GatewayRegistry,
        work_items: Arc<dyn WorkItemSource>,
        cache: StagedCache,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            gateways,
            work_items,
            cache,
            settings,
        }
    }

    /// Runs every stage for `projects` under `dataset`.
    ///
    /// # Errors
    ///
    /// - [`ReconError::SourceControl`] when any project fails to fetch
    /// - [`ReconError::WorkTracking`] when the tracker rejects the credentials
    /// - [`ReconError::CacheWrite`] when the consolidated rows cannot be stored
    /// - [`ReconError::Cancelled`] when `cancel` fires; the current stage is not written
    pub async fn run(
        &self,
        dataset: &str,
        projects: &[ProjectSource],
        cancel: &CancellationToken,
    ) -> Result<RunReport> {
        info!(
            "Reconciling dataset {dataset} ({} projects, force refresh: {})",
            projects.len(),
            self.settings.force_refresh
        );
        ensure_running(cancel)?;
        StageSpinner::header(self.settings.show_progress);

        let mut report = RunReport::new(dataset);

        // FetchChanges
        let spinner = self.spinner("Fetching merged changes");
        let (raw, outcome) = match self
            .reuse::<Vec<MergeRequest>>(dataset, Stage::RawPullRequests)
            .await
        {
            Some(raw) => (raw, StageOutcome::Cached),
            None => {
                let branches = match self.release_branches(dataset, projects, cancel).await {
                    Ok(branches) => branches,
                    Err(e) => return Err(fail(spinner, e)),
                };
                if let Some((branches, outcome)) = &branches {
                    report.record(Stage::ReleaseBranches, *outcome, branches.len());
                }
                let branches = branches.map(|(b, _)| b).unwrap_or_default();

                let raw = match self.fetch_changes(projects, &branches, cancel).await {
                    Ok(raw) => raw,
                    Err(e) => return Err(fail(spinner, e)),
                };
                self.cache.store(dataset, Stage::RawPullRequests, &raw).await;
                (raw, StageOutcome::Computed)
            }
        };
        finish(spinner, outcome, raw.len(), "merge requests");
        report.record(Stage::RawPullRequests, outcome, raw.len());

        // FilterByUser
        ensure_running(cancel)?;
        let spinner = self.spinner("Filtering by author");
        let (filtered, outcome) = match self
            .reuse::<Batch<MergeRequest>>(dataset, Stage::FilteredPullRequests)
            .await
        {
            Some(filtered) => (filtered, StageOutcome::Cached),
            None => {
                let filtered = self.filter_by_user(raw);
                self.cache
                    .store(dataset, Stage::FilteredPullRequests, &filtered)
                    .await;
                (filtered, StageOutcome::Computed)
            }
        };
        finish(spinner, outcome, filtered.items.len(), "merge requests kept");
        report.record(Stage::FilteredPullRequests, outcome, filtered.items.len());

        // FetchWorkItems
        ensure_running(cancel)?;
        let spinner = self.spinner("Fetching work items");
        let (work, outcome) = match self
            .reuse::<WorkItemBatch>(dataset, Stage::WorkItems)
            .await
        {
            Some(work) => (work, StageOutcome::Cached),
            None => {
                let work = match self.fetch_work_items(&filtered.items, cancel).await {
                    Ok(work) => work,
                    Err(e) => return Err(fail(spinner, e)),
                };
                self.cache.store(dataset, Stage::WorkItems, &work).await;
                (work, StageOutcome::Computed)
            }
        };
        finish(spinner, outcome, work.work_items.len(), "work items");
        report.record(Stage::WorkItems, outcome, work.work_items.len());

        // ResolveHierarchy
        ensure_running(cancel)?;
        let spinner = self.spinner("Resolving governing work items");
        let (resolved, outcome) = match self
            .reuse::<Batch<ResolvedWorkItem>>(dataset, Stage::ResolvedWorkItems)
            .await
        {
            Some(resolved) => (resolved, StageOutcome::Cached),
            None => {
                let resolved = match self.resolve_hierarchy(&work.work_items, cancel).await {
                    Ok(resolved) => resolved,
                    Err(e) => return Err(fail(spinner, e)),
                };
                self.cache
                    .store(dataset, Stage::ResolvedWorkItems, &resolved)
                    .await;
                (resolved, StageOutcome::Computed)
            }
        };
        finish(spinner, outcome, resolved.items.len(), "resolved");
        report.record(Stage::ResolvedWorkItems, outcome, resolved.items.len());

        // Consolidate
        ensure_running(cancel)?;
        let spinner = self.spinner("Consolidating");
        let (rows, outcome) = match self
            .reuse::<Vec<ConsolidatedRow>>(dataset, Stage::Consolidated)
            .await
        {
            Some(rows) => (rows, StageOutcome::Cached),
            None => {
                let directories = Directories {
                    users: &self.settings.users,
                    teams: &self.settings.teams,
                    ranking: &self.settings.ranking,
                };
                let rows = consolidate(&work.links, &resolved.items, &directories);
                if !self.cache.store(dataset, Stage::Consolidated, &rows).await {
                    return Err(fail(
                        spinner,
                        ReconError::CacheWrite(Stage::Consolidated.to_string()),
                    ));
                }
                (rows, StageOutcome::Computed)
            }
        };
        finish(spinner, outcome, rows.len(), "rows");
        report.record(Stage::Consolidated, outcome, rows.len());

        report.rows = rows;
        report.skipped = filtered
            .skipped
            .into_iter()
            .chain(work.skipped)
            .chain(resolved.skipped)
            .collect();

        info!(
            "Dataset {dataset}: {} rows, {} skipped",
            report.rows.len(),
            report.skipped.len()
        );

        Ok(report)
    }

    /// Lists release branches (newest first) for every project in `next-release` mode.
    ///
    /// Returns `None` when no project needs them.
    async fn release_branches(
        &self,
        dataset: &str,
        projects: &[ProjectSource],
        cancel: &CancellationToken,
    ) -> Result<Option<(BTreeMap<String, Vec<String>>, StageOutcome)>> {
        let pending: Vec<(Platform, &NextRelease)> = projects
            .iter()
            .filter_map(|p| match &p.selection {
                ChangeSelection::NextRelease(next) => Some((p.platform, next)),
                ChangeSelection::Fixed(_) => None,
            })
            .collect();

        if pending.is_empty() {
            return Ok(None);
        }

        if let Some(cached) = self.reuse(dataset, Stage::ReleaseBranches).await {
            return Ok(Some((cached, StageOutcome::Cached)));
        }

        let mut branches = BTreeMap::new();
        for (platform, next) in pending {
            ensure_running(cancel)?;
            let gateway = self.gateway(platform)?;
            let names = until_cancelled(cancel, gateway.list_branches(&next.project_id))
                .await?
                .map_err(|source| ReconError::SourceControl {
                    project: next.project_id.clone(),
                    source,
                })?;
            let releases = release_branch::sort_descending(&names);
            debug!("{}: {} release branches", next.project_id, releases.len());
            branches.insert(branch_key(platform, &next.project_id), releases);
        }

        self.cache
            .store(dataset, Stage::ReleaseBranches, &branches)
            .await;
        Ok(Some((branches, StageOutcome::Computed)))
    }

    async fn fetch_changes(
        &self,
        projects: &[ProjectSource],
        branches: &BTreeMap<String, Vec<String>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<MergeRequest>> {
        let mut unique: IndexMap<(Platform, String, String), MergeRequest> = IndexMap::new();

        for project in projects {
            ensure_running(cancel)?;
            let gateway = self.gateway(project.platform)?;

            let request = match &project.selection {
                ChangeSelection::Fixed(request) => request.clone(),
                ChangeSelection::NextRelease(next) => {
                    let listed = branches
                        .get(&branch_key(project.platform, &next.project_id))
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    next.plan(listed)?
                }
            };

            info!("{} {}", project.platform, request.describe());
            let fetched = until_cancelled(cancel, gateway.fetch(&request))
                .await?
                .map_err(|source| ReconError::SourceControl {
                    project: request.project_id().to_owned(),
                    source,
                })?;
            debug!("{} merge requests from {}", fetched.len(), request.project_id());

            for mr in fetched {
                let (platform, project_path, url) = mr.identity();
                let key = (platform, project_path.to_owned(), url.to_owned());
                unique.entry(key).or_insert(mr);
            }
        }

        Ok(unique.into_values().collect())
    }

    fn filter_by_user(&self, merge_requests: Vec<MergeRequest>) -> Batch<MergeRequest> {
        let mut batch = Batch::default();

        for mr in merge_requests {
            if self.settings.users.lookup(&mr.author).is_some() {
                batch.items.push(mr);
            } else {
                debug!("Dropping {} by unmapped author {}", mr.url, mr.author.id);
                batch.skipped.push(SkippedItem::new(
                    Stage::FilteredPullRequests,
                    mr.url,
                    "Filter.UnmappedAuthor",
                    format!("Author '{}' ({}) is not mapped", mr.author.name, mr.author.id),
                ));
            }
        }

        batch
    }

    async fn fetch_work_items(
        &self,
        merge_requests: &[MergeRequest],
        cancel: &CancellationToken,
    ) -> Result<WorkItemBatch> {
        let mut batch = WorkItemBatch::default();

        for mr in merge_requests {
            match self.settings.tickets.extract(&mr.source_branch) {
                Some(work_item_id) => batch.links.push(ChangeLink {
                    work_item_id,
                    merge_request: mr.clone(),
                }),
                None => {
                    warn!("No work item id in branch '{}' ({})", mr.source_branch, mr.url);
                    batch.skipped.push(SkippedItem::new(
                        Stage::WorkItems,
                        mr.url.clone(),
                        "WorkItem.NoTicket",
                        format!("Branch '{}' names no work item", mr.source_branch),
                    ));
                }
            }
        }

        let ids: IndexSet<u64> = batch.links.iter().map(|l| l.work_item_id).collect();
        for id in ids {
            ensure_running(cancel)?;
            match until_cancelled(cancel, self.work_items.fetch_work_item(id)).await? {
                Ok(item) => batch.work_items.push(item),
                Err(e @ AzureDevOpsError::Unauthorized(_)) => return Err(e.into()),
                Err(e) => {
                    warn!("Skipping work item {id}: {e}");
                    batch.skipped.push(SkippedItem::new(
                        Stage::WorkItems,
                        format!("work item {id}"),
                        e.code(),
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(batch)
    }

    async fn resolve_hierarchy(
        &self,
        items: &[WorkItem],
        cancel: &CancellationToken,
    ) -> Result<Batch<ResolvedWorkItem>> {
        let mut batch = Batch::default();

        for item in items {
            ensure_running(cancel)?;
            let resolution = until_cancelled(
                cancel,
                resolve_governing_ancestor(item, self.work_items.as_ref()),
            )
            .await?;

            match resolution {
                Ok(governing) => batch.items.push(ResolvedWorkItem {
                    item: item.clone(),
                    governing,
                }),
                Err(e) => {
                    warn!("Could not resolve work item {}: {e}", item.id);
                    batch.skipped.push(SkippedItem::new(
                        Stage::ResolvedWorkItems,
                        format!("work item {}", item.id),
                        e.code(),
                        e.to_string(),
                    ));
                }
            }
        }

        Ok(batch)
    }

    fn gateway(&self, platform: Platform) -> Result<&Arc<dyn SourceControlGateway>> {
        self.gateways
            .get(platform)
            .ok_or_else(|| ReconError::Config(format!("No {platform} connection configured")))
    }

    /// The stored artifact for `stage`, unless force refresh is on or it is missing or unreadable.
    async fn reuse<T: DeserializeOwned>(&self, dataset: &str, stage: Stage) -> Option<T> {
        if self.settings.force_refresh || !self.cache.has_stage(dataset, stage).await {
            return None;
        }
        self.cache.load(dataset, stage).await
    }

    fn spinner(&self, label: &str) -> StageSpinner {
        StageSpinner::start(label, self.settings.show_progress)
    }
}

fn branch_key(platform: Platform, project_id: &str) -> String {
    format!("{platform}:{project_id}")
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ReconError::Cancelled);
    }
    Ok(())
}

/// Races `future` against cancellation.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(ReconError::Cancelled),
        output = future => Ok(output),
    }
}

fn finish(spinner: StageSpinner, outcome: StageOutcome, count: usize, noun: &str) {
    let origin = match outcome {
        StageOutcome::Cached => " (cached)",
        StageOutcome::Computed => "",
    };
    spinner.finish(&format!("{count} {noun}{origin}"));
}

fn fail(spinner: StageSpinner, error: ReconError) -> ReconError {
    spinner.fail(error.code());
    error
}
