use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::Token;
use crate::cache::{CacheStore, FileStore, MemoryStore, Stage, StagedCache};
use crate::config::{CacheBackend, Config, OutputFormat};
use crate::models::{Platform, TeamDirectory, TeamRanking, UserDirectory};
use crate::output;
use crate::pipeline::{
    dataset_key, ChangeSelection, DatasetScope, PipelineSettings, ProjectSource,
    ReconciliationPipeline, StageOutcome, TicketExtractor,
};
use crate::providers::{
    AzureDevOpsClient, BitbucketProvider, GatewayRegistry, GitLabProvider, SourceControlGateway,
};

#[derive(Parser)]
#[command(name = "release-recon")]
#[command(author, version, about = "Release Reconciliation Tool", long_about = None)]
pub struct Cli {
    /// Task to run
    #[arg(value_enum, ignore_case = true)]
    task: Task,

    /// Configuration file (defaults to ./release-recon.{toml,json,yaml,yml})
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cache dataset key; derived from the projects and mapping settings when omitted
    #[arg(short, long)]
    dataset: Option<String>,

    /// Recompute every stage instead of reusing cached ones
    #[arg(short, long, default_value_t = false)]
    force_refresh: bool,

    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, default_value_t = false)]
    pretty: bool,

    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true)]
    gitlab_token: Option<String>,

    #[arg(long, env = "BITBUCKET_TOKEN", hide_env_values = true)]
    bitbucket_token: Option<String>,

    #[arg(long, env = "AZURE_DEVOPS_TOKEN", hide_env_values = true)]
    azure_devops_token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Task {
    /// Run the reconciliation pipeline and report the consolidated rows
    Reconcile,
    /// List the release branches of every configured project
    Branches,
    /// Delete every cached stage of the dataset
    ClearCache,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let mut config = Config::load(self.config.as_deref())?;
        self.apply_overrides(&mut config);

        match self.task {
            Task::Reconcile => self.reconcile(&config).await,
            Task::Branches => self.branches(&config).await,
            Task::ClearCache => self.clear_cache(&config).await,
        }
    }

    /// Command-line values win over the configuration file.
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(token) = &self.gitlab_token {
            config.gitlab.token = Some(token.clone());
        }
        if let Some(token) = &self.bitbucket_token {
            config.bitbucket.token = Some(token.clone());
        }
        if let Some(token) = &self.azure_devops_token {
            config.azure_devops.token = Some(token.clone());
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
        config.output.pretty |= self.pretty;
        config.pipeline.force_refresh |= self.force_refresh;
    }

    async fn reconcile(&self, config: &Config) -> Result<()> {
        let projects = config.project_sources()?;
        let dataset = self.dataset(config, &projects)?;
        info!("Reconciling {} projects as dataset {dataset}", projects.len());

        let tickets = TicketExtractor::new(&config.pipeline.ticket_pattern)?;
        let settings = PipelineSettings {
            users: UserDirectory::new(config.users.clone()),
            teams: TeamDirectory::new(&config.teams),
            ranking: TeamRanking::new(&config.team_order),
            tickets,
            force_refresh: config.pipeline.force_refresh,
            show_progress: config.output.format == OutputFormat::Summary || self.output.is_some(),
        };
        if settings.users.is_empty() {
            warn!("No users configured; every merge request will be filtered out");
        }

        let pipeline = ReconciliationPipeline::new(
            build_gateways(config, &projects)?,
            Arc::new(build_tracker(config)?),
            build_cache(config)?,
            settings,
        );

        let cancel = cancel_on_interrupt();
        let report = pipeline.run(&dataset, &projects, &cancel).await?;
        if report.outcome(Stage::Consolidated) == Some(StageOutcome::Cached) {
            info!("Report served from cache; pass --force-refresh to fetch again");
        }

        if config.output.format == OutputFormat::Summary {
            output::print_summary(&report);
            return Ok(());
        }

        let mut buffer = Vec::new();
        output::export_rows(
            &report.rows,
            config.output.format,
            config.output.pretty,
            &mut buffer,
        )?;

        if let Some(output_path) = &self.output {
            std::fs::write(output_path, &buffer)
                .with_context(|| format!("Failed to write {}", output_path.display()))?;
            info!("Report written to: {}", output_path.display());
        } else {
            std::io::stdout().write_all(&buffer)?;
        }

        Ok(())
    }

    async fn branches(&self, config: &Config) -> Result<()> {
        let projects = config.project_sources()?;
        let gateways = build_gateways(config, &projects)?;

        for project in &projects {
            let gateway = gateways
                .get(project.platform)
                .context("Gateway missing for configured platform")?;
            let branches = gateway
                .list_branches(project.project_id())
                .await
                .with_context(|| format!("Failed to list branches of {}", project.project_id()))?;
            output::print_branches(project.project_id(), &branches);

            if let ChangeSelection::NextRelease(next) = &project.selection {
                let request = next.plan(&branches)?;
                info!("Next reconciliation: {}", request.describe());
            }
        }

        Ok(())
    }

    async fn clear_cache(&self, config: &Config) -> Result<()> {
        let dataset = match &self.dataset {
            Some(dataset) => dataset.clone(),
            None => dataset_key(&dataset_scope(config, &config.project_sources()?))?,
        };

        let removed = build_cache(config)?.clear(&dataset).await;
        eprintln!("Removed {removed} cached stages of dataset {dataset}");

        Ok(())
    }

    fn dataset(&self, config: &Config, projects: &[ProjectSource]) -> Result<String> {
        match &self.dataset {
            Some(dataset) if !dataset.trim().is_empty() => Ok(dataset.trim().to_owned()),
            Some(_) => anyhow::bail!("--dataset must not be blank"),
            None => Ok(dataset_key(&dataset_scope(config, projects))?),
        }
    }
}

fn dataset_scope<'a>(config: &'a Config, projects: &'a [ProjectSource]) -> DatasetScope<'a> {
    DatasetScope {
        projects,
        users: &config.users,
        teams: &config.teams,
        team_order: &config.team_order,
        ticket_pattern: &config.pipeline.ticket_pattern,
    }
}

fn build_gateways(config: &Config, projects: &[ProjectSource]) -> Result<GatewayRegistry> {
    let retry = config.pipeline.retry_policy();
    let mut gateways = GatewayRegistry::new();

    if projects.iter().any(|p| p.platform == Platform::GitLab) {
        let token = config.gitlab.token.clone().map(Token::from);
        let provider = GitLabProvider::new(&config.gitlab.base_url, token, retry)
            .context("Failed to create GitLab client")?;
        gateways.register(Arc::new(provider) as Arc<dyn SourceControlGateway>);
    }

    if projects.iter().any(|p| p.platform == Platform::Bitbucket) {
        let token = config.bitbucket.token.clone().map(Token::from);
        let provider = BitbucketProvider::new(
            &config.bitbucket.base_url,
            config.bitbucket.username.clone(),
            token,
            retry,
        )
        .context("Failed to create Bitbucket client")?;
        gateways.register(Arc::new(provider) as Arc<dyn SourceControlGateway>);
    }

    Ok(gateways)
}

fn build_tracker(config: &Config) -> Result<AzureDevOpsClient> {
    let azure = &config.azure_devops;
    let organization_url = azure
        .organization_url
        .as_deref()
        .context("azure-devops.organization-url is not configured")?;
    let project = azure
        .project
        .as_deref()
        .context("azure-devops.project is not configured")?;

    AzureDevOpsClient::new(
        organization_url,
        project,
        azure.token.clone().map(Token::from),
        config.pipeline.retry_policy(),
    )
    .context("Failed to create Azure DevOps client")
}

fn build_cache(config: &Config) -> Result<StagedCache> {
    let store: Arc<dyn CacheStore> = match config.cache.backend {
        CacheBackend::File => Arc::new(FileStore::new(config.cache.directory.clone())?),
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
    };

    Ok(StagedCache::new(
        store,
        config.cache.prefix.clone(),
        config.cache.ttl(),
    ))
}

/// A token that fires on the first Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", output::failure("Interrupted, stopping..."));
            on_interrupt.cancel();
        }
    });
    cancel
}
