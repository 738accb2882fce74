mod auth;
mod cache;
mod cli;
mod config;
mod error;
mod fetch_request;
mod hierarchy;
mod models;
mod output;
mod pipeline;
mod providers;
mod release_branch;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    output::print_banner();

    let cli = Cli::parse();
    info!("Starting release-recon");
    cli.execute().await?;

    Ok(())
}
