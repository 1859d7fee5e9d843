pub mod args;
pub mod commands;
pub mod display;
pub mod prompt;

use crate::api::ApiClient;
use crate::common::{Config, StateDir};
use anyhow::Result;
use args::{Cli, Commands};
use clap::CommandFactory;
use commands::CommandExecutor;

pub async fn run_cli(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let state = StateDir::default_location()?;
    state.ensure()?;
    let config = Config::load(&state);
    tracing::debug!(state_dir = %state.root().display(), api = %config.api_base_url, "loaded config");

    let api = ApiClient::new(config, state.clone())?;
    let executor = CommandExecutor::new(state, api);

    match command {
        Commands::Init { username, password, api_url } => {
            executor.init(username, password, api_url).await?;
        }
        Commands::List(args) => {
            executor.list(&args).await?;
        }
        Commands::Status { job_id, json } => {
            executor.status(&job_id, json).await?;
        }
        Commands::Stop { job_id, yes } => {
            executor.stop(&job_id, yes).await?;
        }
        Commands::Watch { interval, limit, keep_alive } => {
            executor.watch(interval, limit, keep_alive).await?;
        }
        Commands::Track { job_id, name, source, workspace, quiet } => {
            executor.track(&job_id, name, source, workspace, quiet).await?;
        }
        Commands::Import { file, source, refresh } => {
            executor.import(&file, source, refresh).await?;
        }
        Commands::Remove { job_id, yes } => {
            executor.remove(&job_id, yes).await?;
        }
        Commands::Clear { yes } => {
            executor.clear(yes).await?;
        }
        Commands::Cookie(args) => {
            executor.cookie(&args).await?;
        }
        Commands::Login { username, password, workspace } => {
            executor.login(username, password, workspace).await?;
        }
        Commands::Workspace(args) => {
            executor.workspace(&args).await?;
        }
        Commands::Resources(args) => {
            executor.resources(&args).await?;
        }
        Commands::Avail(args) => {
            executor.avail(&args).await?;
        }
    }

    Ok(())
}
