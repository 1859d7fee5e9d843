use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "qzcli")]
#[command(version)]
#[command(about = "Track and manage jobs on the Qizhi compute platform", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Save username and password for the platform API
    Init {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
        /// Override the API base URL
        #[arg(long)]
        api_url: Option<String>,
    },

    /// List jobs
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Show the latest status of a job
    #[command(visible_alias = "st")]
    Status {
        job_id: String,
        /// Also print the raw API payload
        #[arg(short, long)]
        json: bool,
    },

    /// Stop a job
    Stop {
        job_id: String,
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Refresh and redisplay tracked jobs until they finish
    #[command(visible_alias = "w")]
    Watch {
        /// Refresh interval in seconds
        #[arg(short, long, default_value = "10")]
        interval: u64,
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value = "30")]
        limit: usize,
        /// Keep watching after every job has finished
        #[arg(short, long)]
        keep_alive: bool,
    },

    /// Track a job (for use from submission scripts)
    Track {
        job_id: String,
        #[arg(long)]
        name: Option<String>,
        /// Tag recording which script submitted the job
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        workspace: Option<String>,
        #[arg(short, long)]
        quiet: bool,
    },

    /// Import job IDs from a file, one per line
    Import {
        file: PathBuf,
        #[arg(long)]
        source: Option<String>,
        /// Fetch the status of imported jobs afterwards
        #[arg(short, long)]
        refresh: bool,
    },

    /// Remove a job record
    #[command(visible_alias = "rm")]
    Remove {
        job_id: String,
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove every job record
    Clear {
        #[arg(short, long)]
        yes: bool,
    },

    /// Set, show or clear the browser session cookie
    Cookie(CookieArgs),

    /// Sign in through CAS and save the session cookie
    Login {
        #[arg(short, long)]
        username: Option<String>,
        #[arg(short, long)]
        password: Option<String>,
        /// Default workspace ID
        #[arg(short, long)]
        workspace: Option<String>,
    },

    /// Show every running task in a workspace
    #[command(visible_alias = "ws")]
    Workspace(WorkspaceArgs),

    /// Show cached projects, compute groups and specs of a workspace
    #[command(visible_aliases = ["res", "workspaces", "lsws"])]
    Resources(ResourcesArgs),

    /// Show free nodes per compute group and recommend where to submit
    #[command(visible_alias = "av")]
    Avail(AvailArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
    /// Filter by status substring
    #[arg(short, long)]
    pub status: Option<String>,
    /// Only running or queued jobs
    #[arg(short, long)]
    pub running: bool,
    /// Do not refresh statuses from the API
    #[arg(long)]
    pub no_refresh: bool,
    /// Compact table instead of the wide listing
    #[arg(long)]
    pub compact: bool,
    /// Fetch jobs from the API with the saved cookie instead of the local store
    #[arg(short, long)]
    pub cookie: bool,
    /// Workspace name or ID (cookie mode)
    #[arg(short, long)]
    pub workspace: Option<String>,
    /// Query every cached workspace (cookie mode)
    #[arg(long)]
    pub all_ws: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CookieArgs {
    /// Cookie string copied from the browser
    pub cookie: Option<String>,
    /// Read the cookie from a file
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// Default workspace ID
    #[arg(short, long)]
    pub workspace: Option<String>,
    #[arg(long)]
    pub show: bool,
    #[arg(long)]
    pub clear: bool,
    /// Save without checking the cookie against the API
    #[arg(long)]
    pub no_test: bool,
}

#[derive(Args, Debug, Clone)]
pub struct WorkspaceArgs {
    /// Workspace name or ID (defaults to the cookie's workspace)
    #[arg(short, long)]
    pub workspace: Option<String>,
    /// Only tasks of this project
    #[arg(short, long)]
    pub project: Option<String>,
    /// Ignore --project and show every project
    #[arg(short, long)]
    pub all: bool,
    #[arg(long, default_value = "1")]
    pub page: u32,
    #[arg(long, default_value = "100")]
    pub size: u32,
    /// Add unknown tasks to the local job store
    #[arg(short, long)]
    pub sync: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ResourcesArgs {
    /// Workspace name or ID
    #[arg(short, long)]
    pub workspace: Option<String>,
    /// Print shell variable assignments
    #[arg(short, long)]
    pub export: bool,
    /// Refresh the cache from the API
    #[arg(short, long)]
    pub update: bool,
    /// List cached workspaces
    #[arg(short, long)]
    pub list: bool,
    /// Set the workspace alias
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AvailArgs {
    /// Workspace name or ID (defaults to every cached workspace)
    #[arg(short, long)]
    pub workspace: Option<String>,
    /// Compute group name or ID
    #[arg(short, long)]
    pub group: Option<String>,
    /// Required number of free nodes; switches to recommendation mode
    #[arg(short, long)]
    pub nodes: Option<usize>,
    /// Print shell variable assignments
    #[arg(short, long)]
    pub export: bool,
    /// List free node names
    #[arg(long)]
    pub show_nodes: bool,
}
