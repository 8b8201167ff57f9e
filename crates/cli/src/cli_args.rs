use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default look-back for `cross-project`: one day
pub const DEFAULT_CROSS_PROJECT_WINDOW_SECS: u64 = 24 * 60 * 60;

/// Command line arguments for the hook binary
#[derive(Parser, Debug)]
#[clap(
    name = "rcl",
    about = "Capture, correlate and archive assistant tool-call hooks"
)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Pre-tool hook: read the request from stdin, record a pending event
    PreTool,
    /// Post-tool hook: read the request from stdin, complete the pending event
    PostTool,
    /// Stop hook: archive the turn's transcript with captured tool data
    Stop,
    /// Remove orphaned pending events now
    Sweep {
        /// Defaults to `pending_ttl_secs`
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Remove completed records past retention
    Retention {
        /// Defaults to `completed_retention_secs`
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Print a session's aggregate as JSON
    Aggregate { session_id: String },
    /// List recent sessions that ran tools in more than one project
    CrossProject {
        #[arg(long, default_value_t = DEFAULT_CROSS_PROJECT_WINDOW_SECS)]
        window_secs: u64,
    },
}
