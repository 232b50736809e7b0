use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// env-cleaner: reclaims ephemeral environments once their TTL runs out
#[derive(Parser)]
#[command(name = "env-cleaner", version, about)]
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "ENV_CLEANER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the API, the crawlers, the deleter and the stale notifier
    Server,

    /// Manage tracked environments through a running server
    Env {
        #[command(subcommand)]
        command: EnvCommands,
    },
}

#[derive(Subcommand)]
pub enum EnvCommands {
    /// List tracked environments
    List,
    /// Start tracking an existing environment
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner: String,
        /// Connector type, e.g. `helm`
        #[arg(long = "type")]
        kind: String,
        /// Time to live, e.g. `36h` or `1w`
        #[arg(long)]
        ttl: String,
        /// Required for namespaced platforms such as helm
        #[arg(long, default_value = "")]
        namespace: String,
    },
}
