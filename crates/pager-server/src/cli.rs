//! Command-line argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Consul alarms on check failures.
#[derive(Parser, Debug, Clone)]
#[command(name = "consul-pager")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the alarm watcher.
    #[command(visible_alias = "s")]
    Start {
        /// Config file; default search paths are used when omitted.
        #[arg(short, long, env = "CONSUL_PAGER_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Register a script check with the local Consul agent.
    #[command(visible_alias = "a")]
    AddCheck(AddCheckArgs),

    /// Print the version.
    #[command(visible_alias = "v")]
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AddCheckArgs {
    /// Check name.
    #[arg(long, default_value = "acheck")]
    pub name: String,

    /// Check interval (ex: 10s).
    #[arg(long, default_value = "10s")]
    pub interval: String,

    /// Shell script the agent runs.
    #[arg(long)]
    pub script: String,

    /// Consul HTTP address.
    #[arg(long, env = "CONSUL_HTTP_ADDR", default_value = "http://127.0.0.1:8500")]
    pub consul: String,
}
