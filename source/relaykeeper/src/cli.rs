//! Argument parsing for the `relaykeeper` binary. This crate only parses
//! and dispatches; all behavior lives in `relaykeeper-config`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "relaykeeper", version, about = "Supervisor and configuration pipeline for an embedded proxy core")]
pub struct Cli {
    /// Path to the JSONC config document holding the embedded directive.
    #[arg(long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// Directory for rotating log files; stdout is used when omitted.
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Emit machine-readable JSON instead of human-formatted text.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one configuration refresh (fetch, decode, filter, assemble, commit).
    Refresh,

    /// Spawn and supervise the core process until interrupted.
    Start {
        #[arg(long)]
        core_binary: PathBuf,
        #[arg(long)]
        working_dir: Option<PathBuf>,
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },

    /// Stop a previously started core process.
    Stop,

    /// Report whether a supervised core process is currently running.
    Status,

    /// List control-plane proxy groups (selector/urltest).
    Groups {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: String,
    },

    /// List the members of one proxy group.
    Members {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: String,
        group: String,
    },

    /// Switch the active member of a proxy group.
    Switch {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: String,
        group: String,
        member: String,
    },

    /// Probe the latency of one proxy member.
    Probe {
        #[arg(long)]
        base_url: String,
        #[arg(long)]
        token: String,
        #[arg(long, default_value = "https://www.gstatic.com/generate_204")]
        reference_url: String,
        member: String,
    },
}
