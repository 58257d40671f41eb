//! Agent CLI commands.
//!
//! Exit codes: 0 success, 1 generic/usage, 2 agent revoked, 3
//! authentication failure, 4 too many connection failures, 5 too many
//! internal errors.

pub mod capabilities;
pub mod collections;
pub mod register;
pub mod run;
pub mod start;
pub mod status;
pub mod sync;
pub mod update;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "obscura-agent", about = "Obscura analysis agent", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Verbose console logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register this agent with a server using a one-time token
    Register {
        /// Server base URL
        #[arg(long)]
        server: String,
        /// Single-use registration token
        #[arg(long)]
        token: String,
        /// Agent display name
        #[arg(long)]
        name: Option<String>,
        /// Absolute paths this agent may analyze
        #[arg(long = "root")]
        roots: Vec<PathBuf>,
    },

    /// Start the polling loop and heartbeat (the agent daemon)
    Start {
        /// Seconds between job polls when idle
        #[arg(long, default_value_t = obscura_protocol::defaults::DEFAULT_POLL_INTERVAL_SECS)]
        poll_interval: u64,
    },

    /// Run one tool locally and spool the result for later sync
    Run {
        /// Tool to run
        #[arg(long)]
        tool: String,
        /// Collection path to analyze
        #[arg(long)]
        path: PathBuf,
        /// Collection GUID to attribute the result to
        #[arg(long)]
        collection: Option<String>,
        /// Skip the server entirely and rely on cached config
        #[arg(long)]
        offline: bool,
    },

    /// Upload spooled offline results to the server
    Sync {
        /// Delete synced spool files afterwards
        #[arg(long, default_value_t = true)]
        cleanup: bool,
    },

    /// List the collections bound to this agent (7d cache)
    Collections {
        /// Force a server fetch even when the cache is fresh
        #[arg(long)]
        refresh: bool,
    },

    /// Test a local path: accessibility and photo/sidecar counts
    Test {
        /// Path to test
        path: PathBuf,
        /// Ignore the 24h test cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Print detected capabilities
    Capabilities,

    /// Show registration state and update warnings
    Status,

    /// Download the latest agent binary for this platform
    Update {
        /// Only check, do not download
        #[arg(long)]
        check: bool,
    },
}
