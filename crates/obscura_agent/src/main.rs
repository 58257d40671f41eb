//! Obscura agent CLI.
//!
//! Usage:
//!     obscura-agent register --server http://host:8470 --token <token> --root /photos
//!     obscura-agent start

use clap::Parser;
use obscura_agent::cli::{Cli, Command};
use obscura_agent::config::AgentPaths;
use obscura_logging::LogConfig;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = obscura_logging::init_logging(LogConfig {
        app_name: "obscura-agent",
        verbose: cli.verbose,
    }) {
        eprintln!("Failed to initialize logging: {err}");
    }

    let paths = AgentPaths::resolve();
    let outcome = match cli.command {
        Command::Register {
            server,
            token,
            name,
            roots,
        } => obscura_agent::cli::register::execute(&paths, server, token, name, roots).await,
        Command::Start { poll_interval } => {
            obscura_agent::cli::start::execute(&paths, poll_interval).await
        }
        Command::Run {
            tool,
            path,
            collection,
            offline,
        } => obscura_agent::cli::run::execute(&paths, tool, path, collection, offline).await,
        Command::Sync { cleanup } => obscura_agent::cli::sync::execute(&paths, cleanup).await,
        Command::Collections { refresh } => {
            obscura_agent::cli::collections::execute(&paths, refresh).await
        }
        Command::Test { path, no_cache } => {
            obscura_agent::cli::test::execute(&paths, path, no_cache).await
        }
        Command::Capabilities => obscura_agent::cli::capabilities::execute(&paths),
        Command::Status => obscura_agent::cli::status::execute(&paths),
        Command::Update { check } => obscura_agent::cli::update::execute(&paths, check).await,
    };

    let code = match outcome {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {err:#}");
            1
        }
    };
    std::process::exit(code);
}
