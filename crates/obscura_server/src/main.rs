//! Obscura control-plane server.
//!
//! Usage:
//!     obscura-server serve --bind 127.0.0.1:8470
//!     obscura-server publish-release --version v1.2.0 --platform linux-x86_64 --file ./obscura-agent
//!     obscura-server mint-token --team <team-guid>
//!     obscura-server revoke-agent --agent <agent-guid> --reason "compromised host"

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use obscura_logging::{obscura_home, LogConfig};
use obscura_protocol::Guid;
use obscura_security::MasterKey;
use obscura_server::{build_app, sweeper, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "obscura-server", about = "Obscura control plane", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// SQLite database path (defaults to ~/.obscura/server.sqlite)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Verbose console logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP control plane
    Serve {
        /// Bind address
        #[arg(long, default_value = obscura_protocol::defaults::DEFAULT_BIND_ADDR)]
        bind: String,

        /// Directory holding release artifact binaries
        #[arg(long)]
        releases_dir: Option<PathBuf>,

        /// Seconds between maintenance sweeps
        #[arg(long, default_value_t = sweeper::DEFAULT_SWEEP_INTERVAL_SECS)]
        sweep_interval: u64,
    },

    /// Mint a single-use agent registration token
    MintToken {
        /// Team the new agent will belong to
        #[arg(long)]
        team: Guid,

        /// Token lifetime in hours
        #[arg(long, default_value_t = obscura_db::agents::DEFAULT_TOKEN_TTL_HOURS)]
        ttl_hours: i64,
    },

    /// Publish an agent release: record its checksum and stage the binary
    PublishRelease {
        #[arg(long)]
        version: String,

        /// e.g. "linux-x86_64", "darwin-arm64"
        #[arg(long)]
        platform: String,

        /// Agent binary to hash and stage
        #[arg(long)]
        file: PathBuf,

        /// Directory holding release artifact binaries
        #[arg(long)]
        releases_dir: Option<PathBuf>,
    },

    /// Revoke an agent. Terminal: it can never claim or complete again.
    RevokeAgent {
        #[arg(long)]
        agent: Guid,

        #[arg(long)]
        reason: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    obscura_logging::init_logging(LogConfig {
        app_name: "obscura-server",
        verbose: args.verbose,
    })?;

    let home = obscura_home();
    let db_path = args.db.unwrap_or_else(|| home.join("server.sqlite"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create data dir {}", parent.display()))?;
    }
    let db_url = db_path
        .to_str()
        .context("database path is not valid UTF-8")?;
    let pool = obscura_db::create_pool(obscura_db::DbConfig::sqlite(db_url))
        .await
        .context("open database")?;
    obscura_db::ensure_schema(&pool).await.context("ensure schema")?;

    match args.command {
        Command::Serve {
            bind,
            releases_dir,
            sweep_interval,
        } => {
            let releases_dir = releases_dir.unwrap_or_else(|| home.join("releases"));
            std::fs::create_dir_all(&releases_dir)
                .with_context(|| format!("create releases dir {}", releases_dir.display()))?;
            let master_key = MasterKey::load_or_generate(&home.join("master.key"))
                .context("load server master key")?;
            let state = Arc::new(AppState::new(pool, master_key, releases_dir));

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sweeper_handle = tokio::spawn(sweeper::run(
                Arc::clone(&state),
                Duration::from_secs(sweep_interval.max(1)),
                shutdown_rx,
            ));

            let app = build_app(state);
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .with_context(|| format!("bind {bind}"))?;
            info!("obscura-server listening on {}", bind);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Shutdown requested");
                })
                .await
                .context("serve")?;

            let _ = shutdown_tx.send(true);
            let _ = sweeper_handle.await;
        }

        Command::MintToken { team, ttl_hours } => {
            let registry = obscura_db::AgentRegistry::new(pool);
            let token = registry
                .create_registration_token(team, "cli", ttl_hours)
                .await
                .context("mint token")?;
            println!("{token}");
            eprintln!("Single use, expires in {ttl_hours}h. Hand it to the agent operator.");
        }

        Command::PublishRelease {
            version,
            platform,
            file,
            releases_dir,
        } => {
            let releases_dir = releases_dir.unwrap_or_else(|| home.join("releases"));
            std::fs::create_dir_all(&releases_dir)
                .with_context(|| format!("create releases dir {}", releases_dir.display()))?;

            let bytes =
                std::fs::read(&file).with_context(|| format!("read {}", file.display()))?;
            let checksum = obscura_security::sha256_hex(&bytes);
            let filename = format!("obscura-agent-{version}-{platform}");
            std::fs::write(releases_dir.join(&filename), &bytes)
                .with_context(|| format!("stage {}", filename))?;

            let releases = obscura_db::ReleaseStore::new(pool);
            releases
                .publish(
                    &version,
                    &[(
                        platform.as_str(),
                        filename.as_str(),
                        checksum.as_str(),
                        bytes.len() as i64,
                    )],
                )
                .await
                .context("record release")?;
            println!("Published {version} for {platform} ({checksum})");
        }

        Command::RevokeAgent { agent, reason } => {
            let registry = obscura_db::AgentRegistry::new(pool);
            registry.revoke(agent, &reason).await.context("revoke agent")?;
            println!("Agent {agent} revoked.");
        }
    }

    Ok(())
}
