//! `update` - self-update against the release manifest.
//!
//! The cached heartbeat verdict gates the check so a fresh "you are
//! outdated" answer costs nothing; the download is verified against the
//! `X-Checksum` header before anything lands next to the running binary.

use anyhow::{bail, Context, Result};
use obscura_security::sha256_hex;
use std::fs;

use crate::api_client::ApiClient;
use crate::cache::VersionCacheStore;
use crate::capabilities;
use crate::config::{AgentConfig, AgentPaths};

pub async fn execute(paths: &AgentPaths, check_only: bool) -> Result<i32> {
    let Some(config) = AgentConfig::load(paths)? else {
        eprintln!("Agent is not registered.");
        return Ok(1);
    };

    let version_cache = VersionCacheStore::new(paths.version_state_file());
    let verdict = version_cache.read();

    let latest = match verdict {
        Some(state) if !state.is_outdated => {
            println!(
                "Already up to date ({}).",
                capabilities::agent_version()
            );
            return Ok(0);
        }
        Some(state) => state.latest_version,
        // No fresh verdict: one heartbeat-less probe is unavoidable.
        None => {
            println!("No cached version verdict; asking the server...");
            let client = ApiClient::new(&config.server_url, &config.api_key)?;
            let request = obscura_protocol::HeartbeatRequest {
                capabilities: capabilities::detect_capabilities(None),
                metrics: Default::default(),
                version: capabilities::agent_version(),
                platform: capabilities::platform(),
                binary_checksum: capabilities::binary_checksum().unwrap_or_default(),
            };
            let response = client.heartbeat(config.agent_guid, &request).await?;
            let _ = version_cache.write(response.is_outdated, response.latest_version.clone());
            if !response.is_outdated {
                println!("Already up to date ({}).", capabilities::agent_version());
                return Ok(0);
            }
            response.latest_version
        }
    };

    let Some(latest) = latest else {
        bail!("server flagged this agent outdated without naming a version");
    };
    println!(
        "Update available: {} (running {})",
        latest,
        capabilities::agent_version()
    );
    if check_only {
        return Ok(0);
    }

    let client = ApiClient::new(&config.server_url, &config.api_key)?;
    let platform = capabilities::platform();
    let (bytes, expected_checksum) = client
        .download_release(&latest, &platform)
        .await
        .context("download release")?;

    let actual = sha256_hex(&bytes);
    if expected_checksum.is_empty() || actual != expected_checksum {
        bail!(
            "checksum mismatch on downloaded binary (expected {expected_checksum}, got {actual})"
        );
    }

    let updates_dir = paths.updates_dir();
    fs::create_dir_all(&updates_dir)
        .with_context(|| format!("create {}", updates_dir.display()))?;
    let target = updates_dir.join(format!("obscura-agent-{latest}"));
    fs::write(&target, &bytes).with_context(|| format!("write {}", target.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&target, fs::Permissions::from_mode(0o755));
    }

    println!("Downloaded and verified {}", target.display());
    println!("Replace the running binary with it to finish the update.");
    Ok(0)
}
