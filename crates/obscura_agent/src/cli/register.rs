//! `register` - one-shot agent registration.

use anyhow::{bail, Context, Result};
use obscura_protocol::RegisterRequest;
use std::path::PathBuf;

use crate::api_client::ApiClient;
use crate::capabilities;
use crate::config::{AgentConfig, AgentPaths};

pub async fn execute(
    paths: &AgentPaths,
    server: String,
    token: String,
    name: Option<String>,
    roots: Vec<PathBuf>,
) -> Result<i32> {
    if AgentConfig::load(paths)?.is_some() {
        bail!("agent is already registered; remove agent.yaml to re-register");
    }

    let hostname = hostname();
    let name = name.unwrap_or_else(|| hostname.clone());
    let mut authorized_roots = Vec::new();
    for root in roots {
        if !root.is_absolute() {
            bail!("authorized root {} is not an absolute path", root.display());
        }
        authorized_roots.push(root.to_string_lossy().into_owned());
    }

    let request = RegisterRequest {
        token,
        name: name.clone(),
        hostname,
        platform: capabilities::platform(),
        version: capabilities::agent_version(),
        binary_checksum: capabilities::binary_checksum().unwrap_or_default(),
        capabilities: capabilities::detect_capabilities(None),
        authorized_roots: authorized_roots.clone(),
    };

    let response = ApiClient::register(&server, &request)
        .await
        .context("registration failed")?;

    let config = AgentConfig {
        server_url: server,
        api_key: response.api_key,
        agent_guid: response.agent_guid,
        authorized_roots,
    };
    config.save(paths)?;

    println!("Registered as {} ({})", name, response.agent_guid);
    println!("Configuration written to {}", paths.config_file().display());
    Ok(0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "unknown-host".to_string())
}
