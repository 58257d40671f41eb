//! `status` - registration state and update warnings.

use anyhow::Result;

use crate::cache::VersionCacheStore;
use crate::capabilities;
use crate::config::{AgentConfig, AgentPaths};

pub fn execute(paths: &AgentPaths) -> Result<i32> {
    println!("Agent version: {}", capabilities::agent_version());

    match AgentConfig::load(paths)? {
        Some(config) => {
            println!("Registered:    yes");
            println!("Agent GUID:    {}", config.agent_guid);
            println!("Server:        {}", config.server_url);
            if config.authorized_roots.is_empty() {
                println!("Roots:         (none)");
            } else {
                println!("Roots:         {}", config.authorized_roots.join(", "));
            }
        }
        None => {
            println!("Registered:    no");
        }
    }

    // The outdated warning comes from the cached heartbeat verdict; a
    // status check never performs a server round-trip.
    let version_cache = VersionCacheStore::new(paths.version_state_file());
    match version_cache.read() {
        Some(state) if state.is_outdated => {
            let latest = state.latest_version.as_deref().unwrap_or("a newer version");
            println!();
            println!("Update available: {latest} (run `obscura-agent update`)");
        }
        Some(_) => println!("Up to date as of the last heartbeat."),
        None => {}
    }
    Ok(0)
}
