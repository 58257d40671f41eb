//! `capabilities` - print what this agent can do.

use anyhow::Result;
use obscura_security::MasterKey;
use std::sync::Arc;

use crate::capabilities;
use crate::config::AgentPaths;
use crate::credential_store::CredentialStore;

pub fn execute(paths: &AgentPaths) -> Result<i32> {
    // The credential store only contributes connector capabilities when
    // a master key already exists; don't create one just to print.
    let credentials = if paths.master_key_file().exists() {
        MasterKey::load_or_generate(&paths.master_key_file())
            .ok()
            .map(|key| Arc::new(CredentialStore::new(paths.credentials_file(), key)))
    } else {
        None
    };

    println!("Agent version: {}", capabilities::agent_version());
    println!("Platform:      {}", capabilities::platform());
    println!("Capabilities:");
    for capability in capabilities::detect_capabilities(credentials.as_deref()) {
        println!("  {capability}");
    }
    Ok(0)
}
