//! Agent capability and version detection.

use obscura_protocol::{capabilities, ToolKind};

use crate::credential_store::CredentialStore;

/// Agent version string.
///
/// `OBSCURA_VERSION` overrides at runtime (packaging and tests); the
/// crate version is the build-time default.
pub fn agent_version() -> String {
    if let Ok(version) = std::env::var("OBSCURA_VERSION") {
        if !version.trim().is_empty() {
            return version;
        }
    }
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

/// Platform string presented with attestation, e.g. "linux-x86_64".
pub fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Detect this agent's capabilities.
///
/// Called at registration and on every heartbeat. The analysis tools are
/// built into the agent and always advertised; connector capabilities
/// come from the local credential store.
pub fn detect_capabilities(credentials: Option<&CredentialStore>) -> Vec<String> {
    let mut caps = vec![capabilities::LOCAL_FILESYSTEM.to_string()];

    let version = agent_version();
    for tool in ToolKind::ALL {
        caps.push(capabilities::tool(*tool, &version));
    }

    if let Some(store) = credentials {
        caps.extend(store.capability_strings());
    }

    caps
}

/// SHA-256 of the running binary, presented with attestation.
pub fn binary_checksum() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    let bytes = std::fs::read(exe).ok()?;
    Some(obscura_security::sha256_hex(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_includes_local_filesystem_and_tools() {
        let caps = detect_capabilities(None);
        assert_eq!(caps[0], capabilities::LOCAL_FILESYSTEM);
        assert!(caps.iter().any(|c| c.starts_with("tool:photostats:")));
        assert!(caps.iter().any(|c| c.starts_with("tool:pipeline_validation:")));
    }

    #[test]
    fn test_platform_shape() {
        let p = platform();
        assert!(p.contains('-'));
    }
}
