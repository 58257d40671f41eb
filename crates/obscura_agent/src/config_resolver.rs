//! Team config resolution for CLI commands.
//!
//! Priority chain: server fetch, then valid cache, then expired cache
//! (with a warning), then nothing. Used by `test` and `run`.

use tracing::debug;

use crate::api_client::ApiClient;
use crate::cache::{TeamConfigCache, TeamConfigCacheStore};
use crate::config::{AgentConfig, AgentPaths};

/// Where the resolved config came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Server,
    Cache,
    ExpiredCache,
    Unavailable,
}

/// Result of team config resolution.
pub struct ConfigResult {
    pub config: Option<TeamConfigCache>,
    pub source: ConfigSource,
    /// Human-readable status for CLI output.
    pub message: String,
}

/// Resolve team configuration: server fetch > fresh cache > expired
/// cache > none.
pub async fn resolve_team_config(
    paths: &AgentPaths,
    agent_config: Option<&AgentConfig>,
    offline: bool,
) -> ConfigResult {
    let store = TeamConfigCacheStore::new(paths.team_config_cache_file());

    // Try the server first when the agent is registered and online mode
    // is allowed.
    let mut server_error = None;
    if !offline {
        if let Some(agent_config) = agent_config {
            match fetch_and_cache(agent_config, &store).await {
                Ok(cache) => {
                    debug!("Fetched and cached team config from server");
                    return ConfigResult {
                        config: Some(cache),
                        source: ConfigSource::Server,
                        message: "from server".into(),
                    };
                }
                Err(err) => {
                    debug!("Server config fetch failed: {}", err);
                    server_error = Some(err);
                }
            }
        }
    }

    if let Some(cache) = store.load_valid() {
        let fetched = cache.fetched_at.format("%Y-%m-%d %H:%M UTC");
        let message = match &server_error {
            Some(_) => format!("server unavailable, using cached config ({fetched})"),
            None => format!("from cache ({fetched})"),
        };
        return ConfigResult {
            config: Some(cache),
            source: ConfigSource::Cache,
            message,
        };
    }

    if let Some(cache) = store.load() {
        let fetched = cache.fetched_at.format("%Y-%m-%d %H:%M UTC");
        return ConfigResult {
            config: Some(cache),
            source: ConfigSource::ExpiredCache,
            message: format!(
                "server unavailable, using cached config from {fetched} (may be outdated)"
            ),
        };
    }

    let message = match server_error {
        Some(err) => format!("server unavailable ({err}), no cached config"),
        None => "no config available".into(),
    };
    ConfigResult {
        config: None,
        source: ConfigSource::Unavailable,
        message,
    }
}

async fn fetch_and_cache(
    agent_config: &AgentConfig,
    store: &TeamConfigCacheStore,
) -> Result<TeamConfigCache, String> {
    let client = ApiClient::new(&agent_config.server_url, &agent_config.api_key)
        .map_err(|err| err.to_string())?;
    let response = client.team_config().await.map_err(|err| err.to_string())?;
    let cache = TeamConfigCache::from_response(agent_config.agent_guid, &response);
    if let Err(err) = store.save(&cache) {
        debug!("Failed to cache team config: {}", err);
    }
    Ok(cache)
}

/// Resolve offline-only (no network attempt): `run --offline` and tests.
pub fn resolve_cached_only(paths: &AgentPaths) -> ConfigResult {
    let store = TeamConfigCacheStore::new(paths.team_config_cache_file());
    if let Some(cache) = store.load_valid() {
        let fetched = cache.fetched_at.format("%Y-%m-%d %H:%M UTC");
        return ConfigResult {
            config: Some(cache),
            source: ConfigSource::Cache,
            message: format!("from cache ({fetched})"),
        };
    }
    if let Some(cache) = store.load() {
        let fetched = cache.fetched_at.format("%Y-%m-%d %H:%M UTC");
        return ConfigResult {
            config: Some(cache),
            source: ConfigSource::ExpiredCache,
            message: format!("using cached config from {fetched} (may be outdated)"),
        };
    }
    ConfigResult {
        config: None,
        source: ConfigSource::Unavailable,
        message: "no config available".into(),
    }
}

/// The tool-config view of a cached team config.
pub fn tool_config_from_cache(cache: &TeamConfigCache) -> crate::tools::ToolConfig {
    let team = obscura_protocol::TeamConfig {
        photo_extensions: cache.photo_extensions.clone(),
        metadata_extensions: cache.metadata_extensions.clone(),
        cameras: cache.cameras.clone(),
        processing_methods: cache.processing_methods.clone(),
        require_sidecar: cache.require_sidecar.clone(),
    };
    crate::tools::ToolConfig::from(&team)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use obscura_protocol::{Guid, TeamConfig, TeamConfigResponse};
    use tempfile::TempDir;

    fn cache_for(dir: &TempDir) -> (AgentPaths, TeamConfigCacheStore) {
        let paths = AgentPaths::at(dir.path());
        let store = TeamConfigCacheStore::new(paths.team_config_cache_file());
        (paths, store)
    }

    fn sample_cache() -> TeamConfigCache {
        TeamConfigCache::from_response(
            Guid::new(),
            &TeamConfigResponse {
                config: TeamConfig {
                    photo_extensions: vec![".cr3".into()],
                    metadata_extensions: vec![".xmp".into()],
                    require_sidecar: vec![],
                    ..Default::default()
                },
                default_pipeline: None,
            },
        )
    }

    #[tokio::test]
    async fn test_fresh_cache_wins_offline() {
        let dir = TempDir::new().unwrap();
        let (paths, store) = cache_for(&dir);
        store.save(&sample_cache()).unwrap();

        let result = resolve_team_config(&paths, None, true).await;
        assert_eq!(result.source, ConfigSource::Cache);
        assert!(result.config.is_some());
    }

    #[tokio::test]
    async fn test_expired_cache_still_resolves_with_warning() {
        let dir = TempDir::new().unwrap();
        let (paths, store) = cache_for(&dir);
        let mut stale = sample_cache();
        stale.expires_at = Utc::now() - Duration::hours(1);
        store.save(&stale).unwrap();

        let result = resolve_team_config(&paths, None, true).await;
        assert_eq!(result.source, ConfigSource::ExpiredCache);
        assert!(result.message.contains("may be outdated"));
    }

    #[tokio::test]
    async fn test_nothing_available() {
        let dir = TempDir::new().unwrap();
        let (paths, _) = cache_for(&dir);
        let result = resolve_team_config(&paths, None, true).await;
        assert_eq!(result.source, ConfigSource::Unavailable);
        assert!(result.config.is_none());
    }
}
