//! `collections` - list the collections bound to this agent.
//!
//! The server answer is cached for 7 days so the list stays usable while
//! offline; `--refresh` forces a fetch.

use anyhow::{Context, Result};

use crate::api_client::ApiClient;
use crate::cache::{CachedCollection, CollectionCache, CollectionCacheStore};
use crate::config::{AgentConfig, AgentPaths};

pub async fn execute(paths: &AgentPaths, refresh: bool) -> Result<i32> {
    let store = CollectionCacheStore::new(paths.collection_cache_file());

    if !refresh {
        if let Some(cache) = store.load_valid() {
            println!(
                "Collections (cached {}):",
                cache.synced_at.format("%Y-%m-%d %H:%M UTC")
            );
            print_collections(&cache.collections);
            return Ok(0);
        }
    }

    let Some(config) = AgentConfig::load(paths)? else {
        // Unregistered agents can still show a stale snapshot.
        if let Some(cache) = store.load() {
            println!(
                "Agent is not registered; showing stale cache from {}:",
                cache.synced_at.format("%Y-%m-%d %H:%M UTC")
            );
            print_collections(&cache.collections);
            return Ok(0);
        }
        eprintln!("Agent is not registered and no cache exists.");
        return Ok(1);
    };

    let client = ApiClient::new(&config.server_url, &config.api_key)?;
    match client.list_collections(config.agent_guid).await {
        Ok(response) => {
            let collections: Vec<CachedCollection> = response
                .collections
                .iter()
                .map(|c| CachedCollection {
                    guid: c.guid,
                    name: c.name.clone(),
                    collection_type: c.collection_type,
                    location: c.location.clone(),
                    pipeline_guid: c.pipeline_guid,
                })
                .collect();
            store
                .save(&CollectionCache::fresh(config.agent_guid, collections.clone()))
                .context("cache collections")?;

            println!("Collections (from server):");
            print_collections(&collections);
            Ok(0)
        }
        Err(err) => {
            eprintln!("Server unreachable: {err}");
            if let Some(cache) = store.load() {
                println!(
                    "Showing cached collections from {}:",
                    cache.synced_at.format("%Y-%m-%d %H:%M UTC")
                );
                print_collections(&cache.collections);
                return Ok(0);
            }
            Ok(1)
        }
    }
}

fn print_collections(collections: &[CachedCollection]) {
    if collections.is_empty() {
        println!("  (none bound to this agent)");
        return;
    }
    for c in collections {
        println!("  {}  {}  {}  {}", c.guid, c.collection_type, c.name, c.location);
    }
}
