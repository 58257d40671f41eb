//! Local encrypted credential store.
//!
//! Connector secrets the server never holds live here, sealed with the
//! same master key as the offline spool. Entries are addressed by their
//! capability string (`connector:<guid>`), which is also what the agent
//! advertises in heartbeats.

use obscura_protocol::{capabilities, Guid};
use obscura_security::MasterKey;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, warn};

pub struct CredentialStore {
    file: PathBuf,
    key: MasterKey,
}

impl CredentialStore {
    pub fn new(file: PathBuf, key: MasterKey) -> Self {
        Self { file, key }
    }

    fn read_entries(&self) -> BTreeMap<String, Value> {
        let Ok(sealed) = fs::read(&self.file) else {
            return BTreeMap::new();
        };
        match self.key.open(&sealed) {
            Ok(plaintext) => serde_json::from_slice(&plaintext).unwrap_or_default(),
            Err(err) => {
                warn!("Credential store unreadable: {}", err);
                BTreeMap::new()
            }
        }
    }

    fn write_entries(&self, entries: &BTreeMap<String, Value>) -> io::Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec(entries)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        let sealed = self
            .key
            .seal(&raw)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        fs::write(&self.file, sealed)
    }

    /// Store credentials for a connector.
    pub fn store_connector(&self, connector_guid: Guid, credentials: &Value) -> io::Result<()> {
        let mut entries = self.read_entries();
        entries.insert(capabilities::connector(connector_guid), credentials.clone());
        self.write_entries(&entries)?;
        debug!("Stored credentials for connector {}", connector_guid);
        Ok(())
    }

    /// Credentials for a connector, if held locally.
    pub fn connector(&self, connector_guid: Guid) -> Option<Value> {
        self.read_entries()
            .remove(&capabilities::connector(connector_guid))
    }

    pub fn remove_connector(&self, connector_guid: Guid) -> io::Result<bool> {
        let mut entries = self.read_entries();
        let removed = entries
            .remove(&capabilities::connector(connector_guid))
            .is_some();
        if removed {
            self.write_entries(&entries)?;
        }
        Ok(removed)
    }

    /// Capability strings for every held credential, advertised in
    /// heartbeats so connector-scoped jobs can route here.
    pub fn capability_strings(&self) -> Vec<String> {
        self.read_entries().into_keys().collect()
    }
}
