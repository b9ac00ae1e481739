//! Local connection registry file (`<state_dir>/connections.json`)

use std::collections::BTreeMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::model::ToolConnection;
use crate::{Result, persist};

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct RegistryFile {
    version: u32,
    #[serde(default)]
    connections: Vec<ToolConnection>,
}

/// Connection records keyed by id, written through on every change
pub struct ConnectionStore {
    path: Option<PathBuf>,
    records: Mutex<BTreeMap<String, ToolConnection>>,
}

impl ConnectionStore {
    /// Open (or start) the registry file at `path`
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file: Option<RegistryFile> = persist::read_json(&path)?;
        let records = file
            .map(|f| {
                f.connections
                    .into_iter()
                    .map(|c| (c.connection_id.clone(), c))
                    .collect()
            })
            .unwrap_or_default();
        debug!(path = %path.display(), "Opened connection registry");
        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    /// Registry that is never written to disk
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(BTreeMap::new()),
        }
    }

    /// One record
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<ToolConnection> {
        self.records.lock().get(connection_id).cloned()
    }

    /// Every record, in id order
    #[must_use]
    pub fn all(&self) -> Vec<ToolConnection> {
        self.records.lock().values().cloned().collect()
    }

    /// Insert or replace a record
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file cannot be written; the
    /// in-memory view is left unchanged in that case.
    pub fn upsert(&self, connection: ToolConnection) -> Result<()> {
        let mut records = self.records.lock();
        let previous = records.insert(connection.connection_id.clone(), connection.clone());
        if let Err(e) = self.flush(&records) {
            match previous {
                Some(p) => records.insert(p.connection_id.clone(), p),
                None => records.remove(&connection.connection_id),
            };
            return Err(e);
        }
        Ok(())
    }

    /// Delete a record, returning it
    ///
    /// # Errors
    ///
    /// Returns an error if the registry file cannot be written.
    pub fn remove(&self, connection_id: &str) -> Result<Option<ToolConnection>> {
        let mut records = self.records.lock();
        let Some(removed) = records.remove(connection_id) else {
            return Ok(None);
        };
        if let Err(e) = self.flush(&records) {
            records.insert(removed.connection_id.clone(), removed);
            return Err(e);
        }
        Ok(Some(removed))
    }

    fn flush(&self, records: &BTreeMap<String, ToolConnection>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = RegistryFile {
            version: FORMAT_VERSION,
            connections: records.values().cloned().collect(),
        };
        persist::write_json(path, &file)
    }
}
