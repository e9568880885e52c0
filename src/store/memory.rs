// src/store/memory.rs

use std::collections::BTreeMap;
use std::sync::Mutex;

use tracing::trace;

use crate::dag::SubproblemId;
use crate::errors::{ProgressiveError, Result};
use crate::store::{JobRecordStore, RunManifest, SubproblemRecord};

/// Stores records in memory only.
///
/// Share it through an `Arc` to let a second orchestrator resume from what a
/// first one left behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<SubproblemId, SubproblemRecord>>,
    manifest: Mutex<Option<RunManifest>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> ProgressiveError {
    ProgressiveError::StoreUnavailable("memory store lock poisoned".to_string())
}

impl JobRecordStore for MemoryStore {
    fn put(&self, record: &SubproblemRecord) -> Result<()> {
        let mut map = self.records.lock().map_err(|_| poisoned())?;
        map.insert(record.id.clone(), record.clone());
        trace!(subproblem = %record.id, state = ?record.state, "stored record (memory)");
        Ok(())
    }

    fn get(&self, id: &SubproblemId) -> Result<Option<SubproblemRecord>> {
        let map = self.records.lock().map_err(|_| poisoned())?;
        Ok(map.get(id).cloned())
    }

    fn scan(&self) -> Result<Vec<SubproblemRecord>> {
        let map = self.records.lock().map_err(|_| poisoned())?;
        Ok(map.values().cloned().collect())
    }

    fn load_manifest(&self) -> Result<Option<RunManifest>> {
        let manifest = self.manifest.lock().map_err(|_| poisoned())?;
        Ok(manifest.clone())
    }

    fn save_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let mut slot = self.manifest.lock().map_err(|_| poisoned())?;
        *slot = Some(manifest.clone());
        Ok(())
    }
}
