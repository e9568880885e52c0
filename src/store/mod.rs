// src/store/mod.rs

//! Durable job records.
//!
//! The store maps each subproblem id to its latest recorded state. It is the
//! authority for resume-after-restart: the orchestrator's in-memory view is
//! rebuilt from it on startup, never the reverse.
//!
//! - [`file`] keeps one JSON document per subproblem, replaced atomically.
//! - [`memory`] keeps records in a map (tests, throwaway runs).

pub mod file;
pub mod memory;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dag::{ResultRef, Subproblem, SubproblemId, SubproblemState, Timestamps};
use crate::errors::Result;
use crate::exec::BackendHandle;
use crate::types::StoreMode;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Latest recorded state of one subproblem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubproblemRecord {
    pub id: SubproblemId,
    pub state: SubproblemState,
    pub attempt: u32,
    #[serde(default)]
    pub result: Option<ResultRef>,
    #[serde(default)]
    pub handle: Option<BackendHandle>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(flatten)]
    pub times: Timestamps,
}

impl SubproblemRecord {
    pub fn of(sp: &Subproblem) -> Self {
        Self {
            id: sp.id.clone(),
            state: sp.state,
            attempt: sp.attempt,
            result: sp.result.clone(),
            handle: sp.handle.clone(),
            failure: sp.last_failure.clone(),
            times: sp.times,
        }
    }
}

/// Identity of the run a store belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub fingerprint: String,
    pub subproblems: usize,
    pub created_at_ms: u64,
}

/// Abstract storage for job records.
///
/// Every `put` must be atomic per subproblem: a reader sees either the old or
/// the new record, never a mix. Only the orchestrator loop writes; readers
/// must tolerate snapshots that lag behind it.
pub trait JobRecordStore: Send + Sync {
    fn put(&self, record: &SubproblemRecord) -> Result<()>;
    fn get(&self, id: &SubproblemId) -> Result<Option<SubproblemRecord>>;
    /// Every stored record, in no particular order.
    fn scan(&self) -> Result<Vec<SubproblemRecord>>;

    fn load_manifest(&self) -> Result<Option<RunManifest>>;
    fn save_manifest(&self, manifest: &RunManifest) -> Result<()>;
}

impl<S: JobRecordStore + ?Sized> JobRecordStore for Arc<S> {
    fn put(&self, record: &SubproblemRecord) -> Result<()> {
        (**self).put(record)
    }

    fn get(&self, id: &SubproblemId) -> Result<Option<SubproblemRecord>> {
        (**self).get(id)
    }

    fn scan(&self) -> Result<Vec<SubproblemRecord>> {
        (**self).scan()
    }

    fn load_manifest(&self) -> Result<Option<RunManifest>> {
        (**self).load_manifest()
    }

    fn save_manifest(&self, manifest: &RunManifest) -> Result<()> {
        (**self).save_manifest(manifest)
    }
}

/// Open the store selected by `mode`.
pub fn open_store(mode: StoreMode, dir: PathBuf) -> Result<Arc<dyn JobRecordStore>> {
    match mode {
        StoreMode::File => Ok(Arc::new(FileStore::open(dir)?)),
        StoreMode::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}
