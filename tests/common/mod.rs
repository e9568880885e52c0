#![allow(dead_code)]

use std::sync::Arc;

use progressive::exec::LocalBackend;
use progressive::store::MemoryStore;

pub use progressive_test_utils::{
    fast_options, init_tracing, project, topology, with_timeout, RecordingBackend,
    ScriptedExecutor, Step,
};

/// Local backend over `executor`, wrapped for recording.
pub fn recording(executor: Arc<ScriptedExecutor>, max_concurrency: usize) -> RecordingBackend<LocalBackend> {
    RecordingBackend::new(LocalBackend::new(executor, max_concurrency))
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// The four-leaf balanced example tree.
pub const BALANCED_4: &str = "((A,B),(C,D));";
