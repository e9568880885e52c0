// src/store/file.rs

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, trace};

use crate::dag::SubproblemId;
use crate::errors::{ProgressiveError, Result};
use crate::store::{JobRecordStore, RunManifest, SubproblemRecord};

/// Directory (under the store root) holding one file per subproblem.
pub const RECORDS_DIR: &str = "records";

/// Run manifest file (under the store root).
pub const MANIFEST_FILE: &str = "manifest.json";

/// Stores records as JSON files under `<root>/records/`.
///
/// Each write goes to a temporary file in the same directory, is synced, and
/// is then renamed over the previous record, so a crash leaves either the old
/// or the new record in place. The directory is synced after the rename.
///
/// Writes block; the orchestrator calls `put` from the blocking pool.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let records = root.join(RECORDS_DIR);
        fs::create_dir_all(&records)
            .map_err(|e| unavailable(&format!("creating store directory {records:?}"), e))?;
        info!(root = ?root, "opened file job record store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn records_dir(&self) -> PathBuf {
        self.root.join(RECORDS_DIR)
    }

    fn record_path(&self, id: &SubproblemId) -> PathBuf {
        self.records_dir().join(record_file_name(id))
    }
}

/// File name for a record: the id with unsafe characters replaced, plus a
/// short digest of the raw id so distinct ids never share a file.
pub fn record_file_name(id: &SubproblemId) -> String {
    let sanitized: String = id
        .as_str()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let digest = blake3::hash(id.as_str().as_bytes()).to_hex();
    format!("{}-{}.json", sanitized, &digest.as_str()[..8])
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> ProgressiveError {
    ProgressiveError::StoreUnavailable(format!("{context}: {err}"))
}

/// Replace `path` with `bytes` atomically.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| unavailable("resolving record directory", path.display()))?;
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| unavailable(&format!("creating temporary file in {dir:?}"), e))?;
    tmp.write_all(bytes)
        .map_err(|e| unavailable(&format!("writing temporary file for {path:?}"), e))?;
    tmp.flush()
        .map_err(|e| unavailable(&format!("flushing temporary file for {path:?}"), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| unavailable(&format!("syncing temporary file for {path:?}"), e))?;
    tmp.persist(path)
        .map_err(|e| unavailable(&format!("replacing {path:?}"), e.error))?;
    sync_dir(dir)
}

/// Make a rename in `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| unavailable(&format!("syncing directory {dir:?}"), e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(unavailable(&format!("reading {path:?}"), e)),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| unavailable(&format!("decoding {path:?}"), e))
}

impl JobRecordStore for FileStore {
    fn put(&self, record: &SubproblemRecord) -> Result<()> {
        let path = self.record_path(&record.id);
        let bytes = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &bytes)?;
        trace!(
            subproblem = %record.id,
            state = ?record.state,
            attempt = record.attempt,
            "stored record (file)"
        );
        Ok(())
    }

    fn get(&self, id: &SubproblemId) -> Result<Option<SubproblemRecord>> {
        read_json(&self.record_path(id))
    }

    fn scan(&self) -> Result<Vec<SubproblemRecord>> {
        let dir = self.records_dir();
        let entries =
            fs::read_dir(&dir).map_err(|e| unavailable(&format!("listing {dir:?}"), e))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| unavailable(&format!("listing {dir:?}"), e))?
                .path();
            // Skip in-progress temporary files.
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(record) = read_json::<SubproblemRecord>(&path)? {
                records.push(record);
            }
        }

        debug!(count = records.len(), root = ?self.root, "scanned job records");
        Ok(records)
    }

    fn load_manifest(&self) -> Result<Option<RunManifest>> {
        read_json(&self.root.join(MANIFEST_FILE))
    }

    fn save_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), &bytes)
    }
}
