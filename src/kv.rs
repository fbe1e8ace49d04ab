//! Key-value collaborator used for record metadata and role assignments.
//!
//! `KeyValueStore` is the abstract surface (`put/get/scan` plus an insert-if-absent
//! primitive for write-once keys). `MemoryKvStore` is the in-process implementation:
//! an ordered map behind a `parking_lot::RwLock`, optionally snapshotted to disk with
//! bincode so a restart keeps what was written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

pub trait KeyValueStore: Send + Sync {
    fn put(&self, key: &str, value: Vec<u8>) -> CoreResult<()>;
    fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;
    /// All entries whose key starts with `prefix`, in key order.
    fn scan(&self, prefix: &str) -> CoreResult<Vec<(String, Vec<u8>)>>;
    /// Insert only when the key is absent. Returns false (and writes nothing) otherwise.
    fn insert_new(&self, key: &str, value: Vec<u8>) -> CoreResult<bool>;
}

pub fn put_json<T: Serialize>(kv: &dyn KeyValueStore, key: &str, value: &T) -> CoreResult<()> {
    kv.put(key, serde_json::to_vec(value)?)
}

pub fn insert_new_json<T: Serialize>(kv: &dyn KeyValueStore, key: &str, value: &T) -> CoreResult<bool> {
    kv.insert_new(key, serde_json::to_vec(value)?)
}

pub fn get_json<T: DeserializeOwned>(kv: &dyn KeyValueStore, key: &str) -> CoreResult<Option<T>> {
    match kv.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Decode every value under `prefix`; entries that fail to decode are skipped with a warning.
pub fn scan_json<T: DeserializeOwned>(kv: &dyn KeyValueStore, prefix: &str) -> CoreResult<Vec<T>> {
    let mut out = Vec::new();
    for (key, bytes) in kv.scan(prefix)? {
        match serde_json::from_slice::<T>(&bytes) {
            Ok(v) => out.push(v),
            Err(e) => warn!(target: "carecore::kv", "skipping undecodable value key='{}': {}", key, e),
        }
    }
    Ok(out)
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    created_ms: i64,
    entries: Vec<(String, Vec<u8>)>,
}

#[derive(Clone, Default)]
pub struct MemoryKvStore {
    map: Arc<parking_lot::RwLock<BTreeMap<String, Vec<u8>>>>,
    snapshot_path: Option<PathBuf>,
    /// Guard to ensure we only spawn one persistence thread
    persist_started: Arc<parking_lot::Mutex<bool>>,
}

impl MemoryKvStore {
    pub fn new() -> Self { Self::default() }

    /// Store backed by a snapshot file; existing snapshot contents are loaded immediately.
    pub fn with_snapshot<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let s = Self { snapshot_path: Some(path.as_ref().to_path_buf()), ..Self::default() };
        s.load_snapshot()?;
        Ok(s)
    }

    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    pub fn save_snapshot(&self) -> CoreResult<()> {
        let Some(path) = self.snapshot_path.as_ref() else { return Ok(()); };
        let entries: Vec<(String, Vec<u8>)> = self.map.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let snap = Snapshot { version: 1, created_ms: chrono::Utc::now().timestamp_millis(), entries };
        let bytes = bincode::serialize(&snap).map_err(|e| CoreError::internal(format!("snapshot encode: {}", e)))?;
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir).ok(); }
        let tmp = path.with_extension("bin.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, path)?;
        debug!(target: "carecore::kv", "snapshot saved path='{}' entries={}", path.display(), snap.entries.len());
        Ok(())
    }

    /// Load snapshot from disk into memory. A missing file is not an error.
    pub fn load_snapshot(&self) -> CoreResult<()> {
        let Some(path) = self.snapshot_path.as_ref() else { return Ok(()); };
        if !path.exists() { return Ok(()); }
        let bytes = std::fs::read(path)?;
        let snap: Snapshot = bincode::deserialize(&bytes).map_err(|e| CoreError::internal(format!("snapshot decode: {}", e)))?;
        let mut w = self.map.write();
        for (k, v) in snap.entries {
            w.insert(k, v);
        }
        debug!(target: "carecore::kv", "snapshot loaded path='{}' entries={}", path.display(), w.len());
        Ok(())
    }

    /// Spawn a background thread that snapshots at a fixed interval. Idempotent.
    pub fn start_snapshot_loop(&self, interval: Duration) {
        if self.snapshot_path.is_none() { return; }
        let mut started = self.persist_started.lock();
        if *started { return; }
        *started = true;
        drop(started);
        let this = self.clone();
        std::thread::spawn(move || loop {
            std::thread::sleep(interval);
            if let Err(e) = this.save_snapshot() {
                warn!(target: "carecore::kv", "snapshot failed: {}", e);
            }
        });
    }
}

impl KeyValueStore for MemoryKvStore {
    fn put(&self, key: &str, value: Vec<u8>) -> CoreResult<()> {
        self.map.write().insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan(&self, prefix: &str) -> CoreResult<Vec<(String, Vec<u8>)>> {
        let r = self.map.read();
        Ok(r
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn insert_new(&self, key: &str, value: Vec<u8>) -> CoreResult<bool> {
        let mut w = self.map.write();
        if w.contains_key(key) { return Ok(false); }
        w.insert(key.to_string(), value);
        Ok(true)
    }
}
