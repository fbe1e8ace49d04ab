//! Append-only event feed. `EventLog` is the collaborator surface the core writes to
//! and the aggregator reads from; `MemoryEventLog` is the in-process implementation,
//! optionally mirrored line-by-line to a JSONL file.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Event to be appended. The log assigns sequence number and digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub type_name: String,
    pub timestamp_ms: i64,
    pub payload: Value,
}

/// Event as stored by the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub seq: u64,
    pub type_name: String,
    pub timestamp_ms: i64,
    pub tx_digest: String,
    pub payload: Value,
}

/// Filter pushed down to the log: payload string-field equalities plus an inclusive time range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCriteria {
    pub equals: Vec<(String, String)>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

impl EventCriteria {
    pub fn matches(&self, ev: &RawEvent) -> bool {
        if let Some(from) = self.from_ms { if ev.timestamp_ms < from { return false; } }
        if let Some(to) = self.to_ms { if ev.timestamp_ms > to { return false; } }
        self.equals
            .iter()
            .all(|(field, want)| ev.payload.get(field).and_then(|v| v.as_str()) == Some(want.as_str()))
    }
}

pub trait EventLog: Send + Sync {
    fn append(&self, event: NewEvent) -> CoreResult<RawEvent>;
    /// Up to `limit` events of `type_name` matching `criteria`, newest first.
    fn query(&self, type_name: &str, criteria: &EventCriteria, limit: usize) -> CoreResult<Vec<RawEvent>>;
}

fn digest(seq: u64, ev: &NewEvent) -> String {
    let body = format!("{}|{}|{}|{}", seq, ev.type_name, ev.timestamp_ms, ev.payload);
    format!("0x{:016x}", xxhash_rust::xxh3::xxh3_64(body.as_bytes()))
}

struct LogState {
    events: Vec<RawEvent>,
    next_seq: u64,
}

pub struct MemoryEventLog {
    state: Mutex<LogState>,
    mirror: Option<PathBuf>,
}

impl Default for MemoryEventLog {
    fn default() -> Self { Self::new() }
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self { state: Mutex::new(LogState { events: Vec::new(), next_seq: 1 }), mirror: None }
    }

    /// Log mirrored to a JSONL file. Lines already in the file are replayed first.
    pub fn with_mirror<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut events = Vec::new();
        if path.exists() {
            let f = std::fs::File::open(&path)?;
            for (n, line) in std::io::BufReader::new(f).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() { continue; }
                match serde_json::from_str::<RawEvent>(&line) {
                    Ok(ev) => events.push(ev),
                    Err(e) => warn!(target: "carecore::audit", "skipping bad mirror line {} in '{}': {}", n + 1, path.display(), e),
                }
            }
        } else if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let next_seq = events.iter().map(|e| e.seq).max().unwrap_or(0) + 1;
        debug!(target: "carecore::audit", "event log mirror '{}' replayed {} events", path.display(), events.len());
        Ok(Self { state: Mutex::new(LogState { events, next_seq }), mirror: Some(path) })
    }

    pub fn len(&self) -> usize { self.state.lock().events.len() }
    pub fn is_empty(&self) -> bool { self.state.lock().events.is_empty() }

    pub fn all(&self) -> Vec<RawEvent> { self.state.lock().events.clone() }

    fn write_mirror(path: &Path, ev: &RawEvent) -> CoreResult<()> {
        let line = serde_json::to_string(ev).map_err(|e| CoreError::event_log(e.to_string()))?;
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| CoreError::event_log(format!("open mirror '{}': {}", path.display(), e)))?;
        writeln!(&mut f, "{}", line).map_err(|e| CoreError::event_log(format!("write mirror '{}': {}", path.display(), e)))
    }
}

impl EventLog for MemoryEventLog {
    fn append(&self, event: NewEvent) -> CoreResult<RawEvent> {
        let mut st = self.state.lock();
        let seq = st.next_seq;
        let raw = RawEvent {
            seq,
            tx_digest: digest(seq, &event),
            type_name: event.type_name,
            timestamp_ms: event.timestamp_ms,
            payload: event.payload,
        };
        // Mirror first: an event that is not durable is not appended
        if let Some(path) = self.mirror.as_ref() {
            Self::write_mirror(path, &raw)?;
        }
        st.next_seq += 1;
        st.events.push(raw.clone());
        Ok(raw)
    }

    fn query(&self, type_name: &str, criteria: &EventCriteria, limit: usize) -> CoreResult<Vec<RawEvent>> {
        let st = self.state.lock();
        let mut hits: Vec<&RawEvent> = st.events.iter().filter(|e| e.type_name == type_name && criteria.matches(e)).collect();
        // Appends need not arrive in timestamp order
        hits.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms).then(b.seq.cmp(&a.seq)));
        Ok(hits.into_iter().take(limit).cloned().collect())
    }
}
