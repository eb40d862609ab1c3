//! FaceGate Terminal - Embedding Store
//!
//! Holds the enrolled face embeddings. The dataset is an immutable
//! [`DatasetSnapshot`] behind an `Arc`; a sync builds the next snapshot off
//! to the side, persists it, and only then swaps the pointer. Readers that
//! grabbed the old snapshot keep using it untouched.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TerminalError, TerminalResult};
use crate::secure_fs::SecureFs;

pub const DEFAULT_DATASET_FILE: &str = "dataset.json";

// ═══════════════════════════════════════════════════════════════════════════
// WIRE FORMAT
// ═══════════════════════════════════════════════════════════════════════════

/// Dataset pushed by the server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub embedding_dimension: usize,
    #[serde(default)]
    pub dataset: Vec<SyncEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub embedding: Vec<f32>,
    /// Anything else the server attached to the record
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// On-disk form: the sync payload plus the time it was applied
#[derive(Debug, Serialize, Deserialize)]
struct DatasetFile {
    #[serde(rename = "lastSync", default)]
    last_sync: Option<DateTime<Utc>>,
    #[serde(flatten)]
    payload: SyncPayload,
}

// ═══════════════════════════════════════════════════════════════════════════
// RECORDS AND SNAPSHOTS
// ═══════════════════════════════════════════════════════════════════════════

/// One enrolled embedding. `vector` is unit length.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub id: String,
    pub display_name: Option<String>,
    pub vector: Vec<f32>,
    pub extra: Map<String, Value>,
}

impl EmbeddingRecord {
    /// Validate and L2-normalize one server entry
    fn from_entry(entry: SyncEntry, dimension: usize, position: usize) -> TerminalResult<Self> {
        if entry.id.trim().is_empty() {
            return Err(TerminalError::InvalidDataset(format!(
                "record {position} has an empty id"
            )));
        }
        if entry.embedding.len() != dimension {
            return Err(TerminalError::InvalidDataset(format!(
                "record {position} ({}) has {} values, expected {dimension}",
                entry.id,
                entry.embedding.len()
            )));
        }

        let vector = normalize(&entry.embedding).ok_or_else(|| {
            TerminalError::InvalidDataset(format!(
                "record {position} ({}) is not a finite non-zero vector",
                entry.id
            ))
        })?;

        Ok(Self {
            id: entry.id,
            display_name: entry.name,
            vector,
            extra: entry.extra,
        })
    }

    fn to_entry(&self) -> SyncEntry {
        SyncEntry {
            id: self.id.clone(),
            name: self.display_name.clone(),
            embedding: self.vector.clone(),
            extra: self.extra.clone(),
        }
    }
}

/// Nearest enrolled record for a query
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCandidate {
    pub id: String,
    pub display_name: Option<String>,
    pub distance: f32,
}

/// Immutable, complete view of one dataset generation
#[derive(Debug, Default)]
pub struct DatasetSnapshot {
    records: Vec<EmbeddingRecord>,
    dimension: usize,
    generation: u64,
    last_sync: Option<DateTime<Utc>>,
    people_count: usize,
}

impl DatasetSnapshot {
    fn new(
        records: Vec<EmbeddingRecord>,
        dimension: usize,
        generation: u64,
        last_sync: Option<DateTime<Utc>>,
    ) -> Self {
        let people_count = records
            .iter()
            .map(|r| r.id.as_str())
            .collect::<HashSet<_>>()
            .len();
        Self {
            records,
            dimension,
            generation,
            last_sync,
            people_count,
        }
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn is_ready(&self) -> bool {
        !self.records.is_empty()
    }

    /// Distinct enrolled identities
    pub fn people_count(&self) -> usize {
        self.people_count
    }

    pub fn embedding_count(&self) -> usize {
        self.records.len()
    }

    /// Minimum-L2 record; the first one wins ties.
    ///
    /// A query with a non-finite component has no nearest record.
    pub fn find_nearest(&self, query: &[f32]) -> Option<MatchCandidate> {
        if self.records.is_empty()
            || query.len() != self.dimension
            || !query.iter().all(|x| x.is_finite())
        {
            return None;
        }

        let mut best: Option<(usize, f32)> = None;
        for (i, record) in self.records.iter().enumerate() {
            let d = l2_distance(&record.vector, query);
            if !d.is_finite() {
                continue;
            }
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((i, d)),
            }
        }

        best.map(|(i, distance)| {
            let record = &self.records[i];
            MatchCandidate {
                id: record.id.clone(),
                display_name: record.display_name.clone(),
                distance,
            }
        })
    }

    /// Each identity once, in enrollment order, with its first display name
    pub fn roster(&self) -> Vec<(String, Option<String>)> {
        let mut seen = HashSet::new();
        let mut roster: Vec<(String, Option<String>)> = Vec::new();
        for record in &self.records {
            if seen.insert(record.id.as_str()) {
                roster.push((record.id.clone(), record.display_name.clone()));
            } else if let Some(name) = &record.display_name {
                if let Some(entry) = roster.iter_mut().find(|(id, _)| *id == record.id) {
                    entry.1.get_or_insert_with(|| name.clone());
                }
            }
        }
        roster
    }

    pub fn meta(&self) -> DatasetMeta {
        DatasetMeta {
            people_count: self.people_count,
            embeddings: self.records.len(),
            dimension: self.dimension,
            last_sync: self.last_sync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetMeta {
    pub people_count: usize,
    pub embeddings: usize,
    pub dimension: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

/// Outcome of a successful sync
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub people_count: usize,
    pub dimension: usize,
    pub last_sync: DateTime<Utc>,
    pub generation: u64,
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════

pub struct EmbeddingStore {
    fs: Option<SecureFs>,
    file_name: String,
    current: RwLock<Arc<DatasetSnapshot>>,
    /// Serializes build-persist-swap
    write_lock: Mutex<()>,
}

impl EmbeddingStore {
    /// Store persisted as `file_name` under `data_dir`. Nothing is read
    /// until [`load`](Self::load).
    pub fn open(data_dir: &Path, file_name: &str) -> Self {
        Self {
            fs: Some(SecureFs::new(data_dir)),
            file_name: file_name.to_string(),
            current: RwLock::new(Arc::new(DatasetSnapshot::default())),
            write_lock: Mutex::new(()),
        }
    }

    /// Store without persistence
    pub fn in_memory() -> Self {
        Self {
            fs: None,
            file_name: String::new(),
            current: RwLock::new(Arc::new(DatasetSnapshot::default())),
            write_lock: Mutex::new(()),
        }
    }

    /// Read the persisted dataset. A missing or corrupt file yields `None`
    /// and leaves the live dataset as it was.
    pub fn load(&self) -> Option<DatasetMeta> {
        let fs = self.fs.as_ref()?;
        let _guard = self.write_lock.lock();

        let data = match fs.read_file(&self.file_name) {
            Ok(Some(data)) => data,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("dataset unreadable: {}", e);
                return None;
            }
        };

        let file: DatasetFile = match serde_json::from_slice(&data) {
            Ok(file) => file,
            Err(e) => {
                log::warn!("dataset file corrupt, ignoring: {}", e);
                return None;
            }
        };

        let next_generation = self.current.read().generation + 1;
        match build_snapshot(file.payload, next_generation, file.last_sync) {
            Ok(snapshot) => {
                let meta = snapshot.meta();
                *self.current.write() = Arc::new(snapshot);
                log::info!(
                    "loaded {} embeddings for {} people (generation {})",
                    meta.embeddings,
                    meta.people_count,
                    next_generation
                );
                Some(meta)
            }
            Err(e) => {
                log::warn!("dataset file invalid, ignoring: {}", e);
                None
            }
        }
    }

    /// Replace the dataset wholesale. Any invalid record rejects the whole
    /// batch and the previous dataset stays live.
    pub fn apply_sync(
        &self,
        payload: SyncPayload,
        timestamp: DateTime<Utc>,
    ) -> TerminalResult<SyncResult> {
        let _guard = self.write_lock.lock();

        let next_generation = self.current.read().generation + 1;
        let snapshot = build_snapshot(payload, next_generation, Some(timestamp))?;

        if let Some(fs) = &self.fs {
            let file = DatasetFile {
                last_sync: Some(timestamp),
                payload: SyncPayload {
                    embedding_dimension: snapshot.dimension,
                    dataset: snapshot.records.iter().map(EmbeddingRecord::to_entry).collect(),
                },
            };
            fs.write_file(&self.file_name, &serde_json::to_vec(&file)?)?;
        }

        let result = SyncResult {
            people_count: snapshot.people_count,
            dimension: snapshot.dimension,
            last_sync: timestamp,
            generation: next_generation,
        };

        *self.current.write() = Arc::new(snapshot);
        log::info!(
            "dataset synced: {} people, dimension {}, generation {}",
            result.people_count,
            result.dimension,
            result.generation
        );
        Ok(result)
    }

    /// Parse a raw sync body and apply it
    pub fn apply_sync_bytes(
        &self,
        body: &[u8],
        timestamp: DateTime<Utc>,
    ) -> TerminalResult<SyncResult> {
        let payload: SyncPayload = serde_json::from_slice(body)
            .map_err(|e| TerminalError::InvalidDataset(format!("unparseable payload: {e}")))?;
        self.apply_sync(payload, timestamp)
    }

    /// Current snapshot; stays valid and unchanged across later syncs
    pub fn snapshot(&self) -> Arc<DatasetSnapshot> {
        Arc::clone(&self.current.read())
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }

    pub fn people_count(&self) -> usize {
        self.snapshot().people_count()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }

    pub fn find_nearest(&self, query: &[f32]) -> Option<MatchCandidate> {
        self.snapshot().find_nearest(query)
    }

    pub fn roster(&self) -> Vec<(String, Option<String>)> {
        self.snapshot().roster()
    }
}

fn build_snapshot(
    payload: SyncPayload,
    generation: u64,
    last_sync: Option<DateTime<Utc>>,
) -> TerminalResult<DatasetSnapshot> {
    let dimension = payload.embedding_dimension;
    if dimension == 0 && !payload.dataset.is_empty() {
        return Err(TerminalError::InvalidDataset(
            "embeddingDimension must be positive".into(),
        ));
    }

    let records = payload
        .dataset
        .into_iter()
        .enumerate()
        .map(|(i, entry)| EmbeddingRecord::from_entry(entry, dimension, i))
        .collect::<TerminalResult<Vec<_>>>()?;

    Ok(DatasetSnapshot::new(records, dimension, generation, last_sync))
}

/// Unit-length copy, or `None` for non-finite or zero vectors
pub fn normalize(vector: &[f32]) -> Option<Vec<f32>> {
    if vector.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let norm = vector
        .iter()
        .map(|&v| f64::from(v) * f64::from(v))
        .sum::<f64>()
        .sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(vector.iter().map(|&v| (f64::from(v) / norm) as f32).collect())
}

/// Euclidean distance between equal-length vectors
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum::<f64>()
        .sqrt() as f32
}
