//! File-backed vector index.
//!
//! The whole index lives in memory behind an `RwLock` and is written to
//! `<dir>/index.json` on every change. Writes go to a temporary file that is
//! renamed over the previous snapshot, so a crash leaves either the old or the
//! new state on disk. A secondary map from source filename to chunk ids serves
//! the per-file delete and get operations.

use crate::models::{IndexEntry, IndexStats, ScoredChunk, StoredChunk};
use crate::store::{cosine_similarity, ensure_dimension, ensure_unique_ids};
use crate::traits::VectorIndex;
use crate::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

const SNAPSHOT_FILE: &str = "index.json";
const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    dimension: Option<usize>,
    updated_at: Option<DateTime<Utc>>,
    entries: BTreeMap<String, IndexEntry>,
}

#[derive(Debug, Default)]
struct IndexState {
    snapshot: Snapshot,
    /// source filename -> (ordinal, chunk id)
    by_source: BTreeMap<String, BTreeSet<(u64, String)>>,
}

impl IndexState {
    fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut by_source: BTreeMap<String, BTreeSet<(u64, String)>> = BTreeMap::new();
        for entry in snapshot.entries.values() {
            by_source
                .entry(entry.metadata.source_file.clone())
                .or_default()
                .insert((entry.ordinal, entry.id.clone()));
        }
        Self {
            snapshot,
            by_source,
        }
    }

    fn source_ids(&self, filename: &str) -> impl Iterator<Item = &String> {
        self.by_source
            .get(filename)
            .into_iter()
            .flatten()
            .map(|(_, id)| id)
    }
}

pub struct LocalStore {
    dir: PathBuf,
    state: RwLock<IndexState>,
}

impl LocalStore {
    /// Opens the index in `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(SNAPSHOT_FILE);
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Snapshot {
                version: SNAPSHOT_VERSION,
                ..Snapshot::default()
            },
            Err(error) => return Err(error.into()),
        };

        info!(
            path = %path.display(),
            entries = snapshot.entries.len(),
            "opened local vector index"
        );

        Ok(Self {
            dir,
            state: RwLock::new(IndexState::from_snapshot(snapshot)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(snapshot)?;
        let target = self.dir.join(SNAPSHOT_FILE);
        let staging = self
            .dir
            .join(format!("{SNAPSHOT_FILE}.{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&staging, &bytes).await?;
        if let Err(error) = tokio::fs::rename(&staging, &target).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(error.into());
        }
        debug!(entries = snapshot.entries.len(), bytes = bytes.len(), "persisted vector index");
        Ok(())
    }

    /// Applies `change` to a copy of the snapshot, persists it, then swaps it in.
    /// The in-memory state is untouched when validation or the disk write fails.
    async fn commit<F>(&self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&IndexState, &mut Snapshot) -> Result<(), StoreError> + Send,
    {
        let mut state = self.state.write().await;
        let mut next = state.snapshot.clone();
        change(&*state, &mut next)?;
        next.version = SNAPSHOT_VERSION;
        next.updated_at = Some(Utc::now());
        self.persist(&next).await?;
        *state = IndexState::from_snapshot(next);
        Ok(())
    }
}

fn insert_entries(snapshot: &mut Snapshot, entries: Vec<IndexEntry>) -> Result<(), StoreError> {
    ensure_unique_ids(&entries)?;
    snapshot.dimension = ensure_dimension(snapshot.dimension, &entries)?;
    for entry in entries {
        snapshot.entries.insert(entry.id.clone(), entry);
    }
    Ok(())
}

fn remove_source(state: &IndexState, snapshot: &mut Snapshot, filename: &str) -> usize {
    let mut removed = 0;
    for id in state.source_ids(filename) {
        if snapshot.entries.remove(id).is_some() {
            removed += 1;
        }
    }
    removed
}

#[async_trait]
impl VectorIndex for LocalStore {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        self.commit(|_, next| insert_entries(next, entries)).await
    }

    async fn delete_by_source(&self, filename: &str) -> Result<(), StoreError> {
        if !self.state.read().await.by_source.contains_key(filename) {
            return Ok(());
        }
        self.commit(|state, next| {
            let removed = remove_source(state, next, filename);
            debug!(file = filename, removed, "deleted chunks");
            Ok(())
        })
        .await
    }

    async fn get_by_source(&self, filename: &str) -> Result<Vec<StoredChunk>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .source_ids(filename)
            .filter_map(|id| state.snapshot.entries.get(id))
            .map(IndexEntry::to_stored)
            .collect())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError> {
        let state = self.state.read().await;
        if k == 0 || state.snapshot.entries.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(expected) = state.snapshot.dimension {
            if vector.len() != expected {
                return Err(StoreError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let mut scored = state
            .snapshot
            .entries
            .values()
            .map(|entry| (cosine_similarity(vector, &entry.vector), entry))
            .collect::<Vec<_>>();
        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .total_cmp(left_score)
                .then_with(|| left.id.cmp(&right.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| ScoredChunk {
                chunk: entry.to_stored(),
                score,
            })
            .collect())
    }

    /// Delete and insert land in the same snapshot write.
    async fn replace_source(
        &self,
        filename: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), StoreError> {
        if let Some(stray) = entries
            .iter()
            .find(|entry| entry.metadata.source_file != filename)
        {
            return Err(StoreError::Request(format!(
                "entry {} belongs to {}, not {filename}",
                stray.id, stray.metadata.source_file
            )));
        }

        self.commit(|state, next| {
            let removed = remove_source(state, next, filename);
            // A re-ingest may change the embedding model; only this file's old
            // vectors pinned the dimension if nothing else is left.
            if next.entries.is_empty() {
                next.dimension = None;
            }
            let inserted = entries.len();
            insert_entries(next, entries)?;
            debug!(file = filename, removed, inserted, "replaced chunks");
            Ok(())
        })
        .await
    }

    async fn stats(&self, peek: usize) -> Result<IndexStats, StoreError> {
        let state = self.state.read().await;
        Ok(IndexStats {
            total_entries: state.snapshot.entries.len(),
            sources: state.by_source.keys().cloned().collect(),
            dimension: state.snapshot.dimension,
            updated_at: state.snapshot.updated_at,
            peek: state
                .by_source
                .values()
                .flatten()
                .filter_map(|(_, id)| state.snapshot.entries.get(id))
                .take(peek)
                .map(IndexEntry::to_stored)
                .collect(),
        })
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.commit(|_, next| {
            next.entries.clear();
            next.dimension = None;
            Ok(())
        })
        .await
    }
}
