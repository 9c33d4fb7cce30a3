use crate::models::{IndexEntry, IndexStats, ScoredChunk, StoredChunk};
use crate::StoreError;
use async_trait::async_trait;

/// Persisted chunk store keyed by chunk id, filterable by source filename.
///
/// Writes are serialized against each other and against reads; reads may run
/// concurrently.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Inserts or overwrites entries. Ids must be unique within one call.
    async fn upsert(&self, entries: Vec<IndexEntry>) -> Result<(), StoreError>;

    /// Removes every entry whose source is `filename`; succeeds when there are none.
    async fn delete_by_source(&self, filename: &str) -> Result<(), StoreError>;

    /// Entries for `filename` in chunk order.
    async fn get_by_source(&self, filename: &str) -> Result<Vec<StoredChunk>, StoreError>;

    /// At most `k` entries ranked by descending cosine similarity.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Deletes all entries for `filename`, then inserts `entries`.
    ///
    /// Backends that cannot do both in one write leave the source empty if the
    /// insert fails after the delete.
    async fn replace_source(
        &self,
        filename: &str,
        entries: Vec<IndexEntry>,
    ) -> Result<(), StoreError> {
        self.delete_by_source(filename).await?;
        self.upsert(entries).await
    }

    async fn stats(&self, peek: usize) -> Result<IndexStats, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;
}
