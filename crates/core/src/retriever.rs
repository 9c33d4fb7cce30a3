use crate::embeddings::Embedder;
use crate::models::ScoredChunk;
use crate::orchestrator::run_blocking;
use crate::traits::VectorIndex;
use crate::IngestError;
use std::sync::Arc;
use tracing::{debug, warn};

/// Similarity search over the index, embedding queries with the ingestion embedder.
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Top `k` chunks with scores, most similar first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, IngestError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        let vector = run_blocking(move || embedder.embed(&text).map_err(IngestError::from)).await?;
        let hits = self.index.query(&vector, k).await?;
        debug!(k, hits = hits.len(), "retrieved chunks");
        Ok(hits)
    }

    /// Passage texts for `query`. Failures are logged and yield no passages.
    pub async fn retrieve(&self, query: &str, k: usize) -> Vec<String> {
        match self.search(query, k).await {
            Ok(hits) => hits.into_iter().map(|hit| hit.chunk.content).collect(),
            Err(error) => {
                warn!(%error, "retrieval failed");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::fakes::FailingEmbedder;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::models::{ChunkMetadata, IndexEntry};
    use crate::stores::LocalStore;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir, passages: &[&str]) -> (Arc<dyn Embedder>, Arc<dyn VectorIndex>) {
        let embedder: Arc<dyn Embedder> = Arc::new(CharacterNgramEmbedder::default());
        let index: Arc<dyn VectorIndex> =
            Arc::new(LocalStore::open(dir.path()).await.expect("open"));
        let entries = passages
            .iter()
            .enumerate()
            .map(|(ordinal, text)| IndexEntry {
                id: format!("guide.pdf_{ordinal}"),
                ordinal: ordinal as u64,
                vector: embedder.embed(text).expect("embed"),
                content: text.to_string(),
                metadata: ChunkMetadata {
                    source_file: "guide.pdf".to_string(),
                    page: 0,
                },
            })
            .collect();
        index.upsert(entries).await.expect("upsert");
        (embedder, index)
    }

    #[tokio::test]
    async fn closest_passage_ranks_first() {
        let dir = TempDir::new().expect("tempdir");
        let (embedder, index) = seeded(
            &dir,
            &[
                "replace the hydraulic pump seals",
                "quarterly revenue grew in europe",
                "the cafeteria opens at eight",
            ],
        )
        .await;
        let retriever = Retriever::new(embedder, index);

        let passages = retriever.retrieve("hydraulic pump seals", 2).await;
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0], "replace the hydraulic pump seals");
    }

    #[tokio::test]
    async fn fewer_entries_than_k_returns_all() {
        let dir = TempDir::new().expect("tempdir");
        let (embedder, index) = seeded(&dir, &["only passage"]).await;
        let retriever = Retriever::new(embedder, index);

        assert_eq!(retriever.retrieve("anything", 10).await.len(), 1);
        assert!(retriever.retrieve("anything", 0).await.is_empty());
    }

    #[tokio::test]
    async fn embedding_failure_degrades_to_empty() {
        let dir = TempDir::new().expect("tempdir");
        let (_, index) = seeded(&dir, &["some passage"]).await;
        let retriever = Retriever::new(Arc::new(FailingEmbedder), index);

        assert!(retriever.search("query", 3).await.is_err());
        assert!(retriever.retrieve("query", 3).await.is_empty());
    }
}
