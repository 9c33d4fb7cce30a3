use crate::config::PipelineConfig;
use crate::embeddings::{build_embedder, Embedder};
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::models::{DeleteOutcome, IndexStats, IngestionOptions, ProgressEvent, ScoredChunk, StoredChunk};
use crate::ocr::OcrFallback;
use crate::orchestrator::IngestCoordinator;
use crate::retriever::Retriever;
use crate::stores::{LocalStore, QdrantStore};
use crate::traits::VectorIndex;
use crate::IngestError;
use futures::Stream;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Entry point tying ingestion, deletion and retrieval to one embedder and index.
#[derive(Clone)]
pub struct RagService {
    coordinator: IngestCoordinator,
    retriever: Retriever,
}

impl RagService {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        ocr: OcrFallback,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        let retriever = Retriever::new(Arc::clone(&embedder), Arc::clone(&index));
        Self {
            coordinator: IngestCoordinator::new(extractor, ocr, embedder, index),
            retriever,
        }
    }

    pub async fn from_config(config: &PipelineConfig) -> Result<Self, IngestError> {
        let embedder = build_embedder(&config.embedding)?;
        let index: Arc<dyn VectorIndex> = match &config.qdrant {
            Some(qdrant) => {
                let store =
                    QdrantStore::new(&qdrant.url, qdrant.collection.clone(), embedder.dimensions())?;
                store.ensure_collection().await?;
                Arc::new(store)
            }
            None => Arc::new(LocalStore::open(&config.index_dir).await?),
        };

        info!(
            backend = index.backend(),
            model = embedder.model_name(),
            "rag service ready"
        );
        Ok(Self::new(
            Arc::new(LopdfExtractor),
            OcrFallback::from_config(&config.ocr),
            embedder,
            index,
        ))
    }

    pub fn ingest(
        &self,
        path: impl Into<PathBuf>,
        options: IngestionOptions,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        self.coordinator.ingest(path, options)
    }

    pub fn ingest_batch(
        &self,
        paths: Vec<PathBuf>,
        options: IngestionOptions,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        self.coordinator.ingest_batch(paths, options)
    }

    pub async fn delete(&self, filename: &str) -> DeleteOutcome {
        self.coordinator.delete(filename).await
    }

    pub async fn get_chunks(&self, filename: &str) -> Result<Vec<StoredChunk>, IngestError> {
        Ok(self.coordinator.index().get_by_source(filename).await?)
    }

    /// Passage texts ranked by similarity. Index errors propagate.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<String>, IngestError> {
        let hits = self.retriever.search(text, k).await?;
        Ok(hits.into_iter().map(|hit| hit.chunk.content).collect())
    }

    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>, IngestError> {
        self.retriever.search(text, k).await
    }

    /// Like [`RagService::query`], but logs failures and returns no passages.
    pub async fn retrieve(&self, text: &str, k: usize) -> Vec<String> {
        self.retriever.retrieve(text, k).await
    }

    pub async fn stats(&self, peek: usize) -> Result<IndexStats, IngestError> {
        Ok(self.coordinator.index().stats(peek).await?)
    }

    pub async fn clear(&self) -> Result<(), IngestError> {
        self.coordinator.index().clear().await?;
        info!("index cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::fixtures::write_pdf;
    use crate::models::DEFAULT_TOP_K;
    use futures::StreamExt;
    use tempfile::TempDir;

    async fn service(dir: &TempDir) -> RagService {
        let config = PipelineConfig {
            index_dir: dir.path().join("index"),
            ..PipelineConfig::default()
        };
        RagService::from_config(&config).await.expect("service")
    }

    #[tokio::test]
    async fn text_pdf_round_trips_through_the_service() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let pdf = dir.path().join("manual.pdf");
        write_pdf(
            &pdf,
            &[Some(
                "Hydraulic pump maintenance requires checking the relief valve every week",
            )],
        )?;
        let rag = service(&dir).await;

        let events = rag
            .ingest(&pdf, IngestionOptions::default())
            .collect::<Vec<_>>()
            .await;
        assert!(
            matches!(events.last(), Some(ProgressEvent::Success(_))),
            "unexpected events: {events:?}"
        );

        let chunks = rag.get_chunks("manual.pdf").await?;
        assert!(!chunks.is_empty());
        assert!(chunks[0].content.contains("Hydraulic"));

        let passages = rag.query("relief valve", DEFAULT_TOP_K).await?;
        assert_eq!(passages.len(), chunks.len());

        let stats = rag.stats(1).await?;
        assert_eq!(stats.sources, vec!["manual.pdf".to_string()]);
        assert_eq!(stats.peek.len(), 1);

        assert!(rag.delete("manual.pdf").await.ok);
        assert!(rag.get_chunks("manual.pdf").await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn index_survives_a_restart() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let pdf = dir.path().join("notes.pdf");
        write_pdf(
            &pdf,
            &[Some("Field notes about calibrating the pressure sensor array")],
        )?;

        let first = service(&dir).await;
        first
            .ingest(&pdf, IngestionOptions::default())
            .collect::<Vec<_>>()
            .await;
        let before = first.get_chunks("notes.pdf").await?;
        drop(first);

        let second = service(&dir).await;
        assert_eq!(second.get_chunks("notes.pdf").await?, before);

        second.clear().await?;
        assert_eq!(second.stats(0).await?.total_entries, 0);
        Ok(())
    }
}
