use crate::chunking::split_pages;
use crate::embeddings::Embedder;
use crate::extractor::PdfExtractor;
use crate::ingest::{digest_file, is_pdf, source_filename};
use crate::locks::SourceLocks;
use crate::models::{DeleteOutcome, IndexEntry, IngestionOptions, PageRecord, ProgressEvent};
use crate::ocr::{extracted_text_len, OcrFallback, OCR_TEXT_THRESHOLD};
use crate::traits::VectorIndex;
use crate::{EmbeddingError, IngestError};
use async_stream::{stream, try_stream};
use futures::{pin_mut, Stream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub(crate) async fn run_blocking<T, F>(task: F) -> Result<T, IngestError>
where
    F: FnOnce() -> Result<T, IngestError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| IngestError::Task(error.to_string()))?
}

/// Drives files through load, OCR fallback, split, embed and index replacement.
#[derive(Clone)]
pub struct IngestCoordinator {
    extractor: Arc<dyn PdfExtractor>,
    ocr: OcrFallback,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    locks: SourceLocks,
}

impl IngestCoordinator {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        ocr: OcrFallback,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            extractor,
            ocr,
            embedder,
            index,
            locks: SourceLocks::new(),
        }
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Ingests one file, replacing whatever the index held for its filename.
    ///
    /// Nothing runs until the stream is polled. The stream ends after its
    /// first `Success` or `Error` event; errors never escape as `Err`.
    pub fn ingest(
        &self,
        path: impl Into<PathBuf>,
        options: IngestionOptions,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let this = self.clone();
        let path = path.into();

        stream! {
            let label = path.display().to_string();
            let stages = this.stages(path, options);
            pin_mut!(stages);

            while let Some(step) = stages.next().await {
                match step {
                    Ok(event) => yield event,
                    Err(error) => {
                        warn!(file = %label, stage = error.stage(), %error, "ingestion failed");
                        yield ProgressEvent::error(error.to_string());
                        break;
                    }
                }
            }
        }
    }

    fn stages(
        self,
        path: PathBuf,
        options: IngestionOptions,
    ) -> impl Stream<Item = Result<ProgressEvent, IngestError>> + Send + 'static {
        try_stream! {
            if !is_pdf(&path) {
                Err(IngestError::NotPdf(path.display().to_string()))?;
            }
            let filename = source_filename(&path)?;
            let _guard = self.locks.acquire(&filename).await;

            yield ProgressEvent::info("Loading PDF file...");
            let extractor = Arc::clone(&self.extractor);
            let load_path = path.clone();
            let mut pages = run_blocking(move || extractor.extract_pages(&load_path)).await?;

            let text_len = extracted_text_len(&pages);
            if text_len < OCR_TEXT_THRESHOLD {
                info!(file = %filename, chars = text_len, "low text content, falling back to OCR");
                yield ProgressEvent::info("Image-only PDF detected. Starting OCR...");

                let ocr = self.ocr.clone();
                let raster_path = path.clone();
                let rasterized = Arc::new(run_blocking(move || ocr.rasterize(&raster_path)).await?);
                let total = rasterized.len();

                let mut recognized = Vec::new();
                for index in 0..total {
                    yield ProgressEvent::info(format!("OCR processing page {}/{total}...", index + 1));
                    let ocr = self.ocr.clone();
                    let images = Arc::clone(&rasterized);
                    let text = run_blocking(move || ocr.recognize(&images.images()[index])).await?;
                    if text.trim().is_empty() {
                        debug!(file = %filename, page = index, "OCR found no text on page");
                    } else {
                        recognized.push(PageRecord::new(index as u32, text));
                    }
                }

                if recognized.is_empty() {
                    Err(IngestError::EmptyContent(
                        "No content found in PDF even with OCR".to_string(),
                    ))?;
                }
                pages = recognized;
            }

            yield ProgressEvent::info(format!("Splitting text ({} pages)...", pages.len()));
            let chunks = split_pages(&filename, &pages, options)?;

            yield ProgressEvent::info(format!(
                "Generated {} chunks. Indexing to vector index...",
                chunks.len()
            ));
            let embedder = Arc::clone(&self.embedder);
            let texts = chunks.iter().map(|chunk| chunk.content.clone()).collect::<Vec<_>>();
            let vectors = run_blocking(move || embedder.embed_batch(&texts).map_err(IngestError::from)).await?;
            if vectors.len() != chunks.len() {
                Err(IngestError::from(EmbeddingError::CountMismatch {
                    expected: chunks.len(),
                    actual: vectors.len(),
                }))?;
            }

            let entries = chunks
                .into_iter()
                .zip(vectors)
                .map(|(chunk, vector)| IndexEntry::from_chunk(chunk, vector))
                .collect::<Vec<_>>();
            let count = entries.len();
            self.index.replace_source(&filename, entries).await?;

            let checksum = run_blocking(move || digest_file(&path)).await.ok();
            info!(
                file = %filename,
                chunks = count,
                pages = pages.len(),
                checksum = checksum.as_deref().unwrap_or("unavailable"),
                "file ingested"
            );
            yield ProgressEvent::success(format!("Ingested {count} chunks from {filename}"));
        }
    }

    /// Ingests files one after another. Each file ends with its own terminal
    /// event; a final `Success` summarizes the batch.
    pub fn ingest_batch(
        &self,
        paths: Vec<PathBuf>,
        options: IngestionOptions,
    ) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let this = self.clone();

        stream! {
            let total = paths.len();
            let mut succeeded = 0usize;
            let mut failed = 0usize;

            for path in paths {
                let label = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                let events = this.ingest(path, options);
                pin_mut!(events);

                while let Some(event) = events.next().await {
                    match event {
                        ProgressEvent::Info(_) => yield event,
                        ProgressEvent::Success(_) => {
                            succeeded += 1;
                            yield event;
                        }
                        ProgressEvent::Error(message) => {
                            failed += 1;
                            yield ProgressEvent::error(format!("{label}: {message}"));
                        }
                    }
                }
            }

            info!(total, succeeded, failed, "batch finished");
            yield ProgressEvent::success(format!(
                "Processed {total} files ({succeeded} succeeded, {failed} failed)"
            ));
        }
    }

    /// Removes every chunk of `filename`. Waits for an in-flight ingest of the same file.
    pub async fn delete(&self, filename: &str) -> DeleteOutcome {
        let _guard = self.locks.acquire(filename).await;
        match self.index.delete_by_source(filename).await {
            Ok(()) => {
                info!(file = %filename, "deleted source");
                DeleteOutcome {
                    ok: true,
                    message: format!("Deleted content for {filename}"),
                }
            }
            Err(error) => {
                warn!(file = %filename, %error, "delete failed");
                DeleteOutcome {
                    ok: false,
                    message: error.to_string(),
                }
            }
        }
    }
}
