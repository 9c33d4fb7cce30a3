use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use futures::{pin_mut, Stream, StreamExt};
use pdf_rag_core::{
    discover_pdf_files, IngestionOptions, PipelineConfig, ProgressEvent, QdrantConfig, RagService,
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_TOP_K,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "pdf-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of the local chunk index
    #[arg(long, env = "PDF_RAG_INDEX_DIR", global = true)]
    index_dir: Option<PathBuf>,

    /// Qdrant base URL; when set, chunks are stored in Qdrant instead of the local index
    #[arg(long, env = "PDF_RAG_QDRANT_URL", global = true)]
    qdrant_url: Option<String>,

    /// Qdrant collection
    #[arg(long, env = "PDF_RAG_QDRANT_COLLECTION", default_value = "pdf_chunks", global = true)]
    qdrant_collection: String,

    /// Embedding backend: ngram, http or fastembed
    #[arg(long, env = "PDF_RAG_EMBEDDING_BACKEND", global = true)]
    embedding_backend: Option<String>,

    /// Text-embeddings-inference endpoint for the http backend
    #[arg(long, env = "PDF_RAG_EMBEDDING_ENDPOINT", global = true)]
    embedding_endpoint: Option<String>,

    /// Tesseract language list used by OCR
    #[arg(long, env = "PDF_RAG_OCR_LANGUAGES", global = true)]
    ocr_languages: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest PDF files, replacing any chunks previously stored for the same filename.
    Ingest {
        /// PDF files to ingest.
        paths: Vec<PathBuf>,
        /// Folder searched recursively for PDFs.
        #[arg(long)]
        folder: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
        chunk_overlap: usize,
    },
    /// Delete every chunk of a file.
    Delete { filename: String },
    /// Print the stored chunks of a file in chunk order.
    Chunks { filename: String },
    /// Print the passages most similar to a query.
    Query {
        text: String,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },
    /// Print index statistics.
    Stats {
        /// Number of entries to include as a sample.
        #[arg(long, default_value = "3")]
        peek: usize,
    },
    /// Remove every chunk from the index.
    Clear,
}

impl Cli {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::from_env().context("invalid PDF_RAG_* environment")?;
        if let Some(dir) = &self.index_dir {
            config.index_dir = dir.clone();
        }
        if let Some(url) = &self.qdrant_url {
            config.qdrant = Some(QdrantConfig {
                url: url.clone(),
                collection: self.qdrant_collection.clone(),
            });
        }
        if let Some(backend) = &self.embedding_backend {
            config.embedding.backend = backend.parse()?;
        }
        if let Some(endpoint) = &self.embedding_endpoint {
            config.embedding.endpoint = Some(endpoint.clone());
        }
        if let Some(languages) = &self.ocr_languages {
            config.ocr.languages = languages.clone();
        }
        Ok(config)
    }
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

async fn print_events(events: impl Stream<Item = ProgressEvent>) -> anyhow::Result<bool> {
    pin_mut!(events);
    let mut failed = false;
    while let Some(event) = events.next().await {
        failed |= matches!(event, ProgressEvent::Error(_));
        print_json(&event)?;
    }
    Ok(!failed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = cli.pipeline_config()?;
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_dir = %config.index_dir.display(),
        "pdf-rag boot"
    );

    let service = RagService::from_config(&config)
        .await
        .context("failed to open the chunk index")?;

    match cli.command {
        Command::Ingest {
            mut paths,
            folder,
            chunk_size,
            chunk_overlap,
        } => {
            if let Some(folder) = folder {
                let found = discover_pdf_files(&folder);
                if found.is_empty() {
                    warn!(folder = %folder.display(), "no pdf files found");
                }
                paths.extend(found);
            }
            anyhow::ensure!(!paths.is_empty(), "nothing to ingest: pass PDF paths or --folder");

            let options = IngestionOptions::new(chunk_size, chunk_overlap);
            let succeeded = if paths.len() == 1 {
                print_events(service.ingest(paths.remove(0), options)).await?
            } else {
                print_events(service.ingest_batch(paths, options)).await?
            };
            if !succeeded {
                std::process::exit(1);
            }
        }
        Command::Delete { filename } => {
            let outcome = service.delete(&filename).await;
            print_json(&outcome)?;
            if !outcome.ok {
                std::process::exit(1);
            }
        }
        Command::Chunks { filename } => {
            let chunks = service.get_chunks(&filename).await?;
            print_json(&chunks)?;
        }
        Command::Query { text, k } => {
            let passages = service.query(&text, k).await?;
            print_json(&passages)?;
        }
        Command::Stats { peek } => {
            let stats = service.stats(peek).await?;
            print_json(&stats)?;
        }
        Command::Clear => {
            service.clear().await?;
            print_json(&json!({ "ok": true, "message": "Index cleared" }))?;
        }
    }

    Ok(())
}
