//! Fallback text recognition for image-only PDFs.
//!
//! Pages are rendered to PNG files in a scratch directory and each image is passed
//! through a [`TextRecognizer`]. The ingestion pipeline drives the pages one at a
//! time so it can report progress between them.

use crate::config::{OcrConfig, OcrEndpointConfig};
use crate::error::IngestError;
use crate::models::PageRecord;
use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, OnceLock};
use tempfile::TempDir;

/// Documents whose extracted text is shorter than this are treated as scanned.
pub const OCR_TEXT_THRESHOLD: usize = 50;

pub fn extracted_text_len(pages: &[PageRecord]) -> usize {
    pages
        .iter()
        .map(|page| page.text.trim().chars().count())
        .sum()
}

pub fn needs_ocr(pages: &[PageRecord]) -> bool {
    extracted_text_len(pages) < OCR_TEXT_THRESHOLD
}

pub trait PageRasterizer: Send + Sync {
    /// Renders every page of `pdf` into `out_dir`, returning image paths in page order.
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, IngestError>;
}

pub trait TextRecognizer: Send + Sync {
    fn recognize(&self, image: &Path) -> Result<String, IngestError>;
}

#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    pub binary: String,
    pub dpi: u32,
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(&self, pdf: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
        let prefix = out_dir.join("page");
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .map_err(|error| IngestError::Ocr(format!("failed to run {}: {error}", self.binary)))?;

        if !output.status.success() {
            return Err(IngestError::Ocr(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let images = collect_page_images(out_dir)?;
        if images.is_empty() {
            return Err(IngestError::Ocr(format!(
                "{} produced no page images for {}",
                self.binary,
                pdf.display()
            )));
        }
        Ok(images)
    }
}

/// Lists `page-N.png` files ordered by page number (pdftoppm zero-pads inconsistently).
fn collect_page_images(dir: &Path) -> Result<Vec<PathBuf>, IngestError> {
    static PAGE_NUMBER: OnceLock<Regex> = OnceLock::new();
    let page_number = PAGE_NUMBER.get_or_init(|| Regex::new(r"-(\d+)$").expect("static pattern"));

    let mut numbered = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if !is_png {
            continue;
        }

        let number = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| page_number.captures(stem))
            .and_then(|captures| captures[1].parse::<u32>().ok());
        if let Some(number) = number {
            numbered.push((number, path));
        }
    }

    numbered.sort_by_key(|(number, _)| *number);
    Ok(numbered.into_iter().map(|(_, path)| path).collect())
}

#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    pub binary: String,
    pub languages: String,
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, image: &Path) -> Result<String, IngestError> {
        let output = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .output()
            .map_err(|error| IngestError::Ocr(format!("failed to run {}: {error}", self.binary)))?;

        if !output.status.success() {
            return Err(IngestError::Ocr(format!(
                "{} exited with {} on {}: {}",
                self.binary,
                output.status,
                image.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(clean_recognized_text(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[derive(Debug, Clone, Serialize)]
struct OcrPageRequest<'a> {
    image_base64: String,
    mime_type: &'static str,
    languages: &'a str,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrPageResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    lines: Option<Vec<OcrLine>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OcrLine {
    #[serde(default)]
    text: Option<String>,
}

/// Sends each page image to a multimodal OCR endpoint as base64 PNG.
#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    config: OcrEndpointConfig,
    languages: String,
    // Built on first use: the blocking client must not be created on an async worker.
    client: OnceLock<Client>,
}

impl HttpRecognizer {
    pub fn new(config: OcrEndpointConfig, languages: impl Into<String>) -> Self {
        Self {
            config,
            languages: languages.into(),
            client: OnceLock::new(),
        }
    }
}

impl TextRecognizer for HttpRecognizer {
    fn recognize(&self, image: &Path) -> Result<String, IngestError> {
        let bytes = std::fs::read(image)?;
        let payload = OcrPageRequest {
            image_base64: STANDARD.encode(bytes),
            mime_type: "image/png",
            languages: &self.languages,
            source_path: image.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .get_or_init(Client::new)
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .map_err(|error| IngestError::Ocr(format!("OCR request failed: {error}")))?;
        if !response.status().is_success() {
            return Err(IngestError::Ocr(format!(
                "OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: OcrPageResponse = response
            .json()
            .map_err(|error| IngestError::Ocr(format!("invalid OCR response: {error}")))?;
        Ok(clean_recognized_text(&payload_to_text(&payload)))
    }
}

fn payload_to_text(payload: &OcrPageResponse) -> String {
    if let Some(text) = &payload.text {
        if !text.trim().is_empty() {
            return text.clone();
        }
    }

    payload
        .lines
        .iter()
        .flatten()
        .filter_map(|line| line.text.as_deref())
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Drops form feeds and trailing spaces, and caps blank-line runs at one empty line.
pub fn clean_recognized_text(raw: &str) -> String {
    static BLANK_RUNS: OnceLock<Regex> = OnceLock::new();
    let blank_runs = BLANK_RUNS.get_or_init(|| Regex::new(r"\n{3,}").expect("static pattern"));

    let without_trailing = raw
        .replace('\u{000c}', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    blank_runs
        .replace_all(&without_trailing, "\n\n")
        .trim()
        .to_string()
}

/// Page images for one document; the scratch directory is removed on drop.
pub struct RasterizedPages {
    _workdir: TempDir,
    images: Vec<PathBuf>,
}

impl RasterizedPages {
    pub fn images(&self) -> &[PathBuf] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[derive(Clone)]
pub struct OcrFallback {
    rasterizer: Arc<dyn PageRasterizer>,
    recognizer: Arc<dyn TextRecognizer>,
}

impl OcrFallback {
    pub fn new(rasterizer: Arc<dyn PageRasterizer>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            rasterizer,
            recognizer,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        let rasterizer = Arc::new(PdftoppmRasterizer {
            binary: config.pdftoppm_bin.clone(),
            dpi: config.dpi,
        });
        let recognizer: Arc<dyn TextRecognizer> = match &config.endpoint {
            Some(endpoint) => Arc::new(HttpRecognizer::new(endpoint.clone(), &config.languages)),
            None => Arc::new(TesseractRecognizer {
                binary: config.tesseract_bin.clone(),
                languages: config.languages.clone(),
            }),
        };
        Self::new(rasterizer, recognizer)
    }

    pub fn rasterize(&self, pdf: &Path) -> Result<RasterizedPages, IngestError> {
        let workdir = tempfile::Builder::new()
            .prefix("pdf-rag-ocr-")
            .tempdir()
            .map_err(|error| IngestError::Ocr(format!("failed to create scratch dir: {error}")))?;
        let images = self.rasterizer.rasterize(pdf, workdir.path())?;
        Ok(RasterizedPages {
            _workdir: workdir,
            images,
        })
    }

    pub fn recognize(&self, image: &Path) -> Result<String, IngestError> {
        self.recognizer.recognize(image)
    }

    /// Runs OCR over every page without progress reporting. Empty pages are dropped.
    pub fn recognize_document(&self, pdf: &Path) -> Result<Vec<PageRecord>, IngestError> {
        let rasterized = self.rasterize(pdf)?;
        let mut pages = Vec::new();
        for (index, image) in rasterized.images().iter().enumerate() {
            let text = self.recognize(image)?;
            if !text.trim().is_empty() {
                pages.push(PageRecord::new(index as u32, text));
            }
        }

        if pages.is_empty() {
            return Err(IngestError::EmptyContent(
                "No content found in PDF even with OCR".to_string(),
            ));
        }
        Ok(pages)
    }
}


#[cfg(test)]
mod tests {
    use super::fakes::{scanned, FailingRasterizer, FileTextRecognizer};
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    #[test]
    fn threshold_counts_trimmed_characters_across_pages() {
        let short = vec![PageRecord::new(0, "   short  "), PageRecord::new(1, "\n\n")];
        assert_eq!(extracted_text_len(&short), 5);
        assert!(needs_ocr(&short));

        let exactly = vec![
            PageRecord::new(0, "a".repeat(25)),
            PageRecord::new(1, "가".repeat(25)),
        ];
        assert_eq!(extracted_text_len(&exactly), OCR_TEXT_THRESHOLD);
        assert!(!needs_ocr(&exactly));
    }

    #[test]
    fn empty_ocr_pages_are_dropped_and_indices_kept() -> Result<(), Box<dyn std::error::Error>> {
        let ocr = scanned(&["첫 페이지 text", "   ", "third page"]);
        let pages = ocr.recognize_document(Path::new("scan.pdf"))?;

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].index, 0);
        assert_eq!(pages[1].index, 2);
        assert_eq!(pages[1].text, "third page");
        Ok(())
    }

    #[test]
    fn document_without_any_ocr_text_is_empty_content() {
        let ocr = scanned(&["", "  \n "]);
        let result = ocr.recognize_document(Path::new("blank.pdf"));
        assert!(matches!(result, Err(IngestError::EmptyContent(_))));
    }

    #[test]
    fn rasterizer_failure_is_an_ocr_error() {
        let ocr = OcrFallback::new(Arc::new(FailingRasterizer), Arc::new(FileTextRecognizer));
        assert!(matches!(
            ocr.recognize_document(Path::new("scan.pdf")),
            Err(IngestError::Ocr(_))
        ));
    }

    #[test]
    fn missing_binaries_surface_as_ocr_errors() {
        let rasterizer = PdftoppmRasterizer {
            binary: "pdftoppm-that-does-not-exist".to_string(),
            dpi: 150,
        };
        let dir = tempfile::tempdir().expect("tempdir");
        let result = rasterizer.rasterize(Path::new("scan.pdf"), dir.path());
        assert!(matches!(result, Err(IngestError::Ocr(_))));
    }

    #[test]
    fn page_images_sort_numerically() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        for name in ["page-10.png", "page-2.png", "page-1.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"")?;
        }

        let images = collect_page_images(dir.path())?;
        let names = images
            .iter()
            .filter_map(|path| path.file_name().and_then(|name| name.to_str()))
            .collect::<Vec<_>>();
        assert_eq!(names, ["page-1.png", "page-2.png", "page-10.png"]);
        Ok(())
    }

    #[test]
    fn recognized_text_is_cleaned() {
        let raw = "Line one   \n\n\n\nLine two\u{000c}\n";
        assert_eq!(clean_recognized_text(raw), "Line one\n\nLine two");
    }

    #[test]
    fn ocr_payload_falls_back_to_lines() {
        let response = OcrPageResponse {
            text: Some("  ".to_string()),
            lines: Some(vec![
                OcrLine {
                    text: Some("Hello  ".to_string()),
                },
                OcrLine { text: None },
                OcrLine {
                    text: Some("안녕하세요".to_string()),
                },
            ]),
        };
        assert_eq!(payload_to_text(&response), "Hello\n안녕하세요");
    }

    #[test]
    fn http_recognizer_posts_base64_image() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/ocr")
                .header("authorization", "Bearer secret")
                .body_contains("\"image_base64\":\"aW1n\"")
                .body_contains("\"languages\":\"kor+eng\"");
            then.status(200)
                .json_body(json!({ "text": "recognized page" }));
        });

        let dir = tempfile::tempdir()?;
        let image = dir.path().join("page-1.png");
        std::fs::write(&image, b"img")?;

        let recognizer = HttpRecognizer::new(
            OcrEndpointConfig {
                endpoint: server.url("/ocr"),
                api_key: Some("secret".to_string()),
            },
            "kor+eng",
        );
        let text = recognizer.recognize(&image)?;

        mock.assert();
        assert_eq!(text, "recognized page");
        Ok(())
    }

    #[test]
    fn http_recognizer_maps_failures_to_ocr_errors() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/ocr");
            then.status(500);
        });

        let dir = tempfile::tempdir().expect("tempdir");
        let image = dir.path().join("page-1.png");
        std::fs::write(&image, b"img").expect("write image");

        let recognizer = HttpRecognizer::new(
            OcrEndpointConfig {
                endpoint: server.url("/ocr"),
                api_key: None,
            },
            "eng",
        );
        assert!(matches!(recognizer.recognize(&image), Err(IngestError::Ocr(_))));
    }
}
