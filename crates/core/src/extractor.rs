use crate::error::IngestError;
use crate::models::PageRecord;
use lopdf::Document;
use std::path::Path;
use tracing::debug;

pub trait PdfExtractor: Send + Sync {
    /// One record per page in document order, including pages without text.
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, IngestError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, IngestError> {
        let document = Document::load(path).map_err(|error| {
            IngestError::Extraction(format!("{}: {error}", path.display()))
        })?;

        let page_numbers = document.get_pages().into_keys().collect::<Vec<_>>();
        if page_numbers.is_empty() {
            return Err(IngestError::Extraction(format!(
                "pdf has no pages: {}",
                path.display()
            )));
        }

        let mut pages = Vec::with_capacity(page_numbers.len());
        for (index, page_no) in page_numbers.into_iter().enumerate() {
            // Scanned pages often carry no text operators at all.
            let text = match document.extract_text(&[page_no]) {
                Ok(text) => text,
                Err(error) => {
                    debug!(path = %path.display(), page = page_no, %error, "page has no extractable text");
                    String::new()
                }
            };

            pages.push(PageRecord::new(index as u32, text));
        }

        Ok(pages)
    }
}

pub fn extract_page_texts(path: &Path) -> Result<Vec<PageRecord>, IngestError> {
    LopdfExtractor.extract_pages(path)
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_pdf;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn pages_are_returned_in_document_order() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("manual.pdf");
        write_pdf(&path, &[Some("Pump overview"), None, Some("Valve maintenance")])?;

        let pages = extract_page_texts(&path)?;

        assert_eq!(pages.len(), 3);
        assert_eq!(pages.iter().map(|page| page.index).collect::<Vec<_>>(), [0, 1, 2]);
        assert!(pages[0].text.contains("Pump overview"));
        assert!(pages[1].text.trim().is_empty());
        assert!(pages[2].text.contains("Valve maintenance"));
        Ok(())
    }

    #[test]
    fn corrupt_file_is_an_extraction_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%broken")?;

        let result = extract_page_texts(&path);

        assert!(matches!(result, Err(IngestError::Extraction(_))));
        Ok(())
    }

    #[test]
    fn missing_file_is_an_extraction_error() {
        let result = extract_page_texts(Path::new("/definitely/not/here.pdf"));
        assert!(matches!(result, Err(IngestError::Extraction(_))));
    }
}
