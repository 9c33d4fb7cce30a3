use crate::error::IngestError;
use crate::models::{chunk_id, Chunk, ChunkMetadata, IngestionOptions, PageRecord};
use std::collections::VecDeque;

/// Boundaries tried in order: paragraph, line, word, then a hard character cut.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl From<IngestionOptions> for ChunkingConfig {
    fn from(value: IngestionOptions) -> Self {
        Self {
            chunk_size: value.chunk_size,
            chunk_overlap: value.chunk_overlap,
        }
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits `text` so every piece after the first starts with `separator`, keeping
/// the pieces contiguous in the source string.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(start, ch)| &text[start..start + ch.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (position, _) in text.match_indices(separator) {
        if position > start {
            pieces.push(&text[start..position]);
        }
        start = position;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Recursive character splitting with overlapping tails.
///
/// Pieces shorter than `chunk_size` are merged greedily; longer pieces are split
/// again with the next separator. When a chunk is emitted, pieces are dropped from
/// its front until at most `chunk_overlap` characters remain, and those carry over
/// into the next chunk.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &DEFAULT_SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut separator = separators.last().copied().unwrap_or("");
    let mut remaining: &[&str] = &[];
    for (position, candidate) in separators.iter().enumerate() {
        if candidate.is_empty() {
            separator = candidate;
            break;
        }
        if text.contains(candidate) {
            separator = candidate;
            remaining = &separators[position + 1..];
            break;
        }
    }

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();
    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, config));
            fitting.clear();
        }
        if remaining.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        } else {
            chunks.extend(split_recursive(piece, remaining, config));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, config));
    }
    chunks
}

fn merge_pieces(pieces: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut merged = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let len = char_len(piece);
        if total + len > config.chunk_size && !window.is_empty() {
            push_trimmed(&mut merged, &window);
            while total > config.chunk_overlap || (total > 0 && total + len > config.chunk_size) {
                let Some(front) = window.pop_front() else {
                    break;
                };
                total -= char_len(front);
            }
        }
        window.push_back(piece);
        total += len;
    }

    push_trimmed(&mut merged, &window);
    merged
}

fn push_trimmed(merged: &mut Vec<String>, window: &VecDeque<&str>) {
    let joined = window.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        merged.push(trimmed.to_string());
    }
}

/// Splits every page and numbers the chunks contiguously from 0 across the file.
pub fn split_pages(
    filename: &str,
    pages: &[PageRecord],
    options: IngestionOptions,
) -> Result<Vec<Chunk>, IngestError> {
    options.validate()?;
    let config = ChunkingConfig::from(options);

    let mut chunks = Vec::new();
    let mut ordinal = 0u64;
    for page in pages {
        for content in split_text(&page.text, config) {
            chunks.push(Chunk {
                id: chunk_id(filename, ordinal),
                ordinal,
                content,
                metadata: ChunkMetadata {
                    source_file: filename.to_string(),
                    page: page.index,
                },
            });
            ordinal += 1;
        }
    }

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(chunk_size: usize, chunk_overlap: usize) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size,
            chunk_overlap,
        }
    }

    fn longest_overlap(left: &str, right: &str) -> usize {
        let max = left.len().min(right.len());
        (1..=max)
            .rev()
            .find(|len| right.is_char_boundary(*len) && left.ends_with(&right[..*len]))
            .unwrap_or(0)
    }

    fn sample_document(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|paragraph| {
                (0..12)
                    .map(|sentence| {
                        format!(
                            "Sentence {sentence} of paragraph {paragraph} mentions pump{paragraph}x{sentence} and valve{sentence}y{paragraph}."
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn short_page_yields_single_chunk() {
        let chunks = split_text("  A short page about hydraulic pumps.\n", config(1000, 200));
        assert_eq!(chunks, vec!["A short page about hydraulic pumps.".to_string()]);
    }

    #[test]
    fn blank_page_yields_nothing() {
        assert!(split_text(" \n\n \t", config(1000, 200)).is_empty());
    }

    #[test]
    fn default_parameters_respect_size_and_overlap() {
        let text = sample_document(8);
        let chunks = split_text(&text, config(1000, 200));

        assert!(chunks.len() > 3);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1000, "chunk too long: {}", chunk.len());
            assert!(text.contains(chunk.as_str()));
        }
        for pair in chunks.windows(2) {
            assert!(longest_overlap(&pair[0], &pair[1]) <= 200);
        }
    }

    #[test]
    fn word_boundaries_carry_an_overlap() {
        let text = (0..400).map(|n| format!("word{n}")).collect::<Vec<_>>().join(" ");
        let chunks = split_text(&text, config(100, 30));

        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let overlap = longest_overlap(&pair[0], &pair[1]);
            assert!(overlap > 0, "expected overlap between {:?} and {:?}", pair[0], pair[1]);
            assert!(overlap <= 30);
        }
    }

    #[test]
    fn unbroken_text_falls_back_to_character_cuts() {
        let text = "가".repeat(25);
        let chunks = split_text(&text, config(10, 2));

        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 10));
        assert_eq!(chunks[0].chars().count(), 10);
        assert!(chunks[1].starts_with("가가"));
    }

    #[test]
    fn splitting_is_deterministic() {
        let text = sample_document(5);
        assert_eq!(split_text(&text, config(300, 50)), split_text(&text, config(300, 50)));
    }

    #[test]
    fn chunks_are_numbered_across_pages() -> Result<(), IngestError> {
        let pages = vec![
            PageRecord::new(0, sample_document(2)),
            PageRecord::new(1, "   "),
            PageRecord::new(2, "Final page."),
        ];
        let chunks = split_pages("guide.pdf", &pages, IngestionOptions::new(400, 80))?;

        for (position, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, position as u64);
            assert_eq!(chunk.id, format!("guide.pdf_{position}"));
            assert_eq!(chunk.metadata.source_file, "guide.pdf");
        }
        let last = chunks.last().expect("chunks");
        assert_eq!(last.metadata.page, 2);
        assert_eq!(last.content, "Final page.");
        assert!(chunks.iter().all(|chunk| chunk.metadata.page != 1));
        Ok(())
    }

    #[test]
    fn invalid_overlap_is_rejected() {
        let pages = vec![PageRecord::new(0, "text")];
        let result = split_pages("a.pdf", &pages, IngestionOptions::new(100, 150));
        assert!(matches!(result, Err(IngestError::InvalidChunkConfig(_))));
    }
}
