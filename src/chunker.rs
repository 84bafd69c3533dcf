//! Document chunking: splits raw text into ordered, embeddable chunks.
//!
//! Three strategies are supported. Fixed windows reproduce the input exactly
//! when concatenated; the overlapping variant shares `chunk_overlap`
//! characters between consecutive windows; the semantic variant splits along
//! markdown headers and paragraphs, falling back to overlapping windows for
//! oversized paragraphs. All length accounting uses `char` counts, not bytes.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chunking strategy identifiers, as they appear in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStrategy {
    /// Non-overlapping windows of `chunk_size` characters.
    Fixed,
    /// Sliding windows sharing `chunk_overlap` characters.
    FixedOverlap,
    /// Header/paragraph aware splitting with a bounded chunk length.
    #[default]
    Semantic,
}

impl ChunkStrategy {
    /// Stable name used in the config identity hash.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ChunkStrategy::Fixed => "fixed",
            ChunkStrategy::FixedOverlap => "fixed_overlap",
            ChunkStrategy::Semantic => "semantic",
        }
    }
}

/// A bounded span of a document's text plus metadata, sized for embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunk {
    pub text: String,
    pub metadata: Map<String, Value>,
    /// Strictly sequential (0..N-1) per source document.
    pub chunk_index: usize,
    pub source_file: String,
}

/// Splits raw text into an ordered sequence of [`DocumentChunk`].
#[derive(Debug, Clone)]
pub struct DocumentChunker {
    pub strategy: ChunkStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub respect_headers: bool,
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(##|###)\s+(.+)$").unwrap())
}

impl DocumentChunker {
    pub fn new(config: &crate::config::ChunkingConfig) -> Self {
        Self {
            strategy: config.strategy,
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            respect_headers: config.respect_headers,
        }
    }

    /// Split `text` into chunks, copying `metadata` onto every chunk.
    ///
    /// Empty text produces an empty sequence. Deterministic for identical
    /// inputs.
    pub fn chunk(
        &self,
        text: &str,
        metadata: &Map<String, Value>,
        source_file: &str,
    ) -> Vec<DocumentChunk> {
        if text.is_empty() {
            return Vec::new();
        }

        let pieces: Vec<(Option<String>, String)> = match self.strategy {
            ChunkStrategy::Fixed => split_fixed(text, self.chunk_size)
                .into_iter()
                .map(|t| (None, t))
                .collect(),
            ChunkStrategy::FixedOverlap => {
                split_overlap(text, self.chunk_size, self.chunk_overlap)
                    .into_iter()
                    .map(|t| (None, t))
                    .collect()
            }
            ChunkStrategy::Semantic => self.split_semantic(text),
        };

        pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, (section, text))| {
                let mut metadata = metadata.clone();
                if let Some(section) = section {
                    metadata.insert("section".to_string(), Value::String(section));
                }
                DocumentChunk {
                    text,
                    metadata,
                    chunk_index,
                    source_file: source_file.to_string(),
                }
            })
            .collect()
    }

    /// Header-aware split: sections on `##`/`###` headers, then paragraphs,
    /// then a local overlap split for paragraphs that exceed `chunk_size`.
    fn split_semantic(&self, text: &str) -> Vec<(Option<String>, String)> {
        let sections = if self.respect_headers {
            split_sections(text)
        } else {
            vec![(None, text.to_string())]
        };

        let mut out = Vec::new();
        for (header, body) in sections {
            for chunk in self.split_paragraphs(&body) {
                out.push((header.clone(), chunk));
            }
        }
        out
    }

    /// Greedy paragraph packing up to `chunk_size` characters.
    fn split_paragraphs(&self, body: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current = String::new();

        for para in body.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }

            let current_len = current.chars().count();
            let para_len = para.chars().count();

            // If adding this paragraph exceeds chunk size, start a new chunk
            if current_len > 0 && current_len + para_len + 2 > self.chunk_size {
                chunks.push(std::mem::take(&mut current));
            }

            if para_len > self.chunk_size {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                // Bound the chunk length with a local overlapping split
                chunks.extend(split_overlap(para, self.chunk_size, self.chunk_overlap));
            } else {
                if !current.is_empty() {
                    current.push_str("\n\n");
                }
                current.push_str(para);
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        chunks
    }
}

/// Non-overlapping `chunk_size`-char windows. Concatenating the result in
/// order reproduces the input exactly.
fn split_fixed(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size.max(1))
        .map(|w| w.iter().collect())
        .collect()
}

/// Sliding windows sharing `overlap` characters between consecutive chunks.
/// The final chunk may be shorter.
fn split_overlap(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    if overlap == 0 {
        return split_fixed(text, chunk_size);
    }

    // Validation rejects overlap >= chunk_size, but a directly constructed
    // chunker must still terminate
    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Split markdown text on level-2/3 headers. Content before the first header
/// forms a headerless leading section.
fn split_sections(text: &str) -> Vec<(Option<String>, String)> {
    let mut sections: Vec<(Option<String>, String)> = Vec::new();
    let mut header: Option<String> = None;
    let mut body = String::new();

    for line in text.lines() {
        if let Some(caps) = header_regex().captures(line) {
            if !body.trim().is_empty() {
                sections.push((header.take(), std::mem::take(&mut body)));
            } else {
                body.clear();
            }
            header = Some(caps[2].trim().to_string());
        } else {
            body.push_str(line);
            body.push('\n');
        }
    }

    if !body.trim().is_empty() {
        sections.push((header, body));
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

    fn chunker(strategy: ChunkStrategy, size: usize, overlap: usize) -> DocumentChunker {
        DocumentChunker::new(&ChunkingConfig {
            strategy,
            chunk_size: size,
            chunk_overlap: overlap,
            respect_headers: true,
        })
    }

    #[test]
    fn test_fixed_concat_reproduces_input() {
        let text = "abcdefghij".repeat(37);
        let chunks = chunker(ChunkStrategy::Fixed, 100, 0).chunk(&text, &Map::new(), "a.md");
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_fixed_multibyte_concat() {
        let text = "これは日本語のテストです。".repeat(40);
        let chunks = chunker(ChunkStrategy::Fixed, 50, 0).chunk(&text, &Map::new(), "jp.md");
        let rebuilt: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(rebuilt, text);
        for chunk in &chunks[..chunks.len() - 1] {
            assert_eq!(chunk.text.chars().count(), 50);
        }
    }

    #[test]
    fn test_overlap_shares_exactly_k_chars() {
        let text: String = ('a'..='z').cycle().take(300).collect();
        let chunks = chunker(ChunkStrategy::FixedOverlap, 100, 20).chunk(&text, &Map::new(), "a");
        assert!(chunks.len() >= 2);
        for pair in chunks.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let tail: String = prev[prev.len() - 20..].iter().collect();
            let head: String = pair[1].text.chars().take(20).collect();
            assert_eq!(tail, head, "consecutive chunks must share 20 chars");
        }
    }

    #[test]
    fn test_overlap_short_text_single_chunk() {
        let chunks = split_overlap("short", 100, 20);
        assert_eq!(chunks, vec!["short".to_string()]);
    }

    #[test]
    fn test_overlap_at_least_chunk_size_terminates() {
        // Bypasses validation on purpose: the window must still advance
        for overlap in [10, 25] {
            let chunks = split_overlap(&"ab".repeat(50), 10, overlap);
            assert!(!chunks.is_empty());
            for chunk in &chunks {
                assert!(chunk.chars().count() <= 10);
            }
        }
    }

    #[test]
    fn test_chunk_index_sequential_all_strategies() {
        let text = "Intro paragraph.\n\n## Section A\n\nBody one.\n\nBody two.\n\n### Sub\n\nTail."
            .repeat(4);
        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::FixedOverlap,
            ChunkStrategy::Semantic,
        ] {
            let chunks = chunker(strategy, 60, 10).chunk(&text, &Map::new(), "doc.md");
            for (i, chunk) in chunks.iter().enumerate() {
                assert_eq!(chunk.chunk_index, i, "strategy {strategy:?}");
            }
        }
    }

    #[test]
    fn test_empty_text_yields_no_chunks() {
        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::FixedOverlap,
            ChunkStrategy::Semantic,
        ] {
            assert!(chunker(strategy, 100, 10).chunk("", &Map::new(), "x").is_empty());
        }
    }

    #[test]
    fn test_semantic_sections_carry_header() {
        let text = "Preamble text.\n\n## Install\n\nRun the installer.\n\n### Linux\n\nUse the tarball.";
        let chunks = chunker(ChunkStrategy::Semantic, 500, 50).chunk(&text, &Map::new(), "d.md");

        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].metadata.get("section").is_none());
        assert_eq!(
            chunks[1].metadata.get("section"),
            Some(&Value::String("Install".to_string()))
        );
        assert_eq!(
            chunks[2].metadata.get("section"),
            Some(&Value::String("Linux".to_string()))
        );
    }

    #[test]
    fn test_semantic_without_headers_splits_paragraphs_only() {
        let text = "## Heading\n\nParagraph body.";
        let mut c = chunker(ChunkStrategy::Semantic, 500, 50);
        c.respect_headers = false;
        let chunks = c.chunk(text, &Map::new(), "d.md");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.get("section").is_none());
        assert!(chunks[0].text.contains("## Heading"));
    }

    #[test]
    fn test_semantic_oversized_paragraph_bounded() {
        let para = "word ".repeat(200); // ~1000 chars, no blank lines
        let chunks = chunker(ChunkStrategy::Semantic, 100, 20).chunk(&para, &Map::new(), "d");
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(
                chunk.text.chars().count() <= 100,
                "chunk exceeds bound: {}",
                chunk.text.chars().count()
            );
        }
    }

    #[test]
    fn test_semantic_packs_small_paragraphs() {
        let text = "One.\n\nTwo.\n\nThree.";
        let chunks = chunker(ChunkStrategy::Semantic, 500, 50).chunk(text, &Map::new(), "d");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "One.\n\nTwo.\n\nThree.");
    }

    #[test]
    fn test_metadata_copied_to_every_chunk() {
        let mut meta = Map::new();
        meta.insert("lang".to_string(), Value::String("en".to_string()));
        let text = "abc".repeat(200);
        let chunks = chunker(ChunkStrategy::Fixed, 100, 0).chunk(&text, &meta, "doc.md");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.metadata.get("lang"), Some(&Value::String("en".into())));
            assert_eq!(chunk.source_file, "doc.md");
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "## A\n\nSome body text here.\n\nAnother paragraph.";
        let c = chunker(ChunkStrategy::Semantic, 40, 10);
        assert_eq!(
            c.chunk(text, &Map::new(), "d"),
            c.chunk(text, &Map::new(), "d")
        );
    }
}
