mod pdf;
mod split;
mod table;

use std::path::Path;

use anyhow::{Context, Result, bail};
use regex::Regex;
use tracing::debug;

use crate::model::{Chunk, ContentType};
use crate::util::file_stem;

pub const DEFAULT_MAX_CHARS: usize = 500;
pub const DEFAULT_OVERLAP_CHARS: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkerConfig {
    /// Overlap is clamped below half the window so splitting always advances.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(2);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars / 2),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CHARS, DEFAULT_OVERLAP_CHARS)
    }
}

/// Turns source PDFs into typed, fragment-addressed chunks.
///
/// Every page contributes one prose unit and one unit per detected table.
/// Units are numbered from 1 across the whole document in extraction order.
/// Prose units are size-split into `"<unit>-<sub>"` fragments; a table is
/// always a single `"<unit>"` fragment.
pub struct Chunker {
    config: ChunkerConfig,
    cell_split_regex: Regex,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        let cell_split_regex =
            Regex::new(r"\s{2,}").context("failed to compile table cell split regex")?;
        Ok(Self {
            config,
            cell_split_regex,
        })
    }

    pub fn config(&self) -> ChunkerConfig {
        self.config
    }

    pub fn extract(&self, pdf_path: &Path) -> Result<Vec<Chunk>> {
        let document_id = file_stem(pdf_path)?;
        let pages = pdf::extract_pages_with_pdftotext(pdf_path)?;
        let chunks = self.chunk_pages(&document_id, &pages);

        if chunks.is_empty() {
            bail!("no extractable text in {}", pdf_path.display());
        }

        debug!(
            doc_id = %document_id,
            pages = pages.len(),
            chunks = chunks.len(),
            tables = chunks
                .iter()
                .filter(|chunk| chunk.content_type == ContentType::Table)
                .count(),
            "document chunked"
        );
        Ok(chunks)
    }

    pub fn chunk_pages(&self, document_id: &str, pages: &[String]) -> Vec<Chunk> {
        let mut chunks = Vec::<Chunk>::new();
        let mut unit = 0usize;

        for page in pages {
            let layout = table::split_page_layout(page, &self.cell_split_regex);

            let pieces =
                split::split_recursive(&layout.prose, self.config.max_chars, self.config.overlap_chars);
            if !pieces.is_empty() {
                unit += 1;
                for (sub_index, content) in pieces.into_iter().enumerate() {
                    chunks.push(Chunk {
                        document_id: document_id.to_string(),
                        fragment: format!("{}-{}", unit, sub_index + 1),
                        content_type: ContentType::Text,
                        content,
                    });
                }
            }

            for rows in &layout.tables {
                unit += 1;
                chunks.push(Chunk {
                    document_id: document_id.to_string(),
                    fragment: unit.to_string(),
                    content_type: ContentType::Table,
                    content: table::render_table(rows),
                });
            }
        }

        chunks
    }
}
