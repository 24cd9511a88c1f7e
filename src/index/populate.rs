use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::model::{Chunk, ContentType};
use crate::util::file_stem;

use super::VectorIndex;
use super::markers::ProcessedMarkers;

#[derive(Debug, Clone, Default)]
pub struct PopulateSummary {
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub text_chunks_indexed: usize,
    pub table_chunks_indexed: usize,
    pub warnings: Vec<String>,
}

impl PopulateSummary {
    pub fn absorb(&mut self, other: PopulateSummary) {
        self.documents_indexed += other.documents_indexed;
        self.documents_skipped += other.documents_skipped;
        self.documents_failed += other.documents_failed;
        self.chunks_indexed += other.chunks_indexed;
        self.text_chunks_indexed += other.text_chunks_indexed;
        self.table_chunks_indexed += other.table_chunks_indexed;
        self.warnings.extend(other.warnings);
    }
}

/// Indexes each document at most once per index directory.
///
/// Documents with a marker are skipped. A document that fails to extract is
/// logged and left unmarked so a later run retries it. Embedding or storage
/// failures abort the whole call.
pub fn index_documents_once(
    index: &mut VectorIndex<'_>,
    pdf_paths: &[PathBuf],
    extract: impl Fn(&Path) -> Result<Vec<Chunk>>,
) -> Result<PopulateSummary> {
    let markers = ProcessedMarkers::new(index.dir());
    let mut summary = PopulateSummary::default();

    for pdf_path in pdf_paths {
        let document_id = file_stem(pdf_path)?;
        if markers.is_processed(&document_id) {
            summary.documents_skipped += 1;
            continue;
        }

        let chunks = match extract(pdf_path) {
            Ok(chunks) => chunks,
            Err(error) => {
                warn!(
                    doc_id = %document_id,
                    path = %pdf_path.display(),
                    error = %format!("{error:#}"),
                    "document excluded from index"
                );
                summary.documents_failed += 1;
                summary
                    .warnings
                    .push(format!("{}: {error:#}", pdf_path.display()));
                continue;
            }
        };

        let inserted = index
            .index(&chunks)
            .with_context(|| format!("failed to index {}", pdf_path.display()))?;
        markers.mark_processed(&document_id)?;

        let tables = chunks
            .iter()
            .filter(|chunk| chunk.content_type == ContentType::Table)
            .count();
        summary.documents_indexed += 1;
        summary.chunks_indexed += inserted;
        summary.table_chunks_indexed += tables;
        summary.text_chunks_indexed += inserted.saturating_sub(tables);

        info!(
            doc_id = %document_id,
            index = %index.dir().display(),
            chunks = inserted,
            tables,
            "document indexed"
        );
    }

    Ok(summary)
}
