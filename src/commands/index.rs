use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::backend::Embedder;
use crate::chunker::Chunker;
use crate::cli::IndexArgs;
use crate::index::{PopulateSummary, VectorIndex, index_documents_once};
use crate::model::IndexRunManifest;
use crate::util::{
    list_files_with_extension, list_subdirectories, now_utc_string, utc_compact_string,
    write_json_pretty,
};

use super::backends::build_embedder;

pub fn run(args: IndexArgs) -> Result<()> {
    let embedder = build_embedder(&args.embedding, &args.retry)?;
    let chunker = Chunker::new(args.chunk.config())?;

    let manifest = index_grants(
        &args.data.pdf_root(),
        &args.data.vec_root(),
        &args.vector_ids,
        &chunker,
        embedder.as_ref(),
        args.embedding.embed_batch,
    )?;

    let manifest_path = args.data.manifest_dir().join("index_run.json");
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote index manifest");
    Ok(())
}

/// Builds or extends one vector index per grant folder under `pdf_root`.
/// Grants are indexed one after another so each index has a single writer.
pub fn index_grants(
    pdf_root: &Path,
    vec_root: &Path,
    only_vector_ids: &[String],
    chunker: &Chunker,
    embedder: &dyn Embedder,
    embed_batch: usize,
) -> Result<IndexRunManifest> {
    let started_at = now_utc_string();
    let mut totals = PopulateSummary::default();
    let mut index_count = 0usize;
    let chunk_config = chunker.config();
    info!(
        pdf_root = %pdf_root.display(),
        vec_root = %vec_root.display(),
        max_chars = chunk_config.max_chars,
        overlap_chars = chunk_config.overlap_chars,
        "indexing grants"
    );

    let grant_dirs = if pdf_root.is_dir() {
        list_subdirectories(pdf_root)?
    } else {
        warn!(path = %pdf_root.display(), "pdf root missing; nothing to index");
        Vec::new()
    };

    for grant_dir in grant_dirs {
        let Some(vector_id) = grant_dir.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !only_vector_ids.is_empty() && !only_vector_ids.iter().any(|id| id == vector_id) {
            continue;
        }

        let pdfs = list_files_with_extension(&grant_dir, "pdf")?;
        if pdfs.is_empty() {
            warn!(vector_id, path = %grant_dir.display(), "grant folder has no PDFs");
            continue;
        }

        let mut index = VectorIndex::open(&vec_root.join(vector_id), embedder)?
            .with_batch_size(embed_batch);
        let summary = index_documents_once(&mut index, &pdfs, |path| chunker.extract(path))
            .with_context(|| format!("failed to index grant '{vector_id}'"))?;
        let counts = index.counts()?;

        info!(
            vector_id,
            total_chunks = counts.chunks,
            total_tables = counts.table_chunks,
            indexed = summary.documents_indexed,
            skipped = summary.documents_skipped,
            failed = summary.documents_failed,
            chunks = summary.chunks_indexed,
            "grant index updated"
        );
        index_count += 1;
        totals.absorb(summary);
    }

    let model = embedder.model();
    Ok(IndexRunManifest {
        manifest_version: 1,
        run_id: format!("index-{}", utc_compact_string(Utc::now())),
        started_at,
        finished_at: now_utc_string(),
        model_id: model.model_id.clone(),
        embedding_dim: model.dimensions,
        index_count,
        documents_indexed: totals.documents_indexed,
        documents_skipped: totals.documents_skipped,
        documents_failed: totals.documents_failed,
        chunks_indexed: totals.chunks_indexed,
        text_chunks_indexed: totals.text_chunks_indexed,
        table_chunks_indexed: totals.table_chunks_indexed,
        warnings: totals.warnings,
    })
}
