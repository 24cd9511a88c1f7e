use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::backend::Embedder;
use crate::chunker::Chunker;
use crate::cli::PublishArgs;
use crate::index::{VectorIndex, index_documents_once};
use crate::model::IndexRunManifest;
use crate::util::{
    list_files_with_extension, list_subdirectories, now_utc_string, utc_compact_string,
    write_json_pretty,
};

use super::backends::build_embedder;

pub fn run(args: PublishArgs) -> Result<()> {
    let embedder = build_embedder(&args.embedding, &args.retry)?;
    let chunker = Chunker::new(args.chunk.config())?;

    let manifest = publish_shared(
        &args.data.pdf_root(),
        &args.data.shared_index_dir(),
        &chunker,
        embedder.as_ref(),
        args.embedding.embed_batch,
    )?;

    let manifest_path = args.data.manifest_dir().join("publish_run.json");
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote publish manifest");
    Ok(())
}

/// Appends every PDF under `pdf_root` to the shared index. Documents that
/// already carry a marker are skipped, so repeated runs add nothing.
pub fn publish_shared(
    pdf_root: &Path,
    shared_dir: &Path,
    chunker: &Chunker,
    embedder: &dyn Embedder,
    embed_batch: usize,
) -> Result<IndexRunManifest> {
    let started_at = now_utc_string();

    let mut pdfs = Vec::new();
    if pdf_root.is_dir() {
        for grant_dir in list_subdirectories(pdf_root)? {
            pdfs.extend(list_files_with_extension(&grant_dir, "pdf")?);
        }
    } else {
        warn!(path = %pdf_root.display(), "pdf root missing; nothing to publish");
    }

    let mut index = VectorIndex::open(shared_dir, embedder)?.with_batch_size(embed_batch);
    let summary = index_documents_once(&mut index, &pdfs, |path| chunker.extract(path))
        .with_context(|| format!("failed to publish into {}", shared_dir.display()))?;

    info!(
        shared_index = %shared_dir.display(),
        indexed = summary.documents_indexed,
        skipped = summary.documents_skipped,
        failed = summary.documents_failed,
        chunks = summary.chunks_indexed,
        "shared index updated"
    );

    let model = embedder.model();
    Ok(IndexRunManifest {
        manifest_version: 1,
        run_id: format!("publish-{}", utc_compact_string(Utc::now())),
        started_at,
        finished_at: now_utc_string(),
        model_id: model.model_id.clone(),
        embedding_dim: model.dimensions,
        index_count: 1,
        documents_indexed: summary.documents_indexed,
        documents_skipped: summary.documents_skipped,
        documents_failed: summary.documents_failed,
        chunks_indexed: summary.chunks_indexed,
        text_chunks_indexed: summary.text_chunks_indexed,
        table_chunks_indexed: summary.table_chunks_indexed,
        warnings: summary.warnings,
    })
}
