use anyhow::{Context, Result};
use tracing::info;

use crate::chunker::Chunker;
use crate::cli::RunArgs;
use crate::util::write_json_pretty;

use super::backends::{build_decider, build_embedder};
use super::index::index_grants;
use super::publish::publish_shared;
use super::refine::refine_drafts;

/// Index, refine, then publish to the shared index. A fatal refinement error
/// stops the pipeline before publishing.
pub fn run(args: RunArgs) -> Result<()> {
    let embedder = build_embedder(&args.embedding, &args.retry)?;
    let decider = build_decider(&args.decider, &args.retry)?;
    let chunker = Chunker::new(args.chunk.config())?;
    let manifest_dir = args.data.manifest_dir();

    info!(data_root = %args.data.data_root.display(), "pipeline started");

    let index_manifest = index_grants(
        &args.data.pdf_root(),
        &args.data.vec_root(),
        &[],
        &chunker,
        embedder.as_ref(),
        args.embedding.embed_batch,
    )
    .context("indexing stage failed")?;
    write_json_pretty(&manifest_dir.join("index_run.json"), &index_manifest)?;

    let refine_manifest = refine_drafts(
        &args.data.json_root(),
        &args.data.vec_root(),
        &manifest_dir.join("refine_run.json"),
        &args.tuning,
        &[],
        embedder.as_ref(),
        decider.as_ref(),
    )
    .context("refinement stage failed")?;

    if args.skip_publish {
        info!("publish stage skipped");
    } else {
        let publish_manifest = publish_shared(
            &args.data.pdf_root(),
            &args.data.shared_index_dir(),
            &chunker,
            embedder.as_ref(),
            args.embedding.embed_batch,
        )
        .context("publish stage failed")?;
        write_json_pretty(&manifest_dir.join("publish_run.json"), &publish_manifest)?;
    }

    info!(
        documents_indexed = index_manifest.documents_indexed,
        drafts_refined = refine_manifest.jobs_completed,
        drafts_failed = refine_manifest.jobs_failed,
        "pipeline finished"
    );
    Ok(())
}
