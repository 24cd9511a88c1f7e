use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::backend::{Embedder, FieldDecider};
use crate::cli::{RefineArgs, RefineTuningArgs};
use crate::error::is_batch_fatal;
use crate::index::{INDEX_FILE_NAME, VectorIndex};
use crate::model::{JobFailure, RefineRunManifest};
use crate::refine::{
    ArtifactLayout, REFERENCE_DIR, REFINED_DIR, RefineEngine, RefineOutcome, STATE_DIR,
    load_draft,
};
use crate::util::{
    file_stem, has_extension, now_utc_string, utc_compact_string, write_json_pretty,
};

use super::backends::{build_decider, build_embedder};

pub fn run(args: RefineArgs) -> Result<()> {
    let embedder = build_embedder(&args.embedding, &args.retry)?;
    let decider = build_decider(&args.decider, &args.retry)?;

    refine_drafts(
        &args.data.json_root(),
        &args.data.vec_root(),
        &args.data.manifest_dir().join("refine_run.json"),
        &args.tuning,
        &args.documents,
        embedder.as_ref(),
        decider.as_ref(),
    )
    .map(|_| ())
}

enum JobResult {
    Done(RefineOutcome),
    Failed { document_id: String, error: anyhow::Error },
    NotStarted,
}

/// Refines every pending draft on a bounded worker pool.
///
/// A failure local to one draft is recorded and the batch moves on. A failure
/// of shared infrastructure stops the pool from starting new drafts and is
/// returned once the manifest has been written.
pub fn refine_drafts(
    json_root: &Path,
    vec_root: &Path,
    manifest_path: &Path,
    tuning: &RefineTuningArgs,
    only_documents: &[String],
    embedder: &dyn Embedder,
    decider: &dyn FieldDecider,
) -> Result<RefineRunManifest> {
    let started_at = now_utc_string();
    let layout = ArtifactLayout::under(json_root);
    let workers = tuning.workers.max(1);

    let drafts = collect_drafts(json_root)?;
    let drafts_found = drafts.len();
    let mut pending = Vec::<PathBuf>::new();
    let mut drafts_skipped = 0usize;
    for draft in drafts {
        let document_id = file_stem(&draft)?;
        if !only_documents.is_empty() && !only_documents.contains(&document_id) {
            drafts_skipped += 1;
            continue;
        }
        if !tuning.force && layout.is_complete(&document_id) {
            drafts_skipped += 1;
            continue;
        }
        pending.push(draft);
    }

    info!(
        found = drafts_found,
        pending = pending.len(),
        skipped = drafts_skipped,
        workers,
        "starting refinement batch"
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|index| format!("refine-{index}"))
        .build()
        .context("failed to build refinement worker pool")?;
    let halted = AtomicBool::new(false);

    let results = pool.install(|| {
        pending
            .par_iter()
            .map(|draft_path| {
                if halted.load(Ordering::SeqCst) {
                    return JobResult::NotStarted;
                }
                match refine_one(draft_path, vec_root, &layout, tuning, embedder, decider) {
                    Ok(outcome) => JobResult::Done(outcome),
                    Err(error) => {
                        let document_id = file_stem(draft_path)
                            .unwrap_or_else(|_| draft_path.display().to_string());
                        if is_batch_fatal(&error) {
                            halted.store(true, Ordering::SeqCst);
                            error!(
                                doc_id = %document_id,
                                error = %format!("{error:#}"),
                                "infrastructure failure, halting batch"
                            );
                        } else {
                            warn!(
                                doc_id = %document_id,
                                error = %format!("{error:#}"),
                                "draft failed"
                            );
                        }
                        JobResult::Failed { document_id, error }
                    }
                }
            })
            .collect::<Vec<JobResult>>()
    });

    let mut manifest = RefineRunManifest {
        manifest_version: 1,
        run_id: format!("refine-{}", utc_compact_string(Utc::now())),
        started_at,
        finished_at: String::new(),
        workers,
        drafts_found,
        drafts_skipped,
        jobs_completed: 0,
        jobs_failed: 0,
        jobs_not_started: 0,
        fields_verified: 0,
        fields_corrected: 0,
        fields_unresolved: 0,
        failures: Vec::new(),
    };
    let mut fatal = None;
    for result in results {
        match result {
            JobResult::Done(outcome) => {
                manifest.jobs_completed += 1;
                manifest.fields_verified += outcome.verified;
                manifest.fields_corrected += outcome.corrected;
                manifest.fields_unresolved += outcome.unresolved;
            }
            JobResult::Failed { document_id, error } => {
                manifest.jobs_failed += 1;
                manifest.failures.push(JobFailure {
                    document_id,
                    reason: format!("{error:#}"),
                });
                if fatal.is_none() && is_batch_fatal(&error) {
                    fatal = Some(error);
                }
            }
            JobResult::NotStarted => manifest.jobs_not_started += 1,
        }
    }
    manifest.finished_at = now_utc_string();

    write_json_pretty(manifest_path, &manifest)?;
    info!(
        path = %manifest_path.display(),
        completed = manifest.jobs_completed,
        failed = manifest.jobs_failed,
        not_started = manifest.jobs_not_started,
        verified = manifest.fields_verified,
        corrected = manifest.fields_corrected,
        unresolved = manifest.fields_unresolved,
        "refinement batch finished"
    );

    if let Some(error) = fatal {
        return Err(error.context("refinement batch halted"));
    }
    Ok(manifest)
}

fn refine_one(
    draft_path: &Path,
    vec_root: &Path,
    layout: &ArtifactLayout,
    tuning: &RefineTuningArgs,
    embedder: &dyn Embedder,
    decider: &dyn FieldDecider,
) -> Result<RefineOutcome> {
    let record = load_draft(draft_path)?;
    let index_dir = vec_root.join(&record.vector_id);
    let index = if index_dir.join(INDEX_FILE_NAME).is_file() {
        VectorIndex::open(&index_dir, embedder)?
    } else {
        warn!(
            doc_id = %record.document_id,
            vector_id = %record.vector_id,
            path = %index_dir.display(),
            "no vector index for grant, every field will go unresolved"
        );
        VectorIndex::empty(embedder)?
    };
    let index = index.with_timeout_ms(tuning.search_timeout_ms);
    RefineEngine::new(decider).refine(record, &index, layout)
}

/// Draft JSON files anywhere under `json_root`, skipping the directories
/// refinement itself writes to.
pub fn collect_drafts(json_root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if json_root.is_dir() {
        collect_drafts_into(json_root, &mut out)?;
    } else {
        warn!(path = %json_root.display(), "json root missing; no drafts to refine");
    }
    out.sort();
    Ok(out)
}

fn collect_drafts_into(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?;
        if file_type.is_dir() {
            if [REFINED_DIR, REFERENCE_DIR, STATE_DIR].contains(&name.as_str()) {
                continue;
            }
            collect_drafts_into(&path, out)?;
        } else if file_type.is_file() && has_extension(&path, "json") {
            out.push(path);
        }
    }
    Ok(())
}
