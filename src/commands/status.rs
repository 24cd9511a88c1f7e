use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::index::{INDEX_FILE_NAME, ProcessedMarkers};
use crate::model::{IndexRunManifest, RefineRunManifest};
use crate::refine::ArtifactLayout;
use crate::util::{file_stem, list_files_with_extension, list_subdirectories};

use super::refine::collect_drafts;

pub fn run(args: StatusArgs) -> Result<()> {
    let json_root = args.data.json_root();
    let vec_root = args.data.vec_root();
    let manifest_dir = args.data.manifest_dir();

    info!(data_root = %args.data.data_root.display(), "status requested");

    report_drafts(&json_root)?;

    if vec_root.is_dir() {
        let mut indexes = 0usize;
        for index_dir in list_subdirectories(&vec_root)? {
            if report_index(&index_dir)? {
                indexes += 1;
            }
        }
        info!(path = %vec_root.display(), indexes, "per-grant indexes");
    } else {
        warn!(path = %vec_root.display(), "vector root missing");
    }

    let shared_dir = args.data.shared_index_dir();
    if !report_index(&shared_dir)? {
        warn!(path = %shared_dir.display(), "shared index missing");
    }

    report_manifest::<IndexRunManifest>(&manifest_dir.join("index_run.json"), |manifest| {
        info!(
            run_id = %manifest.run_id,
            finished_at = %manifest.finished_at,
            documents_indexed = manifest.documents_indexed,
            documents_failed = manifest.documents_failed,
            chunks = manifest.chunks_indexed,
            "loaded index manifest"
        );
    })?;
    report_manifest::<RefineRunManifest>(&manifest_dir.join("refine_run.json"), |manifest| {
        info!(
            run_id = %manifest.run_id,
            finished_at = %manifest.finished_at,
            completed = manifest.jobs_completed,
            failed = manifest.jobs_failed,
            not_started = manifest.jobs_not_started,
            verified = manifest.fields_verified,
            corrected = manifest.fields_corrected,
            unresolved = manifest.fields_unresolved,
            "loaded refine manifest"
        );
    })?;
    report_manifest::<IndexRunManifest>(&manifest_dir.join("publish_run.json"), |manifest| {
        info!(
            run_id = %manifest.run_id,
            finished_at = %manifest.finished_at,
            documents_indexed = manifest.documents_indexed,
            chunks = manifest.chunks_indexed,
            "loaded publish manifest"
        );
    })?;

    Ok(())
}

fn report_drafts(json_root: &Path) -> Result<()> {
    if !json_root.is_dir() {
        warn!(path = %json_root.display(), "json root missing");
        return Ok(());
    }

    let layout = ArtifactLayout::under(json_root);
    let drafts = collect_drafts(json_root)?;
    let mut complete = 0usize;
    for draft in &drafts {
        if layout.is_complete(&file_stem(draft)?) {
            complete += 1;
        }
    }

    info!(
        path = %json_root.display(),
        drafts = drafts.len(),
        complete,
        pending = drafts.len() - complete,
        refined = count_json(&layout.refined_dir)?,
        references = count_json(&layout.reference_dir)?,
        checkpoints = count_json(&layout.state_dir)?,
        "draft status"
    );
    Ok(())
}

/// Logs one index directory. Returns false when it holds no index.
fn report_index(index_dir: &Path) -> Result<bool> {
    let db_path = index_dir.join(INDEX_FILE_NAME);
    if !db_path.is_file() {
        return Ok(false);
    }

    let conn = Connection::open_with_flags(&db_path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let chunks = query_count(&conn, "SELECT COUNT(*) FROM chunks").unwrap_or(0);
    let tables = query_count(
        &conn,
        "SELECT COUNT(*) FROM chunks WHERE content_type = 'table'",
    )
    .unwrap_or(0);
    let documents =
        query_count(&conn, "SELECT COUNT(DISTINCT document_id) FROM chunks").unwrap_or(0);
    let model_id = conn
        .query_row(
            "SELECT value FROM index_meta WHERE key = 'model_id'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .unwrap_or(None)
        .unwrap_or_default();
    let processed = ProcessedMarkers::new(index_dir).count()?;

    info!(
        path = %index_dir.display(),
        model_id = %model_id,
        documents,
        processed,
        chunks,
        tables,
        "index status"
    );
    Ok(true)
}

fn report_manifest<T: serde::de::DeserializeOwned>(
    path: &Path,
    log: impl FnOnce(T),
) -> Result<()> {
    if !path.exists() {
        warn!(path = %path.display(), "manifest missing");
        return Ok(());
    }
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let manifest: T = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    log(manifest);
    Ok(())
}

fn count_json(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    Ok(list_files_with_extension(dir, "json")?.len())
}

fn query_count(conn: &Connection, sql: &str) -> Result<i64> {
    let count = conn.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
