use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use crate::error::IndexError;
use crate::semantic::SemanticModelConfig;
use crate::util::now_utc_string;

pub(super) const INDEX_SCHEMA_VERSION: &str = "1";

pub(super) fn open_index_connection(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|error| IndexError::Unavailable {
        path: db_path.to_path_buf(),
        reason: error.to_string(),
    })?;

    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL for vector index")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL for vector index")?;

    Ok(connection)
}

pub(super) fn ensure_schema(connection: &Connection) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS index_meta (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chunks (
              chunk_rowid INTEGER PRIMARY KEY AUTOINCREMENT,
              document_id TEXT NOT NULL,
              fragment TEXT NOT NULL,
              content_type TEXT NOT NULL,
              content TEXT NOT NULL,
              text_hash TEXT NOT NULL,
              indexed_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
            CREATE INDEX IF NOT EXISTS idx_chunks_type ON chunks(content_type);

            CREATE TABLE IF NOT EXISTS chunk_embeddings (
              chunk_rowid INTEGER PRIMARY KEY REFERENCES chunks(chunk_rowid),
              embedding BLOB NOT NULL,
              embedding_dim INTEGER NOT NULL
            );
            ",
        )
        .context("failed to create vector index schema")
}

fn read_meta(connection: &Connection, key: &str) -> Result<Option<String>> {
    connection
        .query_row(
            "SELECT value FROM index_meta WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .with_context(|| format!("failed to read index_meta key '{key}'"))
}

fn write_meta(connection: &Connection, key: &str, value: &str) -> Result<()> {
    connection
        .execute(
            "INSERT INTO index_meta(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .with_context(|| format!("failed to write index_meta key '{key}'"))?;
    Ok(())
}

/// Registers the embedding model on a fresh index, or verifies that an
/// existing index was built with the same model and dimension.
pub(super) fn ensure_model_entry(
    connection: &Connection,
    db_path: &Path,
    model: &SemanticModelConfig,
) -> Result<()> {
    let indexed_model = read_meta(connection, "model_id")?;
    let indexed_dim = read_meta(connection, "embedding_dim")?;

    match (indexed_model, indexed_dim) {
        (Some(indexed_model), Some(indexed_dim)) => {
            let indexed_dim = indexed_dim.parse::<usize>().unwrap_or(0);
            if indexed_model != model.model_id || indexed_dim != model.dimensions {
                return Err(IndexError::ModelMismatch {
                    path: db_path.to_path_buf(),
                    indexed_model,
                    indexed_dim,
                    requested_model: model.model_id.clone(),
                    requested_dim: model.dimensions,
                }
                .into());
            }
            Ok(())
        }
        _ => {
            write_meta(connection, "schema_version", INDEX_SCHEMA_VERSION)?;
            write_meta(connection, "model_id", &model.model_id)?;
            write_meta(connection, "embedding_dim", &model.dimensions.to_string())?;
            write_meta(connection, "backend", &model.backend)?;
            write_meta(connection, "created_at", &now_utc_string())?;
            Ok(())
        }
    }
}
