mod budget;
mod markers;
mod populate;
mod schema;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, params};
use tracing::debug;

use crate::backend::Embedder;
use crate::error::{BackendError, IndexError};
use crate::model::{Chunk, ContentType};
use crate::semantic::{
    chunk_payload_for_embedding, cosine_similarity, decode_embedding_blob, encode_embedding_blob,
};
use crate::util::{ensure_directory, normalize_whitespace, now_utc_string, sha256_text};

use budget::{SearchTimeoutBudget, enforce_timeout};

pub use markers::ProcessedMarkers;
pub use populate::{PopulateSummary, index_documents_once};

pub const INDEX_FILE_NAME: &str = "index.sqlite";
pub const DEFAULT_EMBED_BATCH: usize = 32;
pub const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5_000;

/// Share of a mixed search reserved for table chunks.
const TABLE_SHARE: f64 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounts {
    pub chunks: usize,
    pub text_chunks: usize,
    pub table_chunks: usize,
    pub documents: usize,
}

/// One on-disk vector index: `<dir>/index.sqlite` plus its marker directory.
///
/// Rows are only ever appended. The embedding model and dimension are pinned
/// on first open and every later open must match them.
pub struct VectorIndex<'e> {
    dir: PathBuf,
    connection: Connection,
    embedder: &'e dyn Embedder,
    batch_size: usize,
    timeout_ms: u64,
}

impl<'e> VectorIndex<'e> {
    pub fn open(dir: &Path, embedder: &'e dyn Embedder) -> Result<Self> {
        ensure_directory(dir)?;
        let db_path = dir.join(INDEX_FILE_NAME);
        let connection = schema::open_index_connection(&db_path)?;
        schema::ensure_schema(&connection)?;
        schema::ensure_model_entry(&connection, &db_path, embedder.model())?;

        Ok(Self {
            dir: dir.to_path_buf(),
            connection,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH,
            timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        })
    }

    /// A throwaway in-memory index with no rows. Searches return nothing.
    pub fn empty(embedder: &'e dyn Embedder) -> Result<Self> {
        let memory_path = PathBuf::from(":memory:");
        let connection = Connection::open_in_memory().map_err(|error| IndexError::Unavailable {
            path: memory_path.clone(),
            reason: error.to_string(),
        })?;
        schema::ensure_schema(&connection)?;
        schema::ensure_model_entry(&connection, &memory_path, embedder.model())?;

        Ok(Self {
            dir: memory_path,
            connection,
            embedder,
            batch_size: DEFAULT_EMBED_BATCH,
            timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Wall-clock budget for scanning and ranking one search. Embedding the
    /// query is not counted. Zero disables the check.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Embeds and appends `chunks`. Every batch is embedded before anything
    /// is written, and all rows go in one transaction, so a failed call
    /// leaves the index untouched. Returns the number of rows written.
    pub fn index(&mut self, chunks: &[Chunk]) -> Result<usize> {
        let mut embedded = Vec::<(&Chunk, Vec<f32>)>::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let mut payloads = Vec::<String>::with_capacity(batch.len());
            let mut kept = Vec::<&Chunk>::with_capacity(batch.len());
            for chunk in batch {
                if let Some(payload) = chunk_payload_for_embedding(
                    &chunk.content,
                    chunk.content_type == ContentType::Table,
                ) {
                    payloads.push(payload);
                    kept.push(chunk);
                }
            }
            if payloads.is_empty() {
                continue;
            }

            let vectors = self.embedder.embed_batch(&payloads)?;
            if vectors.len() != kept.len() {
                return Err(BackendError::Malformed(format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    kept.len()
                ))
                .into());
            }
            embedded.extend(kept.into_iter().zip(vectors));
        }
        if embedded.is_empty() {
            return Ok(0);
        }

        let indexed_at = now_utc_string();
        let tx = self
            .connection
            .transaction()
            .context("failed to open vector index transaction")?;
        for (chunk, vector) in &embedded {
            tx.execute(
                "
                INSERT INTO chunks(document_id, fragment, content_type, content, text_hash, indexed_at)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6)
                ",
                params![
                    chunk.document_id,
                    chunk.fragment,
                    chunk.content_type.as_str(),
                    chunk.content,
                    sha256_text(&chunk.content),
                    indexed_at,
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert chunk {}#{}",
                    chunk.document_id, chunk.fragment
                )
            })?;
            let chunk_rowid = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO chunk_embeddings(chunk_rowid, embedding, embedding_dim) VALUES(?1, ?2, ?3)",
                params![
                    chunk_rowid,
                    encode_embedding_blob(vector),
                    vector.len() as i64
                ],
            )
            .with_context(|| {
                format!(
                    "failed to insert embedding for {}#{}",
                    chunk.document_id, chunk.fragment
                )
            })?;
        }
        tx.commit().context("failed to commit vector index batch")?;

        Ok(embedded.len())
    }

    /// Up to `k` chunks by descending cosine similarity. Equal scores keep
    /// insertion order.
    pub fn search(
        &self,
        query: &str,
        k: usize,
        content_type: Option<ContentType>,
        document_id: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let Some(query_vector) = self.embed_query(query)? else {
            return Ok(Vec::new());
        };
        let budget = SearchTimeoutBudget::new(self.timeout_ms);
        self.search_vector(&query_vector, k, content_type, document_id, budget)
    }

    /// Up to `k` chunks split roughly 80/20 between prose and tables, with at
    /// least one table slot. When one side runs short the other fills in.
    pub fn search_mixed(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let Some(query_vector) = self.embed_query(query)? else {
            return Ok(Vec::new());
        };
        let budget = SearchTimeoutBudget::new(self.timeout_ms);

        let (text_slots, table_slots) = mixed_slots(k);
        let texts = self.search_vector(&query_vector, k, Some(ContentType::Text), None, budget)?;
        let tables = self.search_vector(&query_vector, k, Some(ContentType::Table), None, budget)?;

        let text_taken = texts.len().min(text_slots);
        let table_taken = tables.len().min(table_slots);
        let text_backfill = (table_slots - table_taken).min(texts.len() - text_taken);
        let table_backfill = (text_slots - text_taken).min(tables.len() - table_taken);

        let mut out = Vec::<SearchHit>::with_capacity(k);
        out.extend(texts.into_iter().take(text_taken + text_backfill));
        out.extend(tables.into_iter().take(table_taken + table_backfill));
        Ok(out)
    }

    pub fn counts(&self) -> Result<IndexCounts> {
        self.connection
            .query_row(
                "
                SELECT
                  COUNT(*),
                  COALESCE(SUM(CASE WHEN content_type = 'text' THEN 1 ELSE 0 END), 0),
                  COALESCE(SUM(CASE WHEN content_type = 'table' THEN 1 ELSE 0 END), 0),
                  COUNT(DISTINCT document_id)
                FROM chunks
                ",
                [],
                |row| {
                    Ok(IndexCounts {
                        chunks: row.get::<_, i64>(0)? as usize,
                        text_chunks: row.get::<_, i64>(1)? as usize,
                        table_chunks: row.get::<_, i64>(2)? as usize,
                        documents: row.get::<_, i64>(3)? as usize,
                    })
                },
            )
            .with_context(|| format!("failed to count chunks in {}", self.dir.display()))
    }

    fn embed_query(&self, query: &str) -> Result<Option<Vec<f32>>> {
        let payload = normalize_whitespace(query);
        if payload.is_empty() {
            return Ok(None);
        }
        let vector = self
            .embedder
            .embed_batch(&[payload])?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("embedder returned no query vector".to_string()))?;
        Ok(Some(vector))
    }

    fn search_vector(
        &self,
        query_vector: &[f32],
        k: usize,
        content_type: Option<ContentType>,
        document_id: Option<&str>,
        budget: Option<SearchTimeoutBudget>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut statement = self.connection.prepare_cached(
            "
            SELECT
              c.chunk_rowid,
              c.document_id,
              c.fragment,
              c.content_type,
              c.content,
              ce.embedding,
              ce.embedding_dim
            FROM chunks c
            JOIN chunk_embeddings ce ON ce.chunk_rowid = c.chunk_rowid
            WHERE
              (?1 IS NULL OR c.content_type = ?1)
              AND (?2 IS NULL OR c.document_id = ?2)
            ORDER BY c.chunk_rowid ASC
            ",
        )?;
        let mut rows = statement.query(params![
            content_type.map(ContentType::as_str),
            document_id
        ])?;

        let mut scored = Vec::<(f64, i64, SearchHit)>::new();
        let mut scanned_rows = 0usize;
        while let Some(row) = rows.next()? {
            scanned_rows += 1;
            if scanned_rows % 64 == 0 {
                enforce_timeout(budget, "vector scan")?;
            }

            let row_dim = row.get::<_, i64>(6)? as usize;
            let blob = row.get::<_, Vec<u8>>(5)?;
            let Some(vector) = decode_embedding_blob(&blob, row_dim) else {
                continue;
            };
            let raw_type = row.get::<_, String>(3)?;
            let Some(row_type) = ContentType::parse(&raw_type) else {
                continue;
            };

            let score = cosine_similarity(query_vector, &vector);
            let rowid = row.get::<_, i64>(0)?;
            scored.push((
                score,
                rowid,
                SearchHit {
                    chunk: Chunk {
                        document_id: row.get(1)?,
                        fragment: row.get(2)?,
                        content_type: row_type,
                        content: row.get(4)?,
                    },
                    score,
                },
            ));
        }
        enforce_timeout(budget, "ranking")?;

        scored.sort_by(|left, right| right.0.total_cmp(&left.0).then(left.1.cmp(&right.1)));
        scored.truncate(k);

        debug!(
            index = %self.dir.display(),
            scanned_rows,
            returned = scored.len(),
            content_type = content_type.map(ContentType::as_str).unwrap_or("any"),
            "vector search completed"
        );
        Ok(scored.into_iter().map(|(_, _, hit)| hit).collect())
    }
}

/// `(text_slots, table_slots)` for a mixed search of size `k >= 1`.
fn mixed_slots(k: usize) -> (usize, usize) {
    let tables = ((k as f64 * TABLE_SHARE).round() as usize).clamp(1, k);
    (k - tables, tables)
}
