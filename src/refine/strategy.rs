use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::index::{SearchHit, VectorIndex};
use crate::model::{Chunk, ContentType, EvidenceRef};

use super::fields::FieldStrategy;

const TABLE_LEAD_K: usize = 1;

impl FieldStrategy {
    /// Evidence for one attempt. Table-biased fields lead with the closest
    /// table, then a general mixed search; duplicates keep their first slot.
    /// An attempt past the query list yields nothing.
    pub fn retrieve(&self, index: &VectorIndex<'_>, attempt: usize) -> Result<Vec<Chunk>> {
        let Some(query) = self.query(attempt) else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::<SearchHit>::new();
        if self.table_bias {
            hits.extend(
                index
                    .search(query, TABLE_LEAD_K, Some(ContentType::Table), None)
                    .with_context(|| format!("table lookup failed for '{}'", self.field))?,
            );
        }
        hits.extend(
            index
                .search_mixed(query, self.general_k)
                .with_context(|| format!("evidence lookup failed for '{}'", self.field))?,
        );

        let mut seen = HashSet::<EvidenceRef>::new();
        Ok(hits
            .into_iter()
            .map(|hit| hit.chunk)
            .filter(|chunk| seen.insert(chunk.evidence_ref()))
            .collect())
    }
}
