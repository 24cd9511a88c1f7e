use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::util::write_json_atomic;

use super::engine::FieldProgress;
use super::provenance::ProvenanceRecorder;

pub const CHECKPOINT_VERSION: u32 = 1;

/// Working state of one record, rewritten after every reviewed field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_version: u32,
    pub document_id: String,
    pub updated_at: String,
    pub record: Map<String, Value>,
    pub provenance: ProvenanceRecorder,
    pub fields: BTreeMap<String, FieldProgress>,
}

pub fn load_checkpoint(path: &Path) -> Result<Option<Checkpoint>> {
    if !path.is_file() {
        return Ok(None);
    }

    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let checkpoint: Checkpoint = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse checkpoint {}", path.display()))?;
    if checkpoint.checkpoint_version != CHECKPOINT_VERSION {
        bail!(
            "checkpoint {} has version {}, expected {}",
            path.display(),
            checkpoint.checkpoint_version,
            CHECKPOINT_VERSION
        );
    }
    Ok(Some(checkpoint))
}

pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> Result<()> {
    write_json_atomic(path, checkpoint)
}

pub fn clear_checkpoint(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("failed to remove checkpoint {}", path.display()))?;
    }
    Ok(())
}
