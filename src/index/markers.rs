use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::{ensure_directory, list_files_with_extension, now_utc_string};

/// `processed_files/<document-id>.done` files next to an index. A marker is
/// written only after every chunk of the document has been committed.
#[derive(Debug, Clone)]
pub struct ProcessedMarkers {
    dir: PathBuf,
}

impl ProcessedMarkers {
    pub fn new(index_dir: &Path) -> Self {
        Self {
            dir: index_dir.join("processed_files"),
        }
    }

    fn marker_path(&self, document_id: &str) -> PathBuf {
        self.dir.join(format!("{document_id}.done"))
    }

    pub fn is_processed(&self, document_id: &str) -> bool {
        self.marker_path(document_id).is_file()
    }

    pub fn mark_processed(&self, document_id: &str) -> Result<()> {
        ensure_directory(&self.dir)?;
        let path = self.marker_path(document_id);
        fs::write(&path, format!("{}\n", now_utc_string()))
            .with_context(|| format!("failed to write marker {}", path.display()))
    }

    pub fn count(&self) -> Result<usize> {
        if !self.dir.is_dir() {
            return Ok(0);
        }
        Ok(list_files_with_extension(&self.dir, "done")?.len())
    }
}
