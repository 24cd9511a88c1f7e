mod checkpoint;
mod engine;
mod fields;
mod provenance;
mod record;
mod strategy;
#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};

pub use engine::{RefineEngine, RefineOutcome};
pub use record::load_draft;

pub const REFINED_DIR: &str = "refined";
pub const REFERENCE_DIR: &str = "reference";
pub const STATE_DIR: &str = "state";

/// Where refinement writes its outputs under a JSON root.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub refined_dir: PathBuf,
    pub reference_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn under(json_root: &Path) -> Self {
        Self {
            refined_dir: json_root.join(REFINED_DIR),
            reference_dir: json_root.join(REFERENCE_DIR),
            state_dir: json_root.join(STATE_DIR),
        }
    }

    pub fn refined_path(&self, document_id: &str) -> PathBuf {
        self.refined_dir.join(format!("{document_id}.json"))
    }

    pub fn reference_path(&self, document_id: &str) -> PathBuf {
        self.reference_dir.join(format!("{document_id}.json"))
    }

    pub fn state_path(&self, document_id: &str) -> PathBuf {
        self.state_dir.join(format!("{document_id}.json"))
    }

    pub fn is_complete(&self, document_id: &str) -> bool {
        self.refined_path(document_id).is_file() && self.reference_path(document_id).is_file()
    }
}
