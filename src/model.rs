use serde::{Deserialize, Serialize};

pub const SENTINEL_FRAGMENT: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Table,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Table => "table",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "texto" => Some(ContentType::Text),
            "table" | "tabla" => Some(ContentType::Table),
            _ => None,
        }
    }
}

/// One indexed unit of a source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub document_id: String,
    pub fragment: String,
    pub content_type: ContentType,
    pub content: String,
}

impl Chunk {
    pub fn evidence_ref(&self) -> EvidenceRef {
        EvidenceRef {
            id: self.document_id.clone(),
            fragment: self.fragment.clone(),
        }
    }
}

/// Points at exactly one chunk of one source document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub id: String,
    pub fragment: String,
}

impl EvidenceRef {
    /// Marks a field that was checked and defaulted without a backing fragment.
    pub fn sentinel() -> Self {
        Self {
            id: SENTINEL_FRAGMENT.to_string(),
            fragment: SENTINEL_FRAGMENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub model_id: String,
    pub embedding_dim: usize,
    pub index_count: usize,
    pub documents_indexed: usize,
    pub documents_skipped: usize,
    pub documents_failed: usize,
    pub chunks_indexed: usize,
    pub text_chunks_indexed: usize,
    pub table_chunks_indexed: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub workers: usize,
    pub drafts_found: usize,
    pub drafts_skipped: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub jobs_not_started: usize,
    pub fields_verified: usize,
    pub fields_corrected: usize,
    pub fields_unresolved: usize,
    pub failures: Vec<JobFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    pub document_id: String,
    pub reason: String,
}
