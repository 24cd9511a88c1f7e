use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value};

use crate::util::file_stem;

use super::fields::{CONTEXT_FIELDS, LATE_FIELDS, REQUIRED_FIELDS};

/// A grant line's draft, keyed by field name in draft order.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantRecord {
    pub document_id: String,
    pub vector_id: String,
    pub fields: Map<String, Value>,
}

impl GrantRecord {
    pub fn from_fields(document_id: &str, fields: Map<String, Value>) -> Result<Self> {
        let missing = REQUIRED_FIELDS
            .iter()
            .filter(|field| !fields.contains_key(**field))
            .copied()
            .collect::<Vec<&str>>();
        if !missing.is_empty() {
            bail!(
                "draft {} is missing required fields: {}",
                document_id,
                missing.join(", ")
            );
        }

        let mut record = Self {
            document_id: document_id.to_string(),
            vector_id: vector_id_from_stem(document_id),
            fields,
        };
        record.add_late_fields();
        Ok(record)
    }

    fn add_late_fields(&mut self) {
        for field in LATE_FIELDS {
            if !self.fields.contains_key(field) {
                self.fields
                    .insert(field.to_string(), Value::String(String::new()));
            }
        }
    }

    /// Field value as text. Absent and null read as `""`.
    pub fn get_str(&self, field: &str) -> String {
        match self.fields.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(value)) => value.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn set_str(&mut self, field: &str, value: &str) {
        self.fields
            .insert(field.to_string(), Value::String(value.to_string()));
    }

    /// Read-only sibling fields handed to every decision.
    pub fn context(&self) -> Vec<(String, String)> {
        CONTEXT_FIELDS
            .iter()
            .map(|field| (field.to_string(), self.get_str(field)))
            .collect()
    }
}

pub fn load_draft(path: &Path) -> Result<GrantRecord> {
    let document_id = file_stem(path)?;
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let value: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse draft {}", path.display()))?;

    let Value::Object(fields) = value else {
        bail!("draft {} is not a JSON object", path.display());
    };
    GrantRecord::from_fields(&document_id, fields)
}

/// Grant folder a document belongs to: `abc` → `abc`, `abc_ficha` → `abc`,
/// `convo_abc_linea1` → `abc`.
pub fn vector_id_from_stem(stem: &str) -> String {
    let parts = stem.split('_').collect::<Vec<&str>>();
    match parts.as_slice() {
        [] => String::new(),
        [only] => (*only).to_string(),
        [first, _] => (*first).to_string(),
        [_, second, ..] => (*second).to_string(),
    }
}

/// `true`, `sí`, `si` and `yes` (any case) are true; everything else is false.
pub fn normalize_minimis(raw: &str) -> bool {
    matches!(
        raw.trim().to_lowercase().as_str(),
        "true" | "sí" | "si" | "yes"
    )
}
