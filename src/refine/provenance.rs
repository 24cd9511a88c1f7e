use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::model::EvidenceRef;

use super::fields::{MINIMIS_FIELD, ref_name, review_ref_names};

/// Evidence gathered for one record, keyed by `<field>_ref`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecorder {
    document_id: String,
    refs: BTreeMap<String, Vec<EvidenceRef>>,
}

impl ProvenanceRecorder {
    pub fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            refs: BTreeMap::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Appends references not already recorded for `field_ref`.
    pub fn record(&mut self, field_ref: &str, evidence: &[EvidenceRef]) {
        let entry = self.refs.entry(field_ref.to_string()).or_default();
        for reference in evidence {
            if !entry.contains(reference) {
                entry.push(reference.clone());
            }
        }
    }

    pub fn refs(&self, field_ref: &str) -> &[EvidenceRef] {
        self.refs
            .get(field_ref)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_evidence(&self, field_ref: &str) -> bool {
        !self.refs(field_ref).is_empty()
    }

    /// The reference artifact: exactly one key per reviewed field, in review
    /// order. A `Minimis` resolved to `false` without evidence gets the
    /// sentinel reference so "checked and defaulted" stays distinguishable
    /// from "never checked".
    pub fn finalize(&self, minimis: bool) -> Map<String, Value> {
        let minimis_ref = ref_name(MINIMIS_FIELD);
        let mut out = Map::new();

        for field_ref in review_ref_names() {
            let defaulted =
                field_ref == minimis_ref && !minimis && !self.has_evidence(&field_ref);
            let sentinel = [EvidenceRef::sentinel()];
            let refs = if defaulted { &sentinel[..] } else { self.refs(&field_ref) };
            let refs = refs
                .iter()
                .map(|reference| json!({ "id": reference.id, "fragment": reference.fragment }))
                .collect::<Vec<Value>>();
            out.insert(field_ref, Value::Array(refs));
        }

        out
    }
}
