use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{Decision, DecisionRequest, FieldDecider};
use crate::error::{BackendError, is_batch_fatal};
use crate::index::VectorIndex;
use crate::model::{Chunk, EvidenceRef};
use crate::util::{now_utc_string, write_json_atomic};

use super::ArtifactLayout;
use super::checkpoint::{
    CHECKPOINT_VERSION, Checkpoint, clear_checkpoint, load_checkpoint, save_checkpoint,
};
use super::fields::{FIELD_STRATEGIES, FieldStrategy, MINIMIS_FIELD};
use super::provenance::ProvenanceRecorder;
use super::record::{GrantRecord, normalize_minimis};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldState {
    Empty,
    Populated,
    Verified,
    Corrected,
}

impl FieldState {
    fn initial(value: &str) -> Self {
        if value.trim().is_empty() {
            FieldState::Empty
        } else {
            FieldState::Populated
        }
    }

    /// Settled fields are not reviewed again on resume.
    pub fn is_settled(self) -> bool {
        matches!(self, FieldState::Verified | FieldState::Corrected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldState::Empty => "empty",
            FieldState::Populated => "populated",
            FieldState::Verified => "verified",
            FieldState::Corrected => "corrected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldProgress {
    pub state: FieldState,
    pub attempts: usize,
}

/// A decision that evidence backs up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub state: FieldState,
    pub value: String,
    pub refs: Vec<EvidenceRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefineOutcome {
    pub document_id: String,
    pub resumed: bool,
    pub verified: usize,
    pub corrected: usize,
    pub unresolved: usize,
}

/// Turns a decider's answer into a field transition.
///
/// Indices outside `evidence` are dropped. A blank value or a value with no
/// remaining support is not usable. A value equal to the current one
/// (ignoring case and spacing), or one that extends it, verifies the field;
/// anything else replaces it.
pub fn classify(current: &str, decision: &Decision, evidence: &[Chunk]) -> Option<Resolution> {
    let proposed = decision.value.trim();
    let mut refs = Vec::<EvidenceRef>::new();
    for reference in decision
        .evidence
        .iter()
        .filter_map(|index| evidence.get(*index))
        .map(Chunk::evidence_ref)
    {
        if !refs.contains(&reference) {
            refs.push(reference);
        }
    }

    if proposed.is_empty() || refs.is_empty() {
        return None;
    }

    let current_key = comparison_key(current);
    let proposed_key = comparison_key(proposed);
    if !current_key.is_empty() && proposed_key == current_key {
        return Some(Resolution {
            state: FieldState::Verified,
            value: current.to_string(),
            refs,
        });
    }

    let state = if !current_key.is_empty() && proposed_key.contains(&current_key) {
        FieldState::Verified
    } else {
        FieldState::Corrected
    };
    Some(Resolution {
        state,
        value: proposed.to_string(),
        refs,
    })
}

fn comparison_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ")
        .to_lowercase()
}

/// Reviews every field of a record against its grant's index and writes the
/// refined and reference artifacts.
pub struct RefineEngine<'a> {
    decider: &'a dyn FieldDecider,
    strategies: &'a [FieldStrategy],
}

impl<'a> RefineEngine<'a> {
    pub fn new(decider: &'a dyn FieldDecider) -> Self {
        Self {
            decider,
            strategies: &FIELD_STRATEGIES,
        }
    }

    pub fn refine(
        &self,
        mut record: GrantRecord,
        index: &VectorIndex<'_>,
        layout: &ArtifactLayout,
    ) -> Result<RefineOutcome> {
        let document_id = record.document_id.clone();
        let state_path = layout.state_path(&document_id);

        let mut provenance = ProvenanceRecorder::new(&document_id);
        let mut progress = BTreeMap::<String, FieldProgress>::new();
        let mut resumed = false;
        match load_checkpoint(&state_path) {
            Ok(Some(checkpoint))
                if checkpoint.document_id == document_id
                    && checkpoint.provenance.document_id() == document_id =>
            {
                record.fields = checkpoint.record;
                provenance = checkpoint.provenance;
                progress = checkpoint.fields;
                resumed = true;
                info!(
                    doc_id = %document_id,
                    settled = progress.values().filter(|entry| entry.state.is_settled()).count(),
                    "resuming from checkpoint"
                );
            }
            Ok(_) => {}
            Err(error) => warn!(
                doc_id = %document_id,
                error = %format!("{error:#}"),
                "ignoring unreadable checkpoint"
            ),
        }

        let context = record.context();

        for strategy in self.strategies {
            let current = record.get_str(strategy.field);
            let prior = progress
                .get(strategy.field)
                .copied()
                .unwrap_or(FieldProgress {
                    state: FieldState::initial(&current),
                    attempts: 0,
                });
            if prior.state.is_settled() {
                debug!(doc_id = %document_id, field = strategy.field, "field already settled");
                continue;
            }

            let budget = strategy.attempt_budget();
            let mut attempt = prior.attempts;
            let mut resolution = None;
            while resolution.is_none() && attempt < budget {
                let evidence = match strategy.retrieve(index, attempt) {
                    Ok(evidence) => evidence,
                    Err(error) if is_batch_fatal(&error) => {
                        return Err(error.context(format!(
                            "retrieval for '{}' failed in {}",
                            strategy.field, document_id
                        )));
                    }
                    Err(error) => {
                        warn!(
                            doc_id = %document_id,
                            field = strategy.field,
                            attempt = attempt + 1,
                            error = %format!("{error:#}"),
                            "retrieval failed, treating attempt as no evidence"
                        );
                        Vec::new()
                    }
                };
                attempt += 1;
                if evidence.is_empty() {
                    continue;
                }

                let request = DecisionRequest {
                    field: strategy.field,
                    topic: strategy.topic,
                    current_value: &current,
                    context: &context,
                    evidence: &evidence,
                };
                match self.decider.decide(&request) {
                    Ok(decision) => resolution = classify(&current, &decision, &evidence),
                    Err(BackendError::Malformed(reason) | BackendError::Rejected(reason)) => warn!(
                        doc_id = %document_id,
                        field = strategy.field,
                        attempt,
                        reason = %reason,
                        "unusable decision, treating attempt as no evidence"
                    ),
                    Err(error) => {
                        return Err(error).with_context(|| {
                            format!("decision for '{}' failed in {}", strategy.field, document_id)
                        });
                    }
                }
            }
            let attempts = attempt - prior.attempts;

            let state = match resolution {
                Some(resolution) => {
                    record.set_str(strategy.field, &resolution.value);
                    provenance.record(&strategy.ref_name(), &resolution.refs);
                    info!(
                        doc_id = %document_id,
                        field = strategy.field,
                        from = prior.state.as_str(),
                        to = resolution.state.as_str(),
                        refs = resolution.refs.len(),
                        attempts,
                        "field resolved"
                    );
                    resolution.state
                }
                None => {
                    debug!(
                        doc_id = %document_id,
                        field = strategy.field,
                        attempts,
                        "no usable evidence"
                    );
                    prior.state
                }
            };
            progress.insert(
                strategy.field.to_string(),
                FieldProgress {
                    state,
                    attempts: attempt,
                },
            );

            save_checkpoint(
                &state_path,
                &Checkpoint {
                    checkpoint_version: CHECKPOINT_VERSION,
                    document_id: document_id.clone(),
                    updated_at: now_utc_string(),
                    record: record.fields.clone(),
                    provenance: provenance.clone(),
                    fields: progress.clone(),
                },
            )?;
        }

        let minimis = normalize_minimis(&record.get_str(MINIMIS_FIELD));
        let mut refined = record.fields;
        refined.insert(MINIMIS_FIELD.to_string(), Value::Bool(minimis));
        let reference = provenance.finalize(minimis);

        write_json_atomic(&layout.refined_path(&document_id), &refined)?;
        write_json_atomic(&layout.reference_path(&document_id), &reference)?;
        clear_checkpoint(&state_path)?;

        let mut outcome = RefineOutcome {
            document_id,
            resumed,
            ..RefineOutcome::default()
        };
        for strategy in self.strategies {
            match progress.get(strategy.field).map(|entry| entry.state) {
                Some(FieldState::Verified) => outcome.verified += 1,
                Some(FieldState::Corrected) => outcome.corrected += 1,
                _ => outcome.unresolved += 1,
            }
        }

        info!(
            doc_id = %outcome.document_id,
            verified = outcome.verified,
            corrected = outcome.corrected,
            unresolved = outcome.unresolved,
            "record refined"
        );
        Ok(outcome)
    }
}
