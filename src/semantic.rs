use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::util::normalize_whitespace;

pub const LOCAL_MODEL_ID: &str = "local-hash-v1";
pub const LOCAL_EMBEDDING_DIM: usize = 384;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticModelConfig {
    pub model_id: String,
    pub dimensions: usize,
    pub backend: String,
}

impl SemanticModelConfig {
    pub fn local(dimensions: usize) -> Self {
        Self {
            model_id: LOCAL_MODEL_ID.to_string(),
            dimensions: dimensions.max(8),
            backend: "local-hash".to_string(),
        }
    }

    pub fn remote(model_id: &str, dimensions: usize) -> Self {
        let trimmed = model_id.trim();
        Self {
            model_id: if trimmed.is_empty() {
                LOCAL_MODEL_ID.to_string()
            } else {
                trimmed.to_string()
            },
            dimensions,
            backend: "http".to_string(),
        }
    }
}

/// Text that gets embedded for a chunk. Tables keep their row breaks so the
/// label/value pairing survives; prose is whitespace-normalized.
pub fn chunk_payload_for_embedding(content: &str, is_table: bool) -> Option<String> {
    let payload = if is_table {
        content
            .lines()
            .map(normalize_whitespace)
            .filter(|line| !line.is_empty())
            .collect::<Vec<String>>()
            .join("\n")
    } else {
        normalize_whitespace(content)
    };

    if payload.is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Deterministic hashed bag-of-words plus bigrams, L2-normalized.
pub fn embed_text_local(payload: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(8);
    let mut vector = vec![0_f32; dims];
    let mut tokens = tokenize_payload(payload);

    if tokens.is_empty() {
        return vector;
    }

    for token in tokens.drain(..) {
        let hash = stable_hash(&token);
        let index = (hash as usize) % dims;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + (((hash >> 48) & 0xFF) as f32 / 255.0);
        vector[index] += sign * weight;
    }

    normalize_vector(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right.iter())
        .map(|(left_value, right_value)| f64::from(*left_value) * f64::from(*right_value))
        .sum::<f64>();
    let left_norm = squared_norm(left).sqrt();
    let right_norm = squared_norm(right).sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }

    dot / (left_norm * right_norm)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(values.len() * 4);
    for value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    let mut out = Vec::<f32>::with_capacity(expected_dim);
    for chunk in blob.chunks_exact(4) {
        out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
    }

    if out.len() == expected_dim {
        Some(out)
    } else {
        None
    }
}

fn stable_hash(value: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn tokenize_payload(payload: &str) -> Vec<String> {
    let normalized = normalize_whitespace(payload);
    if normalized.is_empty() {
        return Vec::new();
    }

    // Accented letters carry meaning in the Spanish sources, so keep any
    // alphanumeric char rather than ASCII only.
    let words = normalized
        .split(' ')
        .map(|value| {
            value
                .chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|value| !value.is_empty())
        .collect::<Vec<String>>();

    if words.is_empty() {
        return Vec::new();
    }

    let mut features = Vec::<String>::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn squared_norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
}

fn normalize_vector(values: &mut [f32]) {
    let squared_norm = squared_norm(values);
    if squared_norm <= 0.0 {
        return;
    }

    let norm = squared_norm.sqrt() as f32;
    if norm == 0.0 {
        return;
    }

    for value in values {
        *value /= norm;
    }
}
