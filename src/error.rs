use std::path::PathBuf;

use thiserror::Error;

/// Failures talking to the embedding or decision backends.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Rate limits, timeouts and 5xx responses. Worth another attempt.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// Bad credentials, unknown endpoint or model. Retrying cannot help.
    #[error("backend rejected request: {0}")]
    Permanent(String),

    /// The backend refused this one request (bad input, payload too large)
    /// while the credentials and endpoint are fine.
    #[error("backend rejected this request: {0}")]
    Rejected(String),

    /// The response arrived but could not be interpreted.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: String,
        attempts: usize,
        last: String,
    },
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector index unavailable at {path}: {reason}")]
    Unavailable { path: PathBuf, reason: String },

    #[error(
        "vector index at {path} was built with model '{indexed_model}' ({indexed_dim} dims), not '{requested_model}' ({requested_dim} dims)"
    )]
    ModelMismatch {
        path: PathBuf,
        indexed_model: String,
        indexed_dim: usize,
        requested_model: String,
        requested_dim: usize,
    },
}

/// A search ran past its wall-clock budget. Local to the search that hit it.
#[derive(Debug, Error)]
#[error(
    "search timeout exceeded during {stage} (elapsed {elapsed_ms:.1} ms > budget {budget_ms} ms); lower k or increase --search-timeout-ms"
)]
pub struct SearchTimeout {
    pub stage: String,
    pub elapsed_ms: f64,
    pub budget_ms: u64,
}

/// Whether an error means shared infrastructure is gone and the whole batch
/// has to stop, as opposed to a failure local to one grant job.
pub fn is_batch_fatal(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| {
        if let Some(backend) = cause.downcast_ref::<BackendError>() {
            return matches!(
                backend,
                BackendError::Exhausted { .. } | BackendError::Permanent(_)
            );
        }
        cause.downcast_ref::<IndexError>().is_some()
    })
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[test]
    fn exhausted_backend_is_fatal_through_context_layers() {
        let error = Err::<(), _>(BackendError::Exhausted {
            operation: "embedding".to_string(),
            attempts: 3,
            last: "429".to_string(),
        })
        .context("failed to index G1_ficha")
        .expect_err("error expected");

        assert!(is_batch_fatal(&error));
    }

    #[test]
    fn malformed_response_and_plain_errors_are_contained() {
        let malformed = anyhow::Error::new(BackendError::Malformed("not json".to_string()));
        assert!(!is_batch_fatal(&malformed));

        let plain = anyhow::anyhow!("draft is missing 'Anio'");
        assert!(!is_batch_fatal(&plain));
    }

    #[test]
    fn search_timeouts_and_rejections_are_contained() {
        let timeout = anyhow::Error::new(SearchTimeout {
            stage: "ranking".to_string(),
            elapsed_ms: 12.0,
            budget_ms: 10,
        })
        .context("evidence lookup failed for 'Anio'");
        assert!(!is_batch_fatal(&timeout));

        let rejected = anyhow::Error::new(BackendError::Rejected("400 Bad Request".to_string()));
        assert!(!is_batch_fatal(&rejected));
    }

    #[test]
    fn index_errors_are_fatal() {
        let error = anyhow::Error::new(IndexError::Unavailable {
            path: PathBuf::from("/nowhere/index.sqlite"),
            reason: "unable to open database file".to_string(),
        });
        assert!(is_batch_fatal(&error));
    }
}
