mod decider;
mod embedder;
mod retry;

use reqwest::StatusCode;

use crate::error::BackendError;

pub use decider::{ChatDecider, Decision, DecisionRequest, FieldDecider};
pub use embedder::{Embedder, HttpEmbedder, LocalHashEmbedder};
pub use retry::{RetryPolicy, Retrying};

fn classify_http_error(status: StatusCode, body: &str) -> BackendError {
    let message = format!("{}: {}", status, body.trim());
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        BackendError::Transient(message)
    } else if status == StatusCode::BAD_REQUEST
        || status == StatusCode::PAYLOAD_TOO_LARGE
        || status == StatusCode::UNPROCESSABLE_ENTITY
    {
        BackendError::Rejected(message)
    } else {
        BackendError::Permanent(message)
    }
}

fn classify_send_error(error: reqwest::Error) -> BackendError {
    if error.is_builder() {
        BackendError::Permanent(error.to_string())
    } else {
        BackendError::Transient(error.to_string())
    }
}
