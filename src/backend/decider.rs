use std::fmt::Write as _;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BackendError;
use crate::model::Chunk;

use super::retry::Retrying;
use super::{classify_http_error, classify_send_error};

/// Everything a decider needs to settle one field of one record.
#[derive(Debug, Clone, Copy)]
pub struct DecisionRequest<'a> {
    pub field: &'a str,
    pub topic: &'a str,
    pub current_value: &'a str,
    /// Sibling fields (grant name, line/modality) that disambiguate the field.
    pub context: &'a [(String, String)],
    pub evidence: &'a [Chunk],
}

/// Proposed value plus indices into `DecisionRequest::evidence` that back it.
/// An empty value means the evidence said nothing usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Decision {
    #[serde(default)]
    pub value: String,
    #[serde(default, alias = "support")]
    pub evidence: Vec<usize>,
}

pub trait FieldDecider: Send + Sync {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, BackendError>;
}

/// OpenAI-compatible `/chat/completions` endpoint answering in JSON mode.
pub struct ChatDecider {
    http_client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

const SYSTEM_PROMPT: &str = "You review one field of a Spanish public grant announcement (convocatoria). \
You receive the field's current value (possibly empty), the grant name and line/modality, and numbered \
evidence fragments retrieved from the grant's official PDFs. If the value is empty, fill it from the \
evidence. If it is present, confirm it, extend it with corroborating detail, or replace it when the \
evidence clearly contradicts it. Keep every category/percentage pairing found in tables. Answer with a \
JSON object {\"value\": string, \"evidence\": [fragment numbers]}. Use an empty value and an empty list \
when the evidence does not settle the field.";

impl ChatDecider {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| BackendError::Permanent(format!("http client setup: {error}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl FieldDecider for ChatDecider {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, BackendError> {
        let started = std::time::Instant::now();
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: render_decision_prompt(request),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(classify_http_error(status, &text));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|error| BackendError::Malformed(error.to_string()))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| BackendError::Malformed("no choices in chat response".to_string()))?;

        debug!(
            field = request.field,
            model = %self.model,
            duration_ms = started.elapsed().as_millis() as u64,
            "decision completed"
        );

        parse_decision(&content)
    }
}

impl<D: FieldDecider> FieldDecider for Retrying<D> {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, BackendError> {
        self.policy.run("decision", || self.inner.decide(request))
    }
}

impl FieldDecider for Box<dyn FieldDecider> {
    fn decide(&self, request: &DecisionRequest<'_>) -> Result<Decision, BackendError> {
        self.as_ref().decide(request)
    }
}

pub fn render_decision_prompt(request: &DecisionRequest<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Field: {}", request.field);
    let _ = writeln!(out, "Meaning: {}", request.topic);
    let _ = writeln!(
        out,
        "Current value: {}",
        serde_json::to_string(request.current_value).unwrap_or_default()
    );
    for (name, value) in request.context {
        let _ = writeln!(
            out,
            "{}: {}",
            name,
            serde_json::to_string(value).unwrap_or_default()
        );
    }
    out.push_str("\nEvidence:\n");
    for (index, chunk) in request.evidence.iter().enumerate() {
        let _ = writeln!(
            out,
            "[{}] id={} fragment={} type={}\n{}\n",
            index,
            chunk.document_id,
            chunk.fragment,
            chunk.content_type.as_str(),
            chunk.content
        );
    }
    out
}

pub fn parse_decision(content: &str) -> Result<Decision, BackendError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str::<Decision>(trimmed)
        .map_err(|error| BackendError::Malformed(format!("decision is not valid JSON: {error}")))
}
