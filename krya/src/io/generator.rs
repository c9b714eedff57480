//! Code generation through a hosted language model.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::core::cleaning::clean_code_response;
use crate::io::config::{ConfigHandle, GenerationConfig};
use crate::io::prompt::{PromptBuilder, RenderedPrompt};

/// One generation call: the user instruction plus, after a failed attempt,
/// the formatted result of that attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub feedback: Option<String>,
}

impl GenerationRequest {
    pub fn initial(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            feedback: None,
        }
    }

    pub fn with_feedback(prompt: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            feedback: Some(feedback.into()),
        }
    }
}

/// Errors from a generation call. None of them are retried here.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("no API key configured (set generation.api_key or ${env})")]
    MissingCredential { env: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("model returned no code")]
    EmptyResponse,

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("prompt rendering failed: {0}")]
    Prompt(String),
}

/// Produces cleaned script source for a request.
#[async_trait]
pub trait CodeGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError>;
}

/// Client for the Gemini `generateContent` endpoint.
///
/// Reads a fresh config snapshot on every call.
pub struct GeminiGenerator {
    config: ConfigHandle,
    instruction_path: Option<PathBuf>,
    http: Client,
}

impl GeminiGenerator {
    pub fn new(config: ConfigHandle) -> Self {
        Self {
            config,
            instruction_path: None,
            http: Client::new(),
        }
    }

    /// Prefer a user-supplied system instruction file when present.
    pub fn with_instruction_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instruction_path = Some(path.into());
        self
    }

    fn render(&self, cfg: &GenerationConfig, request: &GenerationRequest) -> Result<RenderedPrompt, GenerateError> {
        let mut builder = PromptBuilder::new(cfg.prompt_budget_bytes);
        if let Some(path) = &self.instruction_path {
            builder = builder.with_instruction_path(path);
        }
        builder
            .build(&request.prompt, request.feedback.as_deref())
            .map_err(|err| GenerateError::Prompt(format!("{err:#}")))
    }
}

#[async_trait]
impl CodeGenerator for GeminiGenerator {
    #[instrument(skip_all, fields(has_feedback = request.feedback.is_some()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerateError> {
        let cfg = self.config.snapshot().generation;
        let api_key = cfg
            .resolve_api_key()
            .ok_or_else(|| GenerateError::MissingCredential {
                env: cfg.api_key_env.clone(),
            })?;

        let rendered = self.render(&cfg, request)?;
        let url = endpoint_url(&cfg);
        let body = build_request_body(&cfg, &rendered);
        debug!(model = %cfg.model_name, prompt_bytes = rendered.user.len(), "sending generation request");

        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status = status.as_u16(), "generation request rejected");
            return Err(GenerateError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let payload: Value = response.json().await?;
        let text = parse_response(&payload)?;
        let code = clean_code_response(&text);
        if code.is_empty() {
            return Err(GenerateError::EmptyResponse);
        }
        debug!(code_bytes = code.len(), "generation succeeded");
        Ok(code)
    }
}

fn endpoint_url(cfg: &GenerationConfig) -> String {
    format!(
        "{}/v1beta/models/{}:generateContent",
        cfg.base_url.trim_end_matches('/'),
        cfg.model_name
    )
}

fn build_request_body(cfg: &GenerationConfig, prompt: &RenderedPrompt) -> Value {
    let mut body = json!({
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt.user }],
        }],
        "generationConfig": {
            "temperature": cfg.temperature,
            "topP": cfg.top_p,
            "topK": cfg.top_k,
            "maxOutputTokens": cfg.max_output_tokens,
            "responseMimeType": cfg.response_mime_type,
        },
    });
    if !prompt.system.trim().is_empty() {
        body["systemInstruction"] = json!({ "parts": [{ "text": prompt.system }] });
    }
    body
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Concatenate the text parts of the first candidate.
fn parse_response(payload: &Value) -> Result<String, GenerateError> {
    let parsed: GenerateContentResponse = serde_json::from_value(payload.clone())
        .map_err(|err| GenerateError::InvalidResponse(err.to_string()))?;
    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
        .unwrap_or_default();
    if text.trim().is_empty() {
        return Err(GenerateError::EmptyResponse);
    }
    Ok(text)
}
