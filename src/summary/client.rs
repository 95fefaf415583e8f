//! Anthropic Messages API client

use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::transcript::extract_json;
use super::{Summary, FALLBACK_SUMMARY, FALLBACK_TITLE};
use crate::config::SummarySettings;

const ANTHROPIC_VERSION: &str = "2023-06-01";
/// Anthropic's "overloaded" status, handled like a rate limit
const STATUS_OVERLOADED: u16 = 529;

/// Errors from a summarization call
#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Rate limited by the API")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Failed to parse summary response: {0}")]
    Parse(String),

    #[error("Summary request failed: {0}")]
    Transport(String),
}

/// Produces a summary from a prepared transcript
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, transcript: &str) -> Result<Summary, SummaryError>;
}

/// Summarizer backed by the Anthropic Messages API
#[derive(Clone)]
pub struct AnthropicSummarizer {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicSummarizer {
    pub fn new(settings: &SummarySettings) -> Result<Self, SummaryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| SummaryError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone().filter(|key| !key.is_empty()),
            endpoint: format!("{}/v1/messages", settings.base_url.trim_end_matches('/')),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }

    /// Whether an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    async fn send_request(&self, api_key: &str, body: &CreateMessageRequest) -> Result<String, SummaryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| SummaryError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers().get("retry-after"));
            let body_text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body_text, retry_after));
        }

        let parsed: CreateMessageResponse = response
            .json()
            .await
            .map_err(|e| SummaryError::Parse(e.to_string()))?;

        parsed
            .content
            .into_iter()
            .find_map(|block| match block {
                ContentBlockResponse::Text { text } => Some(text),
                ContentBlockResponse::Other => None,
            })
            .ok_or_else(|| SummaryError::Parse("response contained no text".to_string()))
    }
}

#[async_trait]
impl Summarizer for AnthropicSummarizer {
    async fn summarize(&self, transcript: &str) -> Result<Summary, SummaryError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| SummaryError::Auth("ANTHROPIC_API_KEY is not set".to_string()))?;

        let request = CreateMessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            messages: vec![Message {
                role: "user",
                content: summary_prompt(transcript),
            }],
        };

        debug!("Requesting summary ({} transcript chars)", transcript.len());
        let text = self.send_request(api_key, &request).await?;
        parse_summary(&text)
    }
}

fn summary_prompt(transcript: &str) -> String {
    format!(
        "Analyze the following coding assistant session and reply with JSON only:\n\
         {{\n  \"title\": \"short title, at most 10 words\",\n  \"summary\": \"what the session is about, at most 50 words\"\n}}\n\n\
         Session output:\n{transcript}\n\n\
         Output only the JSON object, nothing else."
    )
}

/// Parse the model's reply into a summary, filling missing fields
pub fn parse_summary(text: &str) -> Result<Summary, SummaryError> {
    let reply: SummaryReply =
        serde_json::from_str(extract_json(text)).map_err(|e| SummaryError::Parse(e.to_string()))?;

    let title = reply
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_TITLE.to_string());
    let summary = reply
        .summary
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_SUMMARY.to_string());

    Ok(Summary { title, summary })
}

#[derive(Deserialize)]
struct SummaryReply {
    title: Option<String>,
    summary: Option<String>,
}

#[derive(Serialize)]
struct CreateMessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct CreateMessageResponse {
    content: Vec<ContentBlockResponse>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlockResponse {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn map_http_error(status: StatusCode, body: &str, retry_after: Option<Duration>) -> SummaryError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.to_string());

    match status.as_u16() {
        429 | STATUS_OVERLOADED => SummaryError::RateLimited { retry_after },
        401 | 403 => SummaryError::Auth(message),
        code => SummaryError::Transport(format!("HTTP {code}: {message}")),
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
