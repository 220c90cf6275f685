use std::time::{Duration, Instant};

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::RETRY_AFTER;
use serde_json::{json, Value};
use tracing::{debug, info};
use veritas_contracts::verdict::response_schema;
use veritas_contracts::AnalysisResult;

use super::{truncate_text, AnalysisClient, AnalysisError, FORENSIC_INSTRUCTION};
use crate::config::EngineConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

const DECLINE_FINISH_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
    "IMAGE_SAFETY",
];

pub struct GeminiClient {
    api_base: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(config: &EngineConfig, model: &str) -> Self {
        Self {
            api_base: config.api_base.trim().trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: model.to_string(),
            timeout: config.request_timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self) -> String {
        let trimmed = self.model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(content: &str, media_type: &str) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": media_type,
                            "data": content,
                        }
                    },
                    { "text": FORENSIC_INSTRUCTION },
                ],
            }],
            "generationConfig": {
                "temperature": 0.2,
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            },
        })
    }

    fn read_response(response: HttpResponse) -> Result<AnalysisResult, AnalysisError> {
        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let body = response
            .text()
            .map_err(|err| AnalysisError::Transport(format!("response body read failed: {err}")))?;
        Self::parse_response(status, &body, retry_after_secs)
    }

    /// Map an HTTP status and body onto a verdict or a classified failure.
    fn parse_response(
        status: u16,
        body: &str,
        retry_after_secs: Option<u64>,
    ) -> Result<AnalysisResult, AnalysisError> {
        if !(200..300).contains(&status) {
            let message = error_message(body);
            return Err(match status {
                401 | 403 => AnalysisError::Authentication { status, message },
                400 if body.contains("API_KEY_INVALID") || body.contains("API key not valid") => {
                    AnalysisError::Authentication { status, message }
                }
                429 => AnalysisError::RateLimited { retry_after_secs },
                _ => AnalysisError::Service { status, message },
            });
        }

        let payload: Value = serde_json::from_str(body).map_err(|err| {
            AnalysisError::Malformed(format!("response is not JSON: {err}"))
        })?;
        let text = Self::extract_text(&payload)?;
        Ok(AnalysisResult::from_model_text(&text)?)
    }

    fn extract_text(payload: &Value) -> Result<String, AnalysisError> {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            return Err(AnalysisError::Declined(format!("prompt blocked ({reason})")));
        }

        let Some(candidate) = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
        else {
            return Err(AnalysisError::Declined("no candidates returned".to_string()));
        };

        let finish_reason = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if DECLINE_FINISH_REASONS.contains(&finish_reason) {
            return Err(AnalysisError::Declined(format!(
                "generation stopped ({finish_reason})"
            )));
        }
        if finish_reason == "MAX_TOKENS" {
            return Err(AnalysisError::Malformed(
                "verdict truncated at the output token limit".to_string(),
            ));
        }

        let text = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                    .filter_map(|part| part.get("text").and_then(Value::as_str))
                    .collect::<String>()
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(AnalysisError::Malformed(
                "candidate carried no text".to_string(),
            ));
        }
        Ok(text)
    }
}

impl AnalysisClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn analyze(&self, content: &str, media_type: &str) -> Result<AnalysisResult, AnalysisError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(AnalysisError::MissingCredentials(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set".to_string(),
            ));
        };
        let endpoint = self.endpoint();
        let payload = Self::build_payload(content, media_type);
        debug!(
            endpoint = %endpoint,
            media_type,
            encoded_len = content.len(),
            "sending analysis request"
        );

        let started = Instant::now();
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(transport_error)?;
        let verdict = Self::read_response(response)?;
        info!(
            model = %self.model,
            classification = %verdict.classification,
            confidence = verdict.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis verdict received"
        );
        Ok(verdict)
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .map(|message| truncate_text(&message, 512))
        .unwrap_or_else(|| truncate_text(body.trim(), 512))
}

/// Request URLs never reach the error text; callers log it.
fn transport_error(err: reqwest::Error) -> AnalysisError {
    AnalysisError::Transport(error_chain_text(&err.without_url()))
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = Some(err);
    while let Some(cause) = current {
        let text = cause.to_string();
        let trimmed = text.trim();
        if !trimmed.is_empty() && parts.last().map(|last| last != trimmed).unwrap_or(true) {
            parts.push(trimmed.to_string());
        }
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), 512)
}
