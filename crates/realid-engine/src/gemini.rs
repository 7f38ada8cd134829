use std::time::Duration;

use anyhow::{bail, Context, Result};
use realid_contracts::prompt::ComposedPrompt;
use realid_contracts::EncodedImage;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::{nested_error_message, truncate_text, BackendConfig, BackendOutcome, ImageBackend};

const API_KEY_HEADER: &str = "x-goog-api-key";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Gemini `generateContent` image backend. One blocking request per call,
/// no retries.
pub struct GeminiBackend {
    api_base: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: Duration::try_from_secs_f64(config.request_timeout_s)
                .unwrap_or(DEFAULT_TIMEOUT),
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

    fn build_payload(prompt: &ComposedPrompt) -> Value {
        let mut parts = vec![json!({ "text": prompt.text })];
        for image in &prompt.reference_images {
            parts.push(json!({
                "inlineData": {
                    "mimeType": image.mime_type(),
                    "data": image.data(),
                }
            }));
        }
        json!({
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": prompt.aspect_ratio,
                },
            },
        })
    }

    /// Classifies a successful response body.
    ///
    /// A blocked prompt or a safety/prohibited finish reason is a refusal; the first
    /// inline image wins; otherwise the first text part is returned.
    fn outcome_from_response(payload: &Value) -> BackendOutcome {
        if let Some(reason) = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
        {
            return BackendOutcome::Refused(reason.to_string());
        }

        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        let finish_reason = candidate
            .and_then(|row| row.get("finishReason"))
            .and_then(Value::as_str);
        if let Some(reason) = finish_reason.filter(|reason| is_policy_block(reason)) {
            return BackendOutcome::Refused(reason.to_string());
        }

        let parts = candidate
            .and_then(|row| row.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for part in parts {
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            return BackendOutcome::Image(EncodedImage::new(mime_type, data));
        }

        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .map(str::trim)
            .find(|text| !text.is_empty())
            .unwrap_or_default();
        BackendOutcome::TextOnly(text.to_string())
    }
}

impl ImageBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn preflight(&self) -> Result<()> {
        if self.api_key.is_none() {
            bail!("API key is missing. Set GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY.");
        }
        Ok(())
    }

    fn submit(&self, prompt: &ComposedPrompt) -> Result<BackendOutcome> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("API key is missing. Set GEMINI_API_KEY, GOOGLE_API_KEY or API_KEY.");
        };
        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, api_key)
            .timeout(self.timeout)
            .json(&Self::build_payload(prompt))
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        Ok(Self::outcome_from_response(&payload))
    }
}

/// `SAFETY`, `IMAGE_SAFETY`, `PROHIBITED_CONTENT`, `IMAGE_PROHIBITED_CONTENT`.
fn is_policy_block(finish_reason: &str) -> bool {
    let upper = finish_reason.to_ascii_uppercase();
    upper.contains("SAFETY") || upper.contains("PROHIBITED")
}

fn response_json_or_error(backend: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{backend} response body read failed"))?;
    if !status.is_success() {
        bail!("{}", http_error_message(backend, code, &body));
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{backend} returned invalid JSON payload"))?;
    Ok(parsed)
}

/// Prefers the body's `error.message`; the raw body is only shown, cut
/// short, when it carries none.
fn http_error_message(backend: &str, code: u16, body: &str) -> String {
    let detail = nested_error_message(body).unwrap_or_else(|| truncate_text(body.trim(), 512));
    format!("{backend} request failed ({code}): {detail}")
}
