use std::collections::BTreeMap;
use std::env;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use realid_contracts::prompt::ComposedPrompt;
use realid_contracts::{AspectRatio, EncodedImage};
use serde_json::Value;
use sha2::{Digest, Sha256};

mod files;
mod gemini;
mod orchestrator;
mod studio;

pub use files::{
    edit_file_stem, encode_file, export_image, generation_file_stem, EncodeError,
};
pub use gemini::GeminiBackend;
pub use orchestrator::{BatchKind, BatchReport, FanOutOrchestrator, SlotFailure};
pub use studio::Studio;

pub const DEFAULT_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;
const MIN_REQUEST_TIMEOUT_S: f64 = 15.0;
const MAX_REQUEST_TIMEOUT_S: f64 = 300.0;

/// What one backend call produced.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Image(EncodedImage),
    /// Blocked by the backend's content policy; carries the reported reason.
    Refused(String),
    /// The model answered with text instead of an image.
    TextOnly(String),
}

/// One image-generation capability. A call either returns an outcome or a
/// transport error; the orchestrator turns both into per-slot results.
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Checked once per batch before any call is issued.
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    fn submit(&self, prompt: &ComposedPrompt) -> Result<BackendOutcome>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn ImageBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: ImageBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Arc::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageBackend>> {
        self.backends.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &BackendConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(DryrunBackend);
    registry.register(GeminiBackend::new(config));
    registry
}

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub model: String,
    pub api_base: String,
    pub api_key: Option<String>,
    pub request_timeout_s: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_IMAGE_MODEL.to_string(),
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            api_key: None,
            request_timeout_s: DEFAULT_REQUEST_TIMEOUT_S,
        }
    }
}

impl BackendConfig {
    /// Reads `GEMINI_API_KEY` (then `GOOGLE_API_KEY`, `API_KEY`),
    /// `GEMINI_API_BASE` and `REALID_REQUEST_TIMEOUT`.
    pub fn from_env(model: Option<&str>) -> Self {
        let defaults = Self::default();
        Self {
            model: model
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
                .unwrap_or(defaults.model),
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: non_empty_env("GEMINI_API_KEY")
                .or_else(|| non_empty_env("GOOGLE_API_KEY"))
                .or_else(|| non_empty_env("API_KEY")),
            request_timeout_s: parse_timeout(non_empty_env("REALID_REQUEST_TIMEOUT").as_deref()),
        }
    }
}

fn parse_timeout(raw: Option<&str>) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(MIN_REQUEST_TIMEOUT_S, MAX_REQUEST_TIMEOUT_S))
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
}

/// Offline backend: answers every call with a small solid-colour PNG whose
/// colour is derived from the prompt text.
pub struct DryrunBackend;

impl ImageBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn submit(&self, prompt: &ComposedPrompt) -> Result<BackendOutcome> {
        let bytes = render_dryrun_png(prompt)?;
        Ok(BackendOutcome::Image(EncodedImage::png(BASE64.encode(bytes))))
    }
}

fn render_dryrun_png(prompt: &ComposedPrompt) -> Result<Vec<u8>> {
    let (width, height) = match prompt.aspect_ratio {
        AspectRatio::Portrait3x4 => (96, 128),
        AspectRatio::Portrait9x16 => (72, 128),
    };
    let (r, g, b) = color_from_prompt(&prompt.text, prompt.reference_images.len() as u64);
    let image = RgbImage::from_pixel(width, height, Rgb([r, g, b]));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .context("dryrun image encode failed")?;
    Ok(buffer.into_inner())
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())?;
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

pub(crate) fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let lowered = mime.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return Some("jpg");
    }
    if lowered.contains("webp") {
        return Some("webp");
    }
    if lowered.contains("png") {
        return Some("png");
    }
    if lowered.contains("gif") {
        return Some("gif");
    }
    None
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

/// Pulls `error.message` out of the first JSON object embedded in `text`.
///
/// Backends often wrap the useful message in a JSON body appended to a
/// status line, e.g. `request failed (429): {"error": {"message": ...}}`.
pub(crate) fn nested_error_message(text: &str) -> Option<String> {
    let mut offset = 0;
    while let Some(found) = text[offset..].find('{') {
        let start = offset + found;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value)) = stream.next() {
            let message = value
                .get("error")
                .and_then(|error| error.get("message"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|message| !message.is_empty());
            if let Some(message) = message {
                return Some(message.to_string());
            }
        }
        offset = start + 1;
    }
    None
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
