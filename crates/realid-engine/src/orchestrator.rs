use std::fmt;
use std::sync::Arc;
use std::thread;

use realid_contracts::prompt::{
    compose, compose_edit, edit_variant_count, edit_variants, generation_variants, ComposedPrompt,
};
use realid_contracts::request::MAX_IMAGE_COUNT;
use realid_contracts::session::EditRequest;
use realid_contracts::{EncodedImage, GenerationRequestSpec, StudioError, StudioResult};

use crate::{error_chain_text, nested_error_message, truncate_text, BackendOutcome, ImageBackend};

const GENERATION_PREVIEW_CHARS: usize = 100;
const EDIT_PREVIEW_CHARS: usize = 50;
const ERROR_DETAIL_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    Generation,
    Edit,
}

impl BatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Edit => "edit",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Self::Generation => "Image generation failed.",
            Self::Edit => "Image edit failed.",
        }
    }

    fn preview_chars(self) -> usize {
        match self {
            Self::Generation => GENERATION_PREVIEW_CHARS,
            Self::Edit => EDIT_PREVIEW_CHARS,
        }
    }
}

/// A slot that produced no image, with its user-facing reason already
/// tagged by the 1-based slot number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotFailure {
    pub slot: usize,
    pub message: String,
}

impl fmt::Display for SlotFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything one batch produced, in slot order.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub kind: BatchKind,
    pub requested: usize,
    pub images: Vec<EncodedImage>,
    pub failures: Vec<SlotFailure>,
}

impl BatchReport {
    /// At least one image is a success; partial failures are dropped.
    pub fn into_result(self) -> StudioResult<Vec<EncodedImage>> {
        if !self.images.is_empty() {
            return Ok(self.images);
        }
        let detail = self
            .failures
            .iter()
            .map(|failure| failure.message.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Err(StudioError::Batch(format!(
            "{}\nDetail: {detail}",
            self.kind.headline()
        )))
    }
}

/// Issues one backend call per variant concurrently and collects every
/// outcome before deciding success.
#[derive(Clone)]
pub struct FanOutOrchestrator {
    backend: Arc<dyn ImageBackend>,
}

impl FanOutOrchestrator {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn generate(&self, spec: &GenerationRequestSpec) -> StudioResult<Vec<EncodedImage>> {
        self.run_generation(spec)?.into_result()
    }

    pub fn edit(&self, request: &EditRequest) -> StudioResult<Vec<EncodedImage>> {
        self.run_edit(request)?.into_result()
    }

    /// Fails early with an input error; otherwise reports every slot.
    pub fn run_generation(&self, spec: &GenerationRequestSpec) -> StudioResult<BatchReport> {
        spec.validate()?;
        self.preflight()?;
        let count = usize::from(spec.image_count.min(MAX_IMAGE_COUNT));
        let prompts = generation_variants(count)
            .iter()
            .map(|variant| compose(spec, variant))
            .collect();
        Ok(self.run_batch(BatchKind::Generation, prompts))
    }

    pub fn run_edit(&self, request: &EditRequest) -> StudioResult<BatchReport> {
        self.preflight()?;
        let count = edit_variant_count(&request.instruction).min(usize::from(MAX_IMAGE_COUNT));
        let prompts = edit_variants(count)
            .iter()
            .map(|variant| {
                compose_edit(
                    &request.reference,
                    &request.instruction,
                    request.identity_reference.as_ref(),
                    request.context.as_ref(),
                    variant,
                )
            })
            .collect();
        Ok(self.run_batch(BatchKind::Edit, prompts))
    }

    fn preflight(&self) -> StudioResult<()> {
        self.backend
            .preflight()
            .map_err(|err| StudioError::input(err.to_string()))
    }

    fn run_batch(&self, kind: BatchKind, prompts: Vec<ComposedPrompt>) -> BatchReport {
        let requested = prompts.len();
        let outcomes: Vec<Result<BackendOutcome, String>> = thread::scope(|scope| {
            let handles: Vec<_> = prompts
                .into_iter()
                .map(|prompt| {
                    let backend = Arc::clone(&self.backend);
                    scope.spawn(move || {
                        backend
                            .submit(&prompt)
                            .map_err(|err| describe_error(&err))
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err("backend call panicked".to_string()))
                })
                .collect()
        });

        let mut images = Vec::new();
        let mut failures = Vec::new();
        for (index, outcome) in outcomes.into_iter().enumerate() {
            let slot = index + 1;
            let message = match outcome {
                Ok(BackendOutcome::Image(image)) => {
                    images.push(image);
                    continue;
                }
                Ok(BackendOutcome::Refused(reason)) => {
                    format!("Image {slot}: rejected by safety policy ({reason}).")
                }
                Ok(BackendOutcome::TextOnly(text)) => {
                    let trimmed = text.trim();
                    let preview: String = if trimmed.is_empty() {
                        "No content".to_string()
                    } else {
                        trimmed.chars().take(kind.preview_chars()).collect()
                    };
                    // The preview always ends in "...", cut or not.
                    format!("Image {slot} failed: model responded with text (\"{preview}...\").")
                }
                Err(detail) => format!("Image {slot} error: {detail}"),
            };
            failures.push(SlotFailure { slot, message });
        }

        BatchReport {
            kind,
            requested,
            images,
            failures,
        }
    }
}

fn describe_error(err: &anyhow::Error) -> String {
    let chain = error_chain_text(err, usize::MAX);
    nested_error_message(&chain)
        .map(|message| truncate_text(&message, ERROR_DETAIL_CHARS))
        .unwrap_or_else(|| truncate_text(&chain, ERROR_DETAIL_CHARS))
}
