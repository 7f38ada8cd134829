use thiserror::Error;

/// User-facing failures surfaced by the studio.
///
/// Every variant renders to the single message shown in the session's
/// error slot; backend transport details never escape as raw errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StudioError {
    /// Rejected before any backend call (missing subject, missing key, bad count).
    #[error("{0}")]
    Input(String),
    /// Every slot of a fan-out batch failed.
    #[error("{0}")]
    Batch(String),
    #[error("No reference image to edit. Select a candidate and start over.")]
    MissingReference,
}

impl StudioError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input(message.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input(_) => "input",
            Self::Batch(_) => "batch",
            Self::MissingReference => "missing_reference",
        }
    }
}

pub type StudioResult<T> = Result<T, StudioError>;
