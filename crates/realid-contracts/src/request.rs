use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{StudioError, StudioResult};

pub const MIN_IMAGE_COUNT: u8 = 1;
pub const MAX_IMAGE_COUNT: u8 = 4;
pub const DEFAULT_IMAGE_COUNT: u8 = 2;

/// Base64 image payload with its MIME type.
///
/// The payload is shared, so cloning an image into a new snapshot or
/// request does not copy the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    mime_type: String,
    data: Arc<str>,
}

impl EncodedImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Arc<str>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn png(data: impl Into<Arc<str>>) -> Self {
        Self::new("image/png", data)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    /// Short stable id for logs; never log the payload itself.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.mime_type.as_bytes());
        hasher.update(self.data.as_bytes());
        let digest = hasher.finalize();
        hex::encode(&digest[..6])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CameraMode {
    #[default]
    #[serde(rename = "studio")]
    StudioMediumFormat,
    #[serde(rename = "phone")]
    PhoneAmateur,
}

impl CameraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StudioMediumFormat => "studio",
            Self::PhoneAmateur => "phone",
        }
    }
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "studio" | "medium_format" | "mirrorless" => Ok(Self::StudioMediumFormat),
            "phone" | "iphone" | "amateur" => Ok(Self::PhoneAmateur),
            other => Err(format!(
                "unknown camera mode '{other}' (expected studio or phone)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "9:16")]
    Portrait9x16,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Portrait3x4 => "3:4",
            Self::Portrait9x16 => "9:16",
        }
    }

    pub fn is_vertical_phone(self) -> bool {
        self == Self::Portrait9x16
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "3:4" | "3x4" => Ok(Self::Portrait3x4),
            "9:16" | "9x16" => Ok(Self::Portrait9x16),
            other => Err(format!(
                "unsupported aspect ratio '{other}' (expected 3:4 or 9:16)"
            )),
        }
    }
}

/// Everything the user filled in for one generation round.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequestSpec {
    pub subject_image: Option<EncodedImage>,
    pub location_image: Option<EncodedImage>,
    pub outfit_image: Option<EncodedImage>,
    pub location_text: String,
    pub outfit_text: String,
    pub body_details: String,
    pub prompt: String,
    pub camera_mode: CameraMode,
    pub aspect_ratio: AspectRatio,
    pub image_count: u8,
}

impl Default for GenerationRequestSpec {
    fn default() -> Self {
        Self {
            subject_image: None,
            location_image: None,
            outfit_image: None,
            location_text: String::new(),
            outfit_text: String::new(),
            body_details: String::new(),
            prompt: String::new(),
            camera_mode: CameraMode::default(),
            aspect_ratio: AspectRatio::default(),
            image_count: DEFAULT_IMAGE_COUNT,
        }
    }
}

impl GenerationRequestSpec {
    pub fn with_subject(subject: EncodedImage) -> Self {
        Self {
            subject_image: Some(subject),
            ..Self::default()
        }
    }

    /// Checks the preconditions of a generation round and returns the subject.
    pub fn validate(&self) -> StudioResult<&EncodedImage> {
        let Some(subject) = self.subject_image.as_ref() else {
            return Err(StudioError::input("Subject image is required."));
        };
        if !(MIN_IMAGE_COUNT..=MAX_IMAGE_COUNT).contains(&self.image_count) {
            return Err(StudioError::Input(format!(
                "Image count must be between {MIN_IMAGE_COUNT} and {MAX_IMAGE_COUNT} (got {}).",
                self.image_count
            )));
        }
        Ok(subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_subject_image() {
        let err = GenerationRequestSpec::default().validate().unwrap_err();
        assert_eq!(err, StudioError::input("Subject image is required."));
    }

    #[test]
    fn validate_bounds_image_count() {
        let mut spec = GenerationRequestSpec::with_subject(EncodedImage::png("AAAA"));
        spec.image_count = 0;
        assert!(matches!(spec.validate(), Err(StudioError::Input(_))));
        spec.image_count = 5;
        assert!(matches!(spec.validate(), Err(StudioError::Input(_))));
        spec.image_count = 4;
        assert_eq!(spec.validate().map(EncodedImage::data), Ok("AAAA"));
    }

    #[test]
    fn camera_and_ratio_parse_cli_spellings() {
        assert_eq!("iPhone".parse::<CameraMode>(), Ok(CameraMode::PhoneAmateur));
        assert_eq!("studio".parse::<CameraMode>(), Ok(CameraMode::StudioMediumFormat));
        assert_eq!("9:16".parse::<AspectRatio>(), Ok(AspectRatio::Portrait9x16));
        assert!("16:9".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let image = EncodedImage::png("iVBORw0KGgo");
        assert_eq!(image.fingerprint(), image.clone().fingerprint());
        assert_eq!(image.fingerprint().len(), 12);
        assert_ne!(image.fingerprint(), EncodedImage::png("other").fingerprint());
    }

    #[test]
    fn camera_and_ratio_serialize_as_their_short_names() -> anyhow::Result<()> {
        for mode in [CameraMode::StudioMediumFormat, CameraMode::PhoneAmateur] {
            let value = serde_json::to_value(mode)?;
            assert_eq!(value, serde_json::json!(mode.as_str()));
            assert_eq!(serde_json::from_value::<CameraMode>(value)?, mode);
        }
        for ratio in [AspectRatio::Portrait3x4, AspectRatio::Portrait9x16] {
            let value = serde_json::to_value(ratio)?;
            assert_eq!(value, serde_json::json!(ratio.as_str()));
            assert_eq!(serde_json::from_value::<AspectRatio>(value)?, ratio);
        }
        assert!(serde_json::from_value::<CameraMode>(serde_json::json!("studio_medium_format")).is_err());
        Ok(())
    }
}
