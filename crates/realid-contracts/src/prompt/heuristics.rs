use std::sync::OnceLock;

use regex::Regex;

use crate::request::{AspectRatio, CameraMode};

/// Fixed literal keyword list matched case-insensitively on word boundaries.
///
/// The lists mix English and Indonesian terms and are kept verbatim; changing
/// them changes which prompts get which framing or edit mode.
pub struct KeywordSet {
    words: &'static [&'static str],
    pattern: OnceLock<Option<Regex>>,
}

impl KeywordSet {
    pub const fn new(words: &'static [&'static str]) -> Self {
        Self {
            words,
            pattern: OnceLock::new(),
        }
    }

    pub fn words(&self) -> &'static [&'static str] {
        self.words
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex()
            .map(|pattern| pattern.is_match(text))
            .unwrap_or(false)
    }

    fn regex(&self) -> Option<&Regex> {
        self.pattern
            .get_or_init(|| {
                let escaped = self
                    .words
                    .iter()
                    .map(|word| regex::escape(word))
                    .collect::<Vec<String>>();
                Regex::new(&format!(r"(?i)\b({})\b", escaped.join("|"))).ok()
            })
            .as_ref()
    }
}

pub static CLOSE_UP_KEYWORDS: KeywordSet = KeywordSet::new(&[
    "selfie", "selpi", "close-up", "closeup", "face", "wajah", "muka", "kepala", "portrait",
    "headshot", "dekat",
]);

pub static STRUCTURAL_EDIT_KEYWORDS: KeywordSet = KeywordSet::new(&[
    "sudut",
    "angle",
    "pose",
    "gaya",
    "latar",
    "background",
    "view",
    "pandangan",
    "lokasi",
    "pindah",
]);

pub static PLURAL_EDIT_KEYWORDS: KeywordSet = KeywordSet::new(&[
    "2", "two", "dua", "couple", "pair", "double", "sepasang", "banyak",
]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    VerticalSelfie,
    ExtremeCloseUp,
    VerticalMidShot,
    CinematicMidShot,
}

impl Framing {
    pub fn classify(text: &str, aspect_ratio: AspectRatio) -> Self {
        let close_up = CLOSE_UP_KEYWORDS.matches(text);
        match (close_up, aspect_ratio.is_vertical_phone()) {
            (true, true) => Self::VerticalSelfie,
            (true, false) => Self::ExtremeCloseUp,
            (false, true) => Self::VerticalMidShot,
            (false, false) => Self::CinematicMidShot,
        }
    }

    pub fn instruction(self) -> &'static str {
        match self {
            Self::VerticalSelfie => {
                "Framing: Vertical Selfie (9:16). Camera arm's length. Face fills 40-60% of width."
            }
            Self::ExtremeCloseUp => {
                "Framing: Extreme Close-up (Macro). Focus intensely on skin texture."
            }
            Self::VerticalMidShot => {
                "Framing: Vertical Full/Mid Shot (9:16). Show outfit from knees/waist up."
            }
            Self::CinematicMidShot => "Framing: Cinematic Mid-shot (Waist up).",
        }
    }
}

pub fn camera_spec(mode: CameraMode) -> &'static str {
    match mode {
        CameraMode::StudioMediumFormat => {
            "Phase One XF IQ4 150MP (Medium Format). Lens: Rodenstock HR Digaron-W 32mm f/4. Settings: f/8 for maximum texture detail. Look: Hyper-detailed, optical perfection, RAW render."
        }
        CameraMode::PhoneAmateur => {
            "iPhone 15 Pro Max (Main Sensor). Settings: RAW mode, NO computational smoothing. Artifacts: Visible sensor noise/grain. Look: \"Phone Photo\", amateur composition."
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditMode {
    /// Scene and pose are regenerated to match the source aesthetic.
    Reimagine,
    /// Only the stated change is applied.
    Retouch,
}

impl EditMode {
    pub fn classify(instruction: &str) -> Self {
        if STRUCTURAL_EDIT_KEYWORDS.matches(instruction) {
            Self::Reimagine
        } else {
            Self::Retouch
        }
    }
}

/// Number of edited variants an instruction asks for.
pub fn edit_variant_count(instruction: &str) -> usize {
    if PLURAL_EDIT_KEYWORDS.matches(instruction) {
        2
    } else {
        1
    }
}
