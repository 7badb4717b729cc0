//! Prompt heuristics: request classification, position-text normalization,
//! birth-detail extraction, truncation detection and reprompt strategies.

pub mod birth_details;
pub mod normalize;
pub mod reprompt;
pub mod truncation;

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};

pub use birth_details::{BirthDetailExtractor, BirthDetails, ExtractionStrategy};
pub use normalize::PromptNormalizer;
pub use reprompt::{REPROMPT_SYSTEM_INSTRUCTION, reprompt};
pub use truncation::{TruncationDetector, TruncationSignal, TruncationThresholds};

const READING_MARKERS: &[&str] = &[
    "astrological reading",
    "astrology reading",
    "birth chart",
    "natal chart",
    "planet positions:",
];

const CAREER_PHRASES: &[&str] = &[
    "career reading",
    "career analysis",
    "career guidance",
    "career astrology",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Reading,
    Career,
    General,
}

impl RequestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Career => "career",
            Self::General => "general",
        }
    }

    /// Whether position text in the prompt is normalized before sending.
    pub fn normalizes_prompt(self) -> bool {
        matches!(self, Self::Reading | Self::Career)
    }
}

/// Classifies a conversation by the markers in its system and user text.
pub fn classify(messages: &[Message]) -> RequestKind {
    let text = messages
        .iter()
        .filter(|message| message.role != Role::Assistant)
        .map(|message| message.content.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("\n");

    if CAREER_PHRASES.iter().any(|phrase| text.contains(phrase)) {
        return RequestKind::Career;
    }
    let reading = READING_MARKERS.iter().any(|marker| text.contains(marker));
    if !reading {
        return RequestKind::General;
    }
    if text.contains("career") {
        RequestKind::Career
    } else {
        RequestKind::Reading
    }
}
