use serde::{Deserialize, Serialize};

use super::RequestKind;
use crate::types::CompletionResult;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruncationThresholds {
    /// Below this many completion tokens (and `min_content_chars`) the
    /// answer is considered implausibly short.
    #[serde(default = "default_min_completion_tokens")]
    pub min_completion_tokens: u64,
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,
    /// A trailing `##` section with less body than this is cut off.
    #[serde(default = "default_min_section_body_chars")]
    pub min_section_body_chars: usize,
    /// `(first, second)` headers expected together.
    #[serde(default = "default_section_pairs")]
    pub section_pairs: Vec<(String, String)>,
}

fn default_min_completion_tokens() -> u64 {
    300
}

fn default_min_content_chars() -> usize {
    1_000
}

fn default_min_section_body_chars() -> usize {
    40
}

fn default_section_pairs() -> Vec<(String, String)> {
    vec![("Key Strengths".to_string(), "Potential Challenges".to_string())]
}

impl Default for TruncationThresholds {
    fn default() -> Self {
        Self {
            min_completion_tokens: default_min_completion_tokens(),
            min_content_chars: default_min_content_chars(),
            min_section_body_chars: default_min_section_body_chars(),
            section_pairs: default_section_pairs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationSignal {
    TokenLimit,
    TooShort { completion_tokens: u64, chars: usize },
    MidSection { header: String },
    MissingSection { present: String, missing: String },
}

impl TruncationSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenLimit => "token_limit",
            Self::TooShort { .. } => "too_short",
            Self::MidSection { .. } => "mid_section",
            Self::MissingSection { .. } => "missing_section",
        }
    }

    /// Length and section heuristics only make sense for long-form readings;
    /// a short general answer is usually just short.
    pub fn applies_to(&self, kind: RequestKind) -> bool {
        match self {
            Self::TokenLimit | Self::MidSection { .. } => true,
            Self::TooShort { .. } | Self::MissingSection { .. } => kind != RequestKind::General,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TruncationDetector {
    thresholds: TruncationThresholds,
}

impl TruncationDetector {
    pub fn new(thresholds: TruncationThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &TruncationThresholds {
        &self.thresholds
    }

    /// Every heuristic applied, as for a long-form reading.
    pub fn is_truncated(&self, result: &CompletionResult) -> bool {
        self.assess(result, None, RequestKind::Reading).is_some()
    }

    /// First heuristic that fires and applies to `kind`, if any. Heuristics
    /// that do not apply are skipped so later ones still get a say. With a
    /// prompt, section pairs are only checked when it asked for both headers.
    pub fn assess(
        &self,
        result: &CompletionResult,
        prompt: Option<&str>,
        kind: RequestKind,
    ) -> Option<TruncationSignal> {
        let content = result.content.trim();
        let applies = |signal: TruncationSignal| signal.applies_to(kind).then_some(signal);
        result
            .hit_token_limit()
            .then_some(TruncationSignal::TokenLimit)
            .and_then(&applies)
            .or_else(|| self.too_short(result, content).and_then(&applies))
            .or_else(|| {
                self.trailing_empty_section(content)
                    .map(|header| TruncationSignal::MidSection { header })
                    .and_then(&applies)
            })
            .or_else(|| self.missing_section(content, prompt).and_then(&applies))
    }

    fn too_short(&self, result: &CompletionResult, content: &str) -> Option<TruncationSignal> {
        let chars = content.chars().count();
        (result.usage.completion_tokens < self.thresholds.min_completion_tokens
            && chars < self.thresholds.min_content_chars)
            .then(|| TruncationSignal::TooShort {
                completion_tokens: result.usage.completion_tokens,
                chars,
            })
    }

    fn missing_section(&self, content: &str, prompt: Option<&str>) -> Option<TruncationSignal> {
        let content_lower = content.to_lowercase();
        let prompt_lower = prompt.map(str::to_lowercase);
        for (first, second) in &self.thresholds.section_pairs {
            let (first_lower, second_lower) = (first.to_lowercase(), second.to_lowercase());
            if let Some(prompt) = prompt_lower.as_deref() {
                if !(prompt.contains(&first_lower) && prompt.contains(&second_lower)) {
                    continue;
                }
            }
            if content_lower.contains(&first_lower) && !content_lower.contains(&second_lower) {
                return Some(TruncationSignal::MissingSection {
                    present: first.clone(),
                    missing: second.clone(),
                });
            }
        }
        None
    }

    fn trailing_empty_section(&self, content: &str) -> Option<String> {
        let start = content
            .match_indices("##")
            .map(|(idx, _)| idx)
            .filter(|&idx| idx == 0 || content[..idx].ends_with('\n'))
            .last()?;
        let section = &content[start..];
        let (header_line, body) = section.split_once('\n').unwrap_or((section, ""));
        let body_chars = body.trim().chars().count();
        (body_chars < self.thresholds.min_section_body_chars)
            .then(|| header_line.trim_start_matches('#').trim().to_string())
    }
}
