use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest value kept for any single field; longer captures are cut.
const MAX_FIELD_CHARS: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthDetails {
    pub name: String,
    pub date: String,
    pub time: String,
    pub place: String,
}

impl BirthDetails {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.date.is_empty() && self.time.is_empty() && self.place.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.date.is_empty() && !self.time.is_empty() && !self.place.is_empty()
    }

    /// Copies fields from `other` into the ones still empty here.
    pub fn fill_missing(&mut self, other: BirthDetails) {
        fill(&mut self.name, other.name);
        fill(&mut self.date, other.date);
        fill(&mut self.time, other.time);
        fill(&mut self.place, other.place);
    }
}

fn fill(slot: &mut String, value: String) {
    if slot.is_empty() {
        *slot = value;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    /// Labeled lines inside a "Birth Details" section.
    StructuredSection,
    /// `Name:`/`Date:`/`Time:`/`Place:` lines anywhere in the text.
    LabeledLines,
    /// "for NAME born on DATE at TIME in PLACE".
    Narrative,
}

impl ExtractionStrategy {
    pub const ALL: [ExtractionStrategy; 3] = [
        ExtractionStrategy::StructuredSection,
        ExtractionStrategy::LabeledLines,
        ExtractionStrategy::Narrative,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::StructuredSection => "structured_section",
            Self::LabeledLines => "labeled_lines",
            Self::Narrative => "narrative",
        }
    }

    pub fn extract(self, text: &str) -> Option<BirthDetails> {
        let details = match self {
            Self::StructuredSection => birth_details_section(text).map(labeled_fields)?,
            Self::LabeledLines => labeled_fields(text),
            Self::Narrative => narrative_fields(text),
        };
        (!details.is_empty()).then_some(details)
    }
}

/// Best-effort recovery of birth details from free-form prompt text.
///
/// Strategies run in order; the first one that yields anything seeds the
/// result and later strategies only fill fields that are still empty.
#[derive(Debug, Clone)]
pub struct BirthDetailExtractor {
    strategies: Vec<ExtractionStrategy>,
}

impl Default for BirthDetailExtractor {
    fn default() -> Self {
        Self {
            strategies: ExtractionStrategy::ALL.to_vec(),
        }
    }
}

impl BirthDetailExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategies(strategies: Vec<ExtractionStrategy>) -> Self {
        Self { strategies }
    }

    pub fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }

    pub fn extract(&self, text: &str) -> BirthDetails {
        let mut details = BirthDetails::default();
        for strategy in &self.strategies {
            if details.is_complete() {
                break;
            }
            if let Some(found) = strategy.extract(text) {
                tracing::debug!(strategy = strategy.name(), "birth details matched");
                details.fill_missing(found);
            }
        }
        details
    }
}

fn birth_details_section(text: &str) -> Option<&str> {
    let header = section_header_regex().find(text)?;
    let body = &text[header.end()..];
    let end = section_end_regex()
        .find(body)
        .map(|found| found.start())
        .unwrap_or(body.len());
    Some(&body[..end])
}

fn labeled_fields(text: &str) -> BirthDetails {
    BirthDetails {
        name: first_capture(label_regex(Field::Name), text),
        date: first_capture(label_regex(Field::Date), text),
        time: first_capture(label_regex(Field::Time), text),
        place: first_capture(label_regex(Field::Place), text),
    }
}

fn narrative_fields(text: &str) -> BirthDetails {
    static NAME: OnceLock<Regex> = OnceLock::new();
    static DATE: OnceLock<Regex> = OnceLock::new();
    static TIME: OnceLock<Regex> = OnceLock::new();
    static PLACE: OnceLock<Regex> = OnceLock::new();

    let name = NAME.get_or_init(|| {
        Regex::new(r"\b(?i:for)\s+(?P<v>\p{Lu}[\p{L}'.-]*(?:\s+\p{Lu}[\p{L}'.-]*){0,3})\s*,?\s+(?i:born)\b")
            .expect("narrative name regex is valid")
    });
    let date = DATE.get_or_init(|| {
        Regex::new(r"(?im)\bborn\s+on\s+(?P<v>[^\n]+?)(?:\s+at\s+|\s+in\s+|[;\n]|\.(?:\s|$)|$)")
            .expect("narrative date regex is valid")
    });
    let time = TIME.get_or_init(|| {
        Regex::new(r"(?im)\bborn\s+on\s+[^\n]+?\s+at\s+(?P<v>[^\n]+?)(?:\s+in\s+|[,;\n]|\.(?:\s|$)|$)")
            .expect("narrative time regex is valid")
    });
    let place = PLACE.get_or_init(|| {
        Regex::new(r"(?im)\bborn\s+[^\n]*?\s+in\s+(?P<v>[^;\n]+?)(?:[;\n]|\.(?:\s|$)|$)")
            .expect("narrative place regex is valid")
    });

    BirthDetails {
        name: first_capture(name, text),
        date: first_capture(date, text),
        time: first_capture(time, text),
        place: first_capture(place, text),
    }
}

fn first_capture(regex: &Regex, text: &str) -> String {
    regex
        .captures_iter(text)
        .filter_map(|caps| caps.name("v").map(|value| clean_value(value.as_str())))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn clean_value(raw: &str) -> String {
    let value = raw
        .trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches([',', ';', '.'])
        .trim();
    value.chars().take(MAX_FIELD_CHARS).collect()
}

#[derive(Clone, Copy)]
enum Field {
    Name,
    Date,
    Time,
    Place,
}

fn label_regex(field: Field) -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    static DATE: OnceLock<Regex> = OnceLock::new();
    static TIME: OnceLock<Regex> = OnceLock::new();
    static PLACE: OnceLock<Regex> = OnceLock::new();

    let (slot, labels) = match field {
        Field::Name => (&NAME, r"(?:full\s+)?name"),
        Field::Date => (&DATE, r"date\s+of\s+birth|birth\s*date|dob|date"),
        Field::Time => (&TIME, r"time\s+of\s+birth|birth\s*time|tob|time"),
        Field::Place => (
            &PLACE,
            r"place\s+of\s+birth|birth\s*place|pob|place|location|city",
        ),
    };
    slot.get_or_init(|| {
        let pattern = format!(
            r"(?im)^[^\S\n]*(?:[-*•][^\S\n]+)?(?:\*\*)?(?:{labels})(?:\*\*)?[^\S\n]*:[^\S\n]*(?P<v>[^\n]*)$"
        );
        Regex::new(&pattern).expect("label regex is valid")
    })
}

fn section_header_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?im)^[^\S\n]*(?:#{1,6}[^\S\n]*)?(?:\*\*)?birth\s+details(?:\*\*)?[^\S\n]*:?(?:\*\*)?[^\S\n]*$")
            .expect("section header regex is valid")
    })
}

/// Next heading: a markdown header or a bare `Title:` line.
fn section_end_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?m)^[^\S\n]*(?:#|[A-Za-z][A-Za-z ]*:[^\S\n]*$)")
            .expect("section end regex is valid")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_structured_birth_details_section() {
        let text = "Please give an astrological reading.\n\n## Birth Details\n- **Name:** Ada Lovelace\n- **Date:** 10 December 1815\n- **Time:** 13:00\n- **Place:** London, UK\n\n## Planet Positions\nName: Not This One";
        let details = ExtractionStrategy::StructuredSection
            .extract(text)
            .expect("section");
        assert_eq!(details.name, "Ada Lovelace");
        assert_eq!(details.date, "10 December 1815");
        assert_eq!(details.time, "13:00");
        assert_eq!(details.place, "London, UK");
    }

    #[test]
    fn reads_loosely_labeled_lines() {
        let text = "name: Grace\nDate of Birth: 1906-12-09\nTime of birth: 08:15 am\nPlace of Birth: New York";
        let details = BirthDetailExtractor::new().extract(text);
        assert_eq!(
            details,
            BirthDetails {
                name: "Grace".to_string(),
                date: "1906-12-09".to_string(),
                time: "08:15 am".to_string(),
                place: "New York".to_string(),
            }
        );
    }

    #[test]
    fn reads_narrative_sentence() {
        let text = "Write a birth chart reading for Alan Turing born on June 23, 1912 at 02:15 AM in Maida Vale, London.";
        let details = ExtractionStrategy::Narrative.extract(text).expect("narrative");
        assert_eq!(details.name, "Alan Turing");
        assert_eq!(details.date, "June 23, 1912");
        assert_eq!(details.time, "02:15 AM");
        assert_eq!(details.place, "Maida Vale, London");
    }

    #[test]
    fn later_strategies_only_fill_gaps() {
        let text = "Birth Details:\nName: Ada\n\nShe was born on 1815-12-10 at 13:00 in London.";
        let details = BirthDetailExtractor::new().extract(text);
        assert_eq!(details.name, "Ada");
        assert_eq!(details.date, "1815-12-10");
        assert_eq!(details.time, "13:00");
        assert_eq!(details.place, "London");
    }

    #[test]
    fn unmatched_fields_stay_empty() {
        let details = BirthDetailExtractor::new().extract("Tell me about Aries");
        assert!(details.is_empty());

        let partial = BirthDetailExtractor::new().extract("Place: Lagos");
        assert_eq!(partial.place, "Lagos");
        assert!(partial.name.is_empty() && partial.date.is_empty() && partial.time.is_empty());
    }

    #[test]
    fn odd_input_never_panics() {
        for text in ["", "Name:", "born on", "for X born", "## Birth Details", "\u{1F31E}: ☉"] {
            let _ = BirthDetailExtractor::new().extract(text);
        }
    }
}
