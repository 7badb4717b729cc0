//! Cleans pre-rendered planetary positions out of caller prompts.
//!
//! Stray numeric degree tokens make the upstream model cut readings short,
//! so positions such as `Sun: Gemini at 12.34°` are reduced to
//! `Sun: Gemini`. Sign names, retrograde flags and section layout survive.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

pub(crate) const PLANETS: &str = "Sun|Moon|Mercury|Venus|Mars|Jupiter|Saturn|Uranus|Neptune|Pluto|Rahu|Ketu|Chiron|Lilith|North Node|South Node|True Node|Ascendant|Descendant|Midheaven|Lagna";
pub(crate) const SIGNS: &str =
    "Aries|Taurus|Gemini|Cancer|Leo|Virgo|Libra|Scorpio|Sagittarius|Capricorn|Aquarius|Pisces";

/// A degree value: either a decimal number (unit optional) or an integer
/// with an explicit unit, plus optional arc-minutes/seconds. Anchored on a
/// word boundary and greedy on the integer part, so it never starts inside
/// a longer number.
const DEGREE: &str = r#"\b\d+(?:\.\d+[^\S\n]*(?:°|º|deg(?:rees?)?\b)?|[^\S\n]*(?:°|º|deg(?:rees?)?\b))(?:[^\S\n]*\d{1,2}['′](?:[^\S\n]*\d{1,2}(?:\.\d+)?["″])?)?"#;
const RETRO: &str = r"(?:\bretrograde\b|\bretro\b|\brx\b|℞)";

#[derive(Debug, Default, Clone, Copy)]
pub struct PromptNormalizer;

impl PromptNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// True when the text carries planet/sign position lines, including
    /// prompts whose line breaks arrived as literal `\n` sequences.
    pub fn contains_planet_positions(&self, text: &str) -> bool {
        position_regex().is_match(&unescape_literal_sequences(text))
    }

    /// Returns the prompt with escape artifacts and degree annotations
    /// removed, or the input unchanged when it holds no position text.
    pub fn normalize<'a>(&self, raw: &'a str) -> Cow<'a, str> {
        let unescaped = unescape_literal_sequences(raw);
        if !position_regex().is_match(&unescaped) {
            return Cow::Borrowed(raw);
        }

        let lines: Vec<String> = unescaped.split('\n').map(clean_line).collect();
        let normalized = lines.join("\n");

        if normalized == raw {
            Cow::Borrowed(raw)
        } else {
            Cow::Owned(normalized)
        }
    }
}

/// Turns literal `\n`, `\r\n` and `\t` sequences into real whitespace.
/// Real line breaks already present are left alone.
fn unescape_literal_sequences(text: &str) -> String {
    if !text.contains('\\') {
        return text.to_string();
    }
    text.replace("\\r\\n", "\n")
        .replace("\\n", "\n")
        .replace("\\t", "\t")
}

fn clean_line(line: &str) -> String {
    let had_trailing_cr = line.ends_with('\r');
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut out: String = if mentions_position(line) {
        // Parentheticals go first so the retrograde rewrites below never
        // reach inside one.
        let step = parenthetical_regex().replace_all(line, |caps: &Captures<'_>| {
            let inner = &caps[1];
            if !degree_regex().is_match(inner) && !stray_degree_regex().is_match(inner) {
                return caps[0].to_string();
            }
            if retro_regex().is_match(inner) {
                " (Retrograde)".to_string()
            } else {
                String::new()
            }
        });
        let step = degree_then_retro_regex().replace_all(&step, " (Retrograde)");
        let step = retro_then_degree_regex().replace_all(&step, " (Retrograde)");
        let step = at_degree_regex().replace_all(&step, "");
        let step = sign_degree_regex().replace_all(&step, "$sign");
        let step = degree_sign_regex().replace_all(&step, "$sign");
        let step = stray_degree_regex().replace_all(&step, "");
        let step = bare_degree_regex().replace_all(&step, "");
        step.into_owned()
    } else {
        stray_degree_regex().replace_all(line, "").into_owned()
    };

    if out != line {
        out = squeeze_spaces_regex().replace_all(&out, "$keep ").into_owned();
        out = space_before_punct_regex()
            .replace_all(&out, "$punct")
            .into_owned();
        out.truncate(out.trim_end().len());
    }
    if had_trailing_cr {
        out.push('\r');
    }
    out
}

fn mentions_position(line: &str) -> bool {
    planet_or_sign_regex().is_match(line)
}

fn compile(pattern: &str) -> Regex {
    let pattern = pattern
        .replace("@PLANETS@", PLANETS)
        .replace("@SIGNS@", SIGNS)
        .replace("@DEGREE@", DEGREE)
        .replace("@RETRO@", RETRO);
    Regex::new(&pattern).expect("normalizer regex is valid")
}

/// `Sun: Gemini`, `Moon in Cancer`, `Ascendant: 14.2° Scorpio`
fn position_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        compile(
            r"(?i)\b(?:@PLANETS@)\b[^\S\n]*(?:[:\-–]|\bis in\b|\bin\b)?[^\S\n]*(?:@DEGREE@[^\S\n]*)?\b(?:@SIGNS@)\b",
        )
    })
}

fn degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)@DEGREE@"))
}

fn planet_or_sign_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)\b(?:@PLANETS@|@SIGNS@)\b"))
}

fn retro_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)@RETRO@|\bR\b"))
}

/// `at 12.3° Rx`, `12.3° R`
fn degree_then_retro_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        compile(r"(?i)(?:[^\S\n]*\bat\b)?[^\S\n]*@DEGREE@[^\S\n]*,?[^\S\n]*(?:@RETRO@|\bR\b)")
    })
}

/// `, Retrograde at 12.3°`, `Rx 12.3°`
fn retro_then_degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)[^\S\n]*,?[^\S\n]*@RETRO@[^\S\n]*(?:\bat\b[^\S\n]*)?@DEGREE@"))
}

fn parenthetical_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"[^\S\n]*\(([^()\n]*)\)"))
}

/// `at 23.45°`, `at 5 degrees`
fn at_degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)[^\S\n]*\bat[^\S\n]+@DEGREE@"))
}

/// `Gemini 12.34°`
fn sign_degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)\b(?P<sign>@SIGNS@)\b[^\S\n]*,?[^\S\n]+@DEGREE@"))
}

/// `12.34° Gemini`
fn degree_sign_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?i)@DEGREE@[^\S\n]+(?P<sign>@SIGNS@)\b"))
}

/// Any number carrying a degree symbol.
fn stray_degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        compile(
            r#"[^\S\n]*\b\d+(?:\.\d+)?[^\S\n]*[°º](?:[^\S\n]*\d{1,2}['′](?:[^\S\n]*\d{1,2}(?:\.\d+)?["″])?)?"#,
        )
    })
}

/// Bare decimal numbers on a position line, `, 12.34`.
fn bare_degree_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"[^\S\n]*,?[^\S\n]*\b\d+\.\d+\b"))
}

fn squeeze_spaces_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"(?P<keep>\S)[^\S\n]{2,}"))
}

fn space_before_punct_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| compile(r"[^\S\n]+(?P<punct>[,;.])"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(text: &str) -> String {
        PromptNormalizer::new().normalize(text).into_owned()
    }

    #[test]
    fn strips_at_degree_annotations() {
        let out = normalize("Sun: Gemini at 12.34°\nMoon: Cancer at 5.2°");
        assert_eq!(out, "Sun: Gemini\nMoon: Cancer");
    }

    #[test]
    fn keeps_retrograde_as_standalone_parenthetical() {
        assert_eq!(
            normalize("Saturn: Aquarius at 12.3° (Retrograde)"),
            "Saturn: Aquarius (Retrograde)"
        );
        assert_eq!(
            normalize("Mercury: Virgo (R, 3.14°)"),
            "Mercury: Virgo (Retrograde)"
        );
        assert_eq!(normalize("Jupiter: Pisces 7.5° Rx"), "Jupiter: Pisces (Retrograde)");
        assert_eq!(
            normalize("Mars: Leo, Retrograde at 21.07°"),
            "Mars: Leo (Retrograde)"
        );
    }

    #[test]
    fn strips_parenthetical_and_prefixed_degrees() {
        assert_eq!(
            normalize("Venus: Libra (23.45°), 7th house"),
            "Venus: Libra, 7th house"
        );
        assert_eq!(normalize("Ascendant: 14.2° Scorpio"), "Ascendant: Scorpio");
        assert_eq!(normalize("Pluto in Capricorn 27°12'"), "Pluto in Capricorn");
    }

    #[test]
    fn unescapes_literal_newlines() {
        let out = normalize(r"Planet Positions:\nSun: Aries at 1.5°\nMoon: Taurus at 2.5°");
        assert_eq!(out, "Planet Positions:\nSun: Aries\nMoon: Taurus");
    }

    #[test]
    fn leaves_prompts_without_positions_untouched() {
        let text = "Tell me about Aries\\n and the 3.5 degree rule";
        let out = PromptNormalizer::new().normalize(text);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, text);
    }

    #[test]
    fn leaves_non_position_lines_and_structure_alone() {
        let text = "## Birth Details\nName: Ada\nTime: 10.30 am\n\n## Planet Positions\n  Sun: Gemini at 12.34°";
        assert_eq!(
            normalize(text),
            "## Birth Details\nName: Ada\nTime: 10.30 am\n\n## Planet Positions\n  Sun: Gemini"
        );
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "Sun: Gemini at 12.34°",
            r"Planet Positions:\nSun: Aries at 1.5° (Retrograde)\nMoon: Taurus 2.5° R\n\nGive an astrological reading.",
            "Mercury: Virgo (R, 3.14°)\nVenus: Libra (23.45°), 7th house\nAscendant: 14.2° Scorpio",
            "Mars in Leo\n\n  indented line stays  ",
            "Rahu: Taurus, 12.4\nKetu: Scorpio at 12 degrees",
            "Saturn: Aquarius (Retrograde at 12.3°)",
            "Sun in Gemini at 1234.56°",
            r"Planet Positions:\nSun: Gemini, 12.34°\nMoon: Cancer,5.2",
        ];
        for sample in samples {
            let once = normalize(sample);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn output_has_no_decimal_degree_tokens() {
        let out = normalize("Sun: Gemini at 12.34°\nRahu: Taurus, 12.4\nKetu: Scorpio at 12 degrees");
        assert!(out.contains("Sun: Gemini"));
        assert!(!out.contains('°'));
        assert!(!out.contains("12.34"));
        assert!(!out.contains("12.4"));
        assert!(!out.contains("degrees"));

        let out = normalize("Sun in Gemini at 1234.56°\nMars: Leo (Retrograde at 12 degrees)");
        assert_eq!(out, "Sun in Gemini\nMars: Leo (Retrograde)");
    }

    #[test]
    fn retrograde_inside_parenthetical_stays_a_single_flag() {
        assert_eq!(
            normalize("Saturn: Aquarius (Retrograde at 12.3°)"),
            "Saturn: Aquarius (Retrograde)"
        );
    }

    #[test]
    fn detects_positions_behind_literal_newlines() {
        let normalizer = PromptNormalizer::new();
        let text = r"Planet Positions:\nSun: Gemini, 12.34°\nMoon: Cancer,5.2";
        assert!(normalizer.contains_planet_positions(text));
        assert_eq!(
            normalize(text),
            "Planet Positions:\nSun: Gemini\nMoon: Cancer"
        );
    }
}
