//! Candidate parsing and validation.
//!
//! Every reply from the generator is parsed into a [`Candidate`] and run
//! through [`validate_candidate`]. Rejections are a structured enum so the
//! retry loop can tell name-level violations (fatal on the last attempt)
//! from emoji-level ones (patched on the last attempt).

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use opencraft_shared::normalize_name;

/// Names longer than this many words are rejected.
pub const MAX_NAME_WORDS: usize = 3;

const ZWJ: char = '\u{200D}';

/// Raw `{name, emoji}` pair as proposed by the model.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Candidate {
    #[serde(alias = "answer", alias = "result")]
    pub name: String,
    #[serde(default)]
    pub emoji: String,
}

/// A validated material: normalized name plus a single-glyph emoji.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedMaterial {
    pub name: String,
    pub emoji: String,
}

/// Why a candidate was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("reply was not a JSON object with a name and an emoji ({detail})")]
    Malformed { detail: String },

    #[error("the name is empty")]
    EmptyName,

    #[error("the name contains non-ASCII characters")]
    NonAsciiName,

    #[error("the name contains the forbidden character {0:?}")]
    ForbiddenCharacter(char),

    #[error("the name has {count} words; at most {max} are allowed", max = MAX_NAME_WORDS)]
    TooManyWords { count: usize },

    #[error("the name repeats both input words")]
    EchoesOperands,

    #[error("the emoji is empty")]
    EmptyEmoji,

    #[error("the emoji {0:?} is plain text, not an emoji")]
    TextEmoji(String),
}

impl Rejection {
    /// Emoji-level rejections can be patched with a placeholder; everything
    /// else means the candidate name itself is unusable.
    pub fn is_emoji_level(&self) -> bool {
        matches!(self, Self::EmptyEmoji | Self::TextEmoji(_))
    }
}

/// Extract the first flat JSON object from a model reply. Models like to
/// wrap answers in prose or code fences.
pub fn parse_candidate(reply: &str) -> Result<Candidate, Rejection> {
    static OBJECT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\{[^{}]*\}").expect("valid regex"));

    let object = OBJECT_RE
        .find(reply)
        .ok_or_else(|| Rejection::Malformed {
            detail: "no JSON object found".into(),
        })?;

    serde_json::from_str::<Candidate>(object.as_str()).map_err(|e| Rejection::Malformed {
        detail: e.to_string(),
    })
}

/// Validate a candidate name against the operands it was generated from.
/// Returns the normalized name.
pub fn validate_name(raw: &str, first: &str, second: &str) -> Result<String, Rejection> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(Rejection::EmptyName);
    }
    if !name.is_ascii() {
        return Err(Rejection::NonAsciiName);
    }
    if let Some(bad) = name
        .chars()
        .find(|c| c.is_ascii_punctuation() || c.is_ascii_control())
    {
        return Err(Rejection::ForbiddenCharacter(bad));
    }

    let count = name.split_whitespace().count();
    if count > MAX_NAME_WORDS {
        return Err(Rejection::TooManyWords { count });
    }

    let lower = name.to_lowercase();
    if lower.contains(&first.to_lowercase()) && lower.contains(&second.to_lowercase()) {
        return Err(Rejection::EchoesOperands);
    }

    Ok(normalize_name(name))
}

/// Validate a candidate emoji and truncate it to exactly one glyph.
pub fn validate_emoji(raw: &str) -> Result<String, Rejection> {
    let glyph = first_glyph(raw).ok_or(Rejection::EmptyEmoji)?;
    if glyph.is_ascii() {
        return Err(Rejection::TextEmoji(glyph));
    }
    Ok(glyph)
}

/// Validate a whole candidate. The name is checked first, so an
/// emoji-level rejection implies the name passed.
pub fn validate_candidate(
    candidate: &Candidate,
    first: &str,
    second: &str,
) -> Result<ValidatedMaterial, Rejection> {
    let name = validate_name(&candidate.name, first, second)?;
    let emoji = validate_emoji(&candidate.emoji)?;
    Ok(ValidatedMaterial { name, emoji })
}

/// The first user-perceived glyph of `s`: a base scalar plus any variation
/// selectors, skin-tone modifiers, keycap marks, tag characters, combining
/// marks, ZWJ continuations, or a second regional indicator.
pub fn first_glyph(s: &str) -> Option<String> {
    let mut chars = s.trim().chars().peekable();
    let first = chars.next()?;
    let mut glyph = String::from(first);
    let mut open_flag = is_regional_indicator(first);

    while let Some(&c) = chars.peek() {
        if is_extender(c) {
            glyph.push(c);
            chars.next();
        } else if c == ZWJ {
            glyph.push(c);
            chars.next();
            match chars.next() {
                Some(joined) => glyph.push(joined),
                None => break,
            }
        } else if open_flag && is_regional_indicator(c) {
            glyph.push(c);
            chars.next();
            open_flag = false;
        } else {
            break;
        }
    }
    Some(glyph)
}

fn is_extender(c: char) -> bool {
    matches!(c,
        '\u{FE00}'..='\u{FE0F}'      // variation selectors
        | '\u{1F3FB}'..='\u{1F3FF}'  // skin tones
        | '\u{20E3}'                 // combining keycap
        | '\u{E0020}'..='\u{E007F}'  // tag sequences
        | '\u{0300}'..='\u{036F}'    // combining diacriticals
    )
}

fn is_regional_indicator(c: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_and_wrapped_json() {
        let c = parse_candidate(r#"{"name": "Steam", "emoji": "💨"}"#).unwrap();
        assert_eq!(c.name, "Steam");
        assert_eq!(c.emoji, "💨");

        let fenced = "Sure! Here you go:\n```json\n{\"name\": \"Mud\", \"emoji\": \"🟤\"}\n```";
        assert_eq!(parse_candidate(fenced).unwrap().name, "Mud");

        let legacy = r#"{"answer": "Lava"}"#;
        let c = parse_candidate(legacy).unwrap();
        assert_eq!(c.name, "Lava");
        assert!(c.emoji.is_empty());
    }

    #[test]
    fn unparseable_reply_is_malformed() {
        assert!(matches!(
            parse_candidate("Steam"),
            Err(Rejection::Malformed { .. })
        ));
        assert!(matches!(
            parse_candidate(r#"{"emoji": "💨"}"#),
            Err(Rejection::Malformed { .. })
        ));
    }

    #[test]
    fn name_rules() {
        assert_eq!(validate_name("  hot  spring ", "Fire", "Water").unwrap(), "Hot Spring");
        assert_eq!(validate_name("", "Fire", "Water"), Err(Rejection::EmptyName));
        assert_eq!(validate_name("Café", "Fire", "Water"), Err(Rejection::NonAsciiName));
        assert_eq!(
            validate_name("Steam!", "Fire", "Water"),
            Err(Rejection::ForbiddenCharacter('!'))
        );
        assert_eq!(
            validate_name("Steam-Cloud", "Fire", "Water"),
            Err(Rejection::ForbiddenCharacter('-'))
        );
        assert_eq!(
            validate_name("Steam\tCloud", "Fire", "Water"),
            Err(Rejection::ForbiddenCharacter('\t'))
        );
        assert_eq!(
            validate_name("a very hot cloud", "Fire", "Water"),
            Err(Rejection::TooManyWords { count: 4 })
        );
        assert_eq!(
            validate_name("Firewater", "Fire", "Water"),
            Err(Rejection::EchoesOperands)
        );
        // Mentioning a single operand is fine.
        assert_eq!(validate_name("Wildfire", "Fire", "Water").unwrap(), "Wildfire");
    }

    #[test]
    fn emoji_is_truncated_to_one_glyph() {
        assert_eq!(validate_emoji("💨💧").unwrap(), "💨");
        assert_eq!(validate_emoji(" ❤️ love").unwrap(), "❤️");
        assert_eq!(validate_emoji("👍🏽👍").unwrap(), "👍🏽");
        assert_eq!(validate_emoji("👩‍🔬 scientist").unwrap(), "👩‍🔬");
        assert_eq!(validate_emoji("🇯🇵🇫🇷").unwrap(), "🇯🇵");
        assert_eq!(validate_emoji("1️⃣").unwrap(), "1️⃣");
    }

    #[test]
    fn emoji_rules() {
        assert_eq!(validate_emoji("   "), Err(Rejection::EmptyEmoji));
        assert_eq!(validate_emoji("steam"), Err(Rejection::TextEmoji("s".into())));
        assert!(Rejection::EmptyEmoji.is_emoji_level());
        assert!(Rejection::TextEmoji("x".into()).is_emoji_level());
        assert!(!Rejection::EmptyName.is_emoji_level());
    }

    #[test]
    fn candidate_checks_name_before_emoji() {
        let bad_both = Candidate {
            name: "Steam?".into(),
            emoji: String::new(),
        };
        assert_eq!(
            validate_candidate(&bad_both, "Fire", "Water"),
            Err(Rejection::ForbiddenCharacter('?'))
        );

        let good = Candidate {
            name: "steam".into(),
            emoji: "💨 cloud".into(),
        };
        assert_eq!(
            validate_candidate(&good, "Fire", "Water").unwrap(),
            ValidatedMaterial {
                name: "Steam".into(),
                emoji: "💨".into()
            }
        );
    }
}
