//! Core domain types for OpenCraft materials and combinations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Glyph used wherever an emoji is unknown or had to be patched.
pub const PLACEHOLDER_EMOJI: &str = "❓";

/// The four seeded base elements: `(name, emoji)`.
pub const BASE_ELEMENTS: [(&str, &str); 4] = [
    ("Fire", "🔥"),
    ("Water", "💧"),
    ("Earth", "🌍"),
    ("Air", "💨"),
];

/// Whether `name` is one of the base elements (case-insensitive).
pub fn is_base_element(name: &str) -> bool {
    base_emoji(name).is_some()
}

/// The emoji of a base element, if `name` is one.
pub fn base_emoji(name: &str) -> Option<&'static str> {
    BASE_ELEMENTS
        .iter()
        .find(|(base, _)| same_name(base, name))
        .map(|(_, emoji)| *emoji)
}

/// Case-insensitive material identity comparison.
pub fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Normalize a material name: trim, collapse whitespace runs, and
/// capitalize each token (first letter upper, remainder lower).
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(|token| {
            let mut chars = token.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Order an unordered pair canonically (case-insensitive lexicographic,
/// raw order as tiebreak) so `(a, b)` and `(b, a)` map to the same tuple.
pub fn canonical_pair<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    let (la, lb) = (a.to_lowercase(), b.to_lowercase());
    if (la.as_str(), a) <= (lb.as_str(), b) {
        (a, b)
    } else {
        (b, a)
    }
}

// ---------------------------------------------------------------------------
// CombinationId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for provenance log rows (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombinationId(pub Uuid);

impl CombinationId {
    /// Generate a new time-sortable identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CombinationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CombinationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CombinationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Material
// ---------------------------------------------------------------------------

/// A registered material. Identity is the case-insensitive `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub emoji: String,
    pub first_discovered_at: DateTime<Utc>,
    /// `None` for seeded base elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoverer: Option<String>,
    /// `None` until computed by enrichment or backfill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl PartialEq for Material {
    fn eq(&self, other: &Self) -> bool {
        same_name(&self.name, &other.name)
    }
}

impl Eq for Material {}

/// The `{name, emoji}` projection exposed by list views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialSummary {
    pub name: String,
    pub emoji: String,
}

impl From<&Material> for MaterialSummary {
    fn from(m: &Material) -> Self {
        Self {
            name: m.name.clone(),
            emoji: m.emoji.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Combinations
// ---------------------------------------------------------------------------

/// A memoized `pair -> result` row from the combination cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCombination {
    pub first_word: String,
    pub second_word: String,
    pub result: String,
    pub emoji: String,
}

/// One logged craft event for a specific user (the provenance log).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combination {
    pub id: CombinationId,
    pub first_word: String,
    pub second_word: String,
    pub result_name: String,
    pub result_emoji: String,
    pub username: String,
    pub timestamp: DateTime<Utc>,
    /// Depth in the user's discovery tree, always >= 1.
    pub per_user_rank: u32,
    pub is_discovery: bool,
}

// ---------------------------------------------------------------------------
// CraftOutcome
// ---------------------------------------------------------------------------

/// Result of a single craft as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftOutcome {
    pub result: String,
    pub emoji: String,
    pub is_discovery: bool,
}

impl CraftOutcome {
    /// The "no result" outcome returned when generation fails.
    pub fn empty() -> Self {
        Self {
            result: String::new(),
            emoji: String::new(),
            is_discovery: false,
        }
    }

    /// Whether this is the "no result" outcome.
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }
}
