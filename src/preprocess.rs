//! Canonical text construction for embedding input.
//!
//! Every entity is reduced to a single deterministic string:
//! 1. Lowercase
//! 2. Strip HTML-like markers and decode common entities
//! 3. Collapse whitespace
//! 4. Join non-empty fields with " | " in a fixed order
//! 5. Truncate to 2,048 characters on a char boundary
//!
//! Event order: title | category | tags | description | location.
//! User order: bio | interests | location.
//! Tags and interests are sorted lexicographically before joining so the
//! output never depends on source ordering. No I/O, no randomness.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{Event, User};

/// Maximum canonical text length in characters.
const MAX_CANONICAL_LENGTH: usize = 2048;

/// Field separator in canonical strings.
const FIELD_SEPARATOR: &str = " | ";

/// Common HTML entities to decode before embedding.
const HTML_ENTITIES: &[(&str, &str)] = &[
    ("&amp;", "&"),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&apos;", "'"),
    ("&#39;", "'"),
    ("&nbsp;", " "),
    ("&#160;", " "),
    ("&ndash;", "-"),
    ("&mdash;", "-"),
    ("&hellip;", "..."),
];

/// Compile the markup-stripping regex once
static TAG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>").expect("Failed to compile tag regex"));

/// Canonical text for an event.
pub fn canonical_event_text(event: &Event) -> String {
    let mut tags = event.tags.clone();
    tags.sort();
    let fields = [
        sanitize(&event.title),
        sanitize(&event.category),
        sanitize(&tags.join(" ")),
        sanitize(&event.description),
        sanitize(&event.location),
    ];
    join_fields(&fields)
}

/// Canonical text for a user profile.
pub fn canonical_user_text(user: &User) -> String {
    let mut interests = user.interests.clone();
    interests.sort();
    let fields = [
        sanitize(&user.bio),
        sanitize(&interests.join(" ")),
        sanitize(&user.location),
    ];
    join_fields(&fields)
}

/// Lowercase, decode entities, strip markup, collapse whitespace.
/// Entities first, so encoded markup is stripped like raw markup.
fn sanitize(text: &str) -> String {
    let mut text = text.to_lowercase();
    for (entity, replacement) in HTML_ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, replacement);
        }
    }
    text = TAG_REGEX.replace_all(&text, " ").into_owned();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join non-empty fields and truncate. Empty fields are skipped, never
/// rendered as a placeholder.
fn join_fields(fields: &[String]) -> String {
    let joined = fields
        .iter()
        .filter(|f| !f.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(FIELD_SEPARATOR);
    truncate_chars(&joined, MAX_CANONICAL_LENGTH)
}

/// Truncate to `max_chars` characters without splitting a code point.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}
