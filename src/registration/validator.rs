//! Username rules and abort detection.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ValidationFailure;

/// Longest username accepted, in characters.
pub const USERNAME_MAX_LEN: usize = 15;

/// Letters, digits, spaces and the punctuation the game client allows in names.
static USERNAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9 _\-\[\]]+$").expect("username pattern is valid"));

/// Check a (trimmed) username against the syntax rule.
pub fn validate_username(username: &str) -> Result<(), ValidationFailure> {
    let len = username.chars().count();
    if len == 0 || len > USERNAME_MAX_LEN || !USERNAME_PATTERN.is_match(username) {
        return Err(ValidationFailure::InvalidUsername);
    }
    Ok(())
}

/// Derive the unique lookup key for a username.
///
/// Lowercases, then replaces spaces with underscores. Idempotent.
pub fn normalize(username: &str) -> String {
    username.to_lowercase().replace(' ', "_")
}

/// Whether a reply is the abort keyword (exact, case-insensitive).
pub fn is_abort(reply: &str, keyword: &str) -> bool {
    reply.to_lowercase() == keyword.to_lowercase()
}
