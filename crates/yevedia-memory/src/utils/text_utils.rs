//! Text processing shared by the relational cache and the knowledge store

use std::borrow::Cow;
use anyhow::Context;
use base64::Engine;
use regex::Regex;
use lazy_static::lazy_static;

lazy_static! {
    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
    static ref NON_WORD_REGEX: Regex = Regex::new(r"[^\w\s]").unwrap();
}

/// Longest query prefix kept in a knowledge filename, in characters
pub const FILENAME_PREFIX_CHARS: usize = 50;

pub struct TextUtils;

impl TextUtils {
    /// Canonical cache key for a search query.
    ///
    /// Lower-cases, drops every character that is neither a word character nor
    /// whitespace, collapses whitespace runs and trims. Punctuation is removed
    /// before collapsing so the result is a fixed point: normalizing twice is
    /// the same as normalizing once.
    pub fn normalize_query(query: &str) -> String {
        let lowered = query.to_lowercase();
        let stripped = NON_WORD_REGEX.replace_all(&lowered, "");
        Self::normalize_whitespace(&stripped).trim().to_string()
    }

    /// Normalize whitespace efficiently
    pub fn normalize_whitespace(text: &str) -> Cow<'_, str> {
        if WHITESPACE_REGEX.is_match(text) {
            Cow::Owned(WHITESPACE_REGEX.replace_all(text, " ").trim().to_string())
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Filesystem-safe slice of a query: alphanumerics, spaces, `-` and `_`,
    /// capped at [`FILENAME_PREFIX_CHARS`], spaces turned into underscores.
    pub fn sanitize_for_filename(text: &str) -> String {
        let kept: String = text
            .chars()
            .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
            .take(FILENAME_PREFIX_CHARS)
            .collect();
        kept.trim().replace(' ', "_")
    }

    /// Decode standard base64 into UTF-8 text
    pub fn decode_base64_utf8(encoded: &str) -> anyhow::Result<String> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("Invalid base64 payload")?;
        String::from_utf8(bytes).context("Base64 payload is not valid UTF-8")
    }

    /// LIKE pattern matching `text` anywhere, for use with `ESCAPE '\\'`
    pub fn like_contains_pattern(text: &str) -> String {
        let escaped = text
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        format!("%{}%", escaped)
    }

    /// First `len` hex characters of the blake3 digest of `text`
    pub fn short_digest(text: &str, len: usize) -> String {
        let hex = blake3::hash(text.as_bytes()).to_hex();
        hex.as_str()[..len.min(hex.len())].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_lowercases_and_strips_punctuation() {
        assert_eq!(TextUtils::normalize_query("Cats!"), "cats");
        assert_eq!(TextUtils::normalize_query("  What IS   Rust?? "), "what is rust");
    }

    #[test]
    fn test_normalize_collapses_space_left_by_removed_punctuation() {
        assert_eq!(TextUtils::normalize_query("rust - async"), "rust async");
        assert_eq!(TextUtils::normalize_query("cats !"), "cats");
    }

    #[test]
    fn test_normalize_keeps_unicode_word_characters() {
        assert_eq!(TextUtils::normalize_query("Café  Crème"), "café crème");
        assert_eq!(TextUtils::normalize_query("snake_case"), "snake_case");
    }

    #[test]
    fn test_normalize_empty_and_punctuation_only() {
        assert_eq!(TextUtils::normalize_query(""), "");
        assert_eq!(TextUtils::normalize_query("?!..."), "");
    }

    #[test]
    fn test_sanitize_for_filename() {
        assert_eq!(TextUtils::sanitize_for_filename("what is rust?"), "what_is_rust");
        assert_eq!(TextUtils::sanitize_for_filename("a/b\\c"), "abc");
        let long = "x".repeat(80);
        assert_eq!(TextUtils::sanitize_for_filename(&long).len(), FILENAME_PREFIX_CHARS);
    }

    #[test]
    fn test_short_digest_is_deterministic() {
        let a = TextUtils::short_digest("cats", 8);
        assert_eq!(a.len(), 8);
        assert_eq!(a, TextUtils::short_digest("cats", 8));
        assert_ne!(a, TextUtils::short_digest("dogs", 8));
    }

    #[test]
    fn test_decode_base64_utf8() {
        assert_eq!(TextUtils::decode_base64_utf8("aMOpbGxv").unwrap(), "héllo");
        assert!(TextUtils::decode_base64_utf8("not base64!").is_err());
        assert!(TextUtils::decode_base64_utf8("/w==").is_err());
    }

    #[test]
    fn test_like_contains_pattern_escapes_wildcards() {
        assert_eq!(TextUtils::like_contains_pattern("rust"), "%rust%");
        assert_eq!(TextUtils::like_contains_pattern("50%_off"), "%50\\%\\_off%");
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(q in "[A-Za-z0-9 \t\n!?.,;:'\"()_éÉß-]{0,64}") {
            let once = TextUtils::normalize_query(&q);
            prop_assert_eq!(TextUtils::normalize_query(&once), once);
        }
    }
}
