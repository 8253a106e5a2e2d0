//! Text folding for device lookup and trigger-word matching.
//!
//! Chat clients send Vietnamese in both composed and decomposed form, and users
//! type with or without diacritics. Matching therefore happens on a folded form:
//! NFD, combining marks dropped, `đ` mapped to `d`, lower-cased, punctuation
//! replaced by spaces, whitespace collapsed.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical composed form. Applied to every inbound message before
/// classification so regexes only have to handle precomposed letters.
pub fn nfc(input: &str) -> String {
    input.nfc().collect()
}

pub fn fold(input: &str) -> String {
    let stripped: String = input
        .nfd()
        .filter(|ch| !is_combining_mark(*ch))
        .map(|ch| match ch {
            'đ' | 'Đ' => 'd',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .map(|ch| if ch.is_alphanumeric() { ch } else { ' ' })
        .collect();

    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn tokens(input: &str) -> Vec<String> {
    fold(input).split_whitespace().map(str::to_string).collect()
}

/// Whole-word, case- and accent-insensitive containment. Multi-word needles
/// must appear as a contiguous run of tokens.
pub fn contains_word(haystack: &str, needle: &str) -> bool {
    let needle = tokens(needle);
    if needle.is_empty() {
        return false;
    }
    tokens(haystack).windows(needle.len()).any(|window| window == needle.as_slice())
}

/// Share of `query` tokens that also occur in `candidate`, in `0.0..=1.0`.
pub fn token_overlap(query: &str, candidate: &str) -> f32 {
    let query = tokens(query);
    if query.is_empty() {
        return 0.0;
    }
    let candidate = tokens(candidate);
    let hits = query.iter().filter(|token| candidate.contains(token)).count();
    hits as f32 / query.len() as f32
}
