//! Content filtering for inbound chat.
//!
//! Matching is deliberately plain substring, not word-boundary-aware:
//! "classic" contains "ass". Operators who want boundaries can encode
//! them in the word list.

/// Returns true when `text` carries none of the banned words.
///
/// Comparison is case-insensitive. Empty banned entries are skipped, so
/// a stray `""` in the word list does not reject every message.
pub fn passes_filter(banned_words: &[String], text: &str) -> bool {
    let lowered = text.to_lowercase();
    !banned_words.iter().any(|word| {
        let word = word.to_lowercase();
        !word.is_empty() && lowered.contains(&word)
    })
}
