//! Text tokenization shared by the write path and the query path.

/// Splits `text` into lowercase ASCII alphanumeric tokens.
///
/// The whole string is lowercased with Unicode rules first, so characters
/// whose lowercase form is ASCII (the Kelvin sign becomes `k`) join tokens.
/// Every other non-alphanumeric character acts as a delimiter. No step
/// depends on the process locale.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|ch: char| !ch.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}
