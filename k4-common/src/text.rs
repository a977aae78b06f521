//! Alphabet helpers
//!
//! All analysis runs over the 26-letter uppercase Latin alphabet. Anything
//! else (spaces, punctuation, Kryptos `?` marks) is dropped on normalization.

/// Alphabet size
pub const ALPHABET_LEN: usize = 26;

/// Uppercase and strip everything outside A-Z
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Letter indices (A=0 .. Z=25) of a normalized text; non-letters are skipped
pub fn to_indices(text: &str) -> Vec<u8> {
    text.bytes()
        .filter(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase() - b'A')
        .collect()
}

/// Inverse of [`to_indices`]
pub fn from_indices(indices: &[u8]) -> String {
    indices
        .iter()
        .map(|&i| char::from(b'A' + (i % ALPHABET_LEN as u8)))
        .collect()
}
