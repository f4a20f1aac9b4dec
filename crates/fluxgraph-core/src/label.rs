//! Lexical validation for labels and token names.
//!
//! Labels double as variable names inside user expressions, so they
//! must be valid identifiers: `[A-Za-z_$][A-Za-z0-9_$]*`.

/// Whether `s` is a lexically valid label or token name.
pub fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
