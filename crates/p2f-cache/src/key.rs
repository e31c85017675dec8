//! Cache key derivation.

use sha2::{Digest, Sha256};

/// Variant tag used when a caller does not distinguish variants.
pub const DEFAULT_VARIANT: &str = "m";

/// Length of a cache key in hex characters.
const KEY_LEN: usize = 16;

/// Normalize a prompt: lowercase, trimmed, internal whitespace collapsed.
pub fn normalize_prompt(prompt: &str) -> String {
    prompt
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derive a fixed-length key from a prompt and a variant tag.
pub fn cache_key(prompt: &str, variant: &str) -> String {
    let material = format!("{}:{}", normalize_prompt(prompt), variant);
    let digest = Sha256::digest(material.as_bytes());
    let mut hex = format!("{:x}", digest);
    hex.truncate(KEY_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prompt() {
        assert_eq!(normalize_prompt("  A   Circle\tMoving\n"), "a circle moving");
        assert_eq!(normalize_prompt(""), "");
    }

    #[test]
    fn test_key_is_case_and_whitespace_insensitive() {
        assert_eq!(cache_key("A Circle", "m"), cache_key("a   circle", "m"));
        assert_eq!(cache_key(" a circle ", "m"), cache_key("A CIRCLE", "m"));
    }

    #[test]
    fn test_key_depends_on_variant_and_text() {
        assert_ne!(cache_key("a circle", "m"), cache_key("a circle", "h"));
        assert_ne!(cache_key("a circle", "m"), cache_key("a square", "m"));
    }

    #[test]
    fn test_key_shape() {
        let key = cache_key("a circle", DEFAULT_VARIANT);
        assert_eq!(key.len(), 16);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
