//! Filesystem-safe cache keys

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Longest encoded stem written verbatim; longer keys are hashed instead.
const MAX_ENCODED_LEN: usize = 200;

/// Map a logical key to a file stem.
///
/// Short keys are base64url encoded (reversible, no `/` or `+`). Keys whose
/// encoding would exceed common file name limits become `h-<sha256>`. The two
/// forms cannot collide: a base64 stem starting with `h-` would decode to a
/// UTF-8 continuation byte, which no `&str` can start with.
pub fn encode_key(key: &str) -> String {
    let encoded = URL_SAFE_NO_PAD.encode(key.as_bytes());
    if encoded.len() <= MAX_ENCODED_LEN {
        encoded
    } else {
        format!("h-{}", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_deterministic() {
        assert_eq!(encode_key("react:abc123"), encode_key("react:abc123"));
    }

    #[test]
    fn test_encode_is_filesystem_safe() {
        let stem = encode_key("@scope/pkg:package:../../etc");
        assert!(!stem.contains('/'));
        assert!(!stem.contains('\\'));
        assert!(!stem.contains('.'));
        assert!(!stem.contains(':'));
    }

    #[test]
    fn test_encode_is_reversible_for_short_keys() {
        let stem = encode_key("lodash:deadbeef");
        let decoded = URL_SAFE_NO_PAD.decode(stem).unwrap();
        assert_eq!(decoded, b"lodash:deadbeef");
    }

    #[test]
    fn test_distinct_keys_distinct_stems() {
        assert_ne!(encode_key("a:1"), encode_key("a:2"));
        assert_ne!(encode_key("a"), encode_key("A"));
    }

    #[test]
    fn test_long_keys_are_hashed() {
        let long_key = "x".repeat(500);
        let stem = encode_key(&long_key);
        assert!(stem.starts_with("h-"));
        assert_eq!(stem.len(), 2 + 64);
        assert_ne!(stem, encode_key(&"x".repeat(501)));
    }
}
