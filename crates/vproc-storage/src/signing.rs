//! Upload request signing.
//!
//! The signature is the lowercase hex SHA-256 of the sorted `key=value`
//! parameters joined with `&`, followed directly by the API secret.

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Name of the signature algorithm parameter sent alongside the signature.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

/// Build the string that gets hashed. Empty values are skipped.
pub fn string_to_sign(params: &[(&str, String)]) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign upload parameters with the API secret.
pub fn sign(params: &[(&str, String)], api_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(string_to_sign(params).as_bytes());
    hasher.update(api_secret.as_bytes());

    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_sign_sorted() {
        let params = [
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample_image".to_string()),
            ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop".to_string()),
            ("folder", String::new()),
        ];
        assert_eq!(
            string_to_sign(&params),
            "eager=w_400,h_300,c_pad|w_260,h_200,c_crop&public_id=sample_image&timestamp=1315060510"
        );
    }

    #[test]
    fn test_sign_is_hex_sha256() {
        let params = [("timestamp", "1".to_string())];
        let signature = sign(&params, "secret");
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(signature, sign(&params, "secret"));
        assert_ne!(signature, sign(&params, "other"));
    }
}
