//! Constant-time secret comparison and session-token signing-key derivation.
//!
//! Deliberately small: this system's only cryptographic surface is the
//! Admission Controller's shared-secret check (spec §4.6) and deriving a
//! stable HMAC key for session tokens from that secret.

use ring::constant_time;
use ring::hkdf;

/// Compare two secrets in constant time, so a mismatching admin/server
/// secret takes the same time to reject regardless of where the first
/// differing byte falls.
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    constant_time::verify_slices_are_equal(provided.as_bytes(), expected.as_bytes()).is_ok()
}

/// Derive a 32-byte HMAC signing key for session tokens from the
/// configured server secret via HKDF-SHA256, so the raw secret is never
/// used directly as a MAC key.
pub fn derive_signing_key(server_secret: &str, info: &[u8]) -> [u8; 32] {
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, b"intercom-router-session-token");
    let prk = salt.extract(server_secret.as_bytes());
    let okm = prk
        .expand(&[info], hkdf::HKDF_SHA256)
        .expect("HKDF expand with fixed 32-byte output never fails");

    let mut key = [0u8; 32];
    okm.fill(&mut key).expect("HKDF fill into a 32-byte buffer never fails");
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_secrets_compare_equal() {
        assert!(secrets_match("wire", "wire"));
    }

    #[test]
    fn mismatched_secrets_compare_unequal() {
        assert!(!secrets_match("wire", "key"));
        assert!(!secrets_match("wire", "wire2"));
        assert!(!secrets_match("", "wire"));
    }

    #[test]
    fn derived_keys_are_deterministic_and_secret_dependent() {
        let a = derive_signing_key("wire", b"session");
        let b = derive_signing_key("wire", b"session");
        let c = derive_signing_key("other", b"session");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
