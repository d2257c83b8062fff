//! Proof Key for Code Exchange (RFC 7636) verification.

use base64::prelude::*;
use sha2::{Digest, Sha256};

/// The S256 transformation: base64url(SHA-256(verifier)) without padding.
pub fn s256_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    BASE64_URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Validate a code verifier against a stored challenge.
///
/// Unknown methods and empty verifiers fail rather than pass.
pub fn validate(method: &str, code_challenge: &str, code_verifier: &str) -> bool {
    if code_verifier.is_empty() || code_challenge.is_empty() {
        return false;
    }

    match method {
        "plain" => code_challenge == code_verifier,
        "S256" => s256_challenge(code_verifier) == code_challenge,
        _ => false,
    }
}

/// Methods accepted at the authorize endpoint.
pub fn is_supported_method(method: &str) -> bool {
    matches!(method, "plain" | "S256")
}
