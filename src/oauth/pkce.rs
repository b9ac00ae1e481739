//! PKCE (RFC 7636) and CSRF state generation

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Verifier/challenge pair for one authorization request
#[derive(Clone)]
pub struct PkcePair {
    /// Secret kept locally and sent with the code exchange
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent in the authorization URL
    pub challenge: String,
}

/// Generate PKCE code verifier and S256 challenge
#[must_use]
pub fn generate_pkce() -> PkcePair {
    let verifier_bytes: [u8; 32] = rand::rng().random();
    let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
    let challenge = challenge_for(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// S256 challenge for a verifier
#[must_use]
pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state parameter
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
