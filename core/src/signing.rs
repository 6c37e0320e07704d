//! HMAC resource signatures.
//!
//! One process-wide key (`signing.key`) backs every short-lived signature in
//! the platform: socket authentication frames and per-resource access tokens
//! handed to push subscribers. Signatures are HMAC-SHA256 over the parts
//! joined with `#`, encoded as unpadded URL-safe base64, and compared in
//! constant time.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies resource signatures with the platform key.
#[derive(Clone)]
pub struct Signer {
    key: Vec<u8>,
}

impl Signer {
    /// Create a signer from the configured key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the key is empty.
    pub fn new(key: impl Into<Vec<u8>>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::validation("signing key must not be empty"));
        }
        Ok(Self { key })
    }

    /// Create a signer from the signing configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] when the configured key is empty.
    pub fn from_config(config: &crate::config::SigningConfig) -> Result<Self> {
        Self::new(config.key.clone())
    }

    /// Sign the given parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the MAC cannot be keyed.
    pub fn sign(&self, parts: &[&str]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| Error::internal(format!("failed to key signature MAC: {e}")))?;
        mac.update(parts.join("#").as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Verify a signature over the given parts.
    ///
    /// Malformed signatures verify as `false`, never as an error; callers
    /// uniformly treat a failed verification as unauthorized.
    #[must_use]
    pub fn verify(&self, parts: &[&str], signature: &str) -> bool {
        match self.sign(parts) {
            Ok(expected) => constant_time_eq(expected.as_bytes(), signature.as_bytes()),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Test code can use expect
mod tests {
    use super::*;

    fn signer() -> Signer {
        Signer::new(b"test-signing-key".to_vec()).expect("non-empty key")
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let s = signer();
        let sig = s.sign(&["u:cam:alice", "cam"]).expect("sign");
        assert!(s.verify(&["u:cam:alice", "cam"], &sig));
    }

    #[test]
    fn verify_rejects_tampered_parts() {
        let s = signer();
        let sig = s.sign(&["u:cam:alice", "cam"]).expect("sign");
        assert!(!s.verify(&["u:cam:mallory", "cam"], &sig));
        assert!(!s.verify(&["u:cam:alice", "oxford"], &sig));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let s = signer();
        assert!(!s.verify(&["u:cam:alice"], "not-a-signature"));
        assert!(!s.verify(&["u:cam:alice"], ""));
    }

    #[test]
    fn different_keys_do_not_cross_verify() {
        let a = signer();
        let b = Signer::new(b"another-key".to_vec()).expect("non-empty key");
        let sig = a.sign(&["d:cam:doc1"]).expect("sign");
        assert!(!b.verify(&["d:cam:doc1"], &sig));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(Signer::new(Vec::new()).is_err());
    }
}
