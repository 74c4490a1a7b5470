//! Ed25519 and HMAC-SHA256 wrappers for swarm admission.

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Ed25519 key pair for signing block offers
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut csprng);
        KeyPair { signing_key }
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        let signature = self.signing_key.sign(message);
        Ed25519Signature(signature.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing_key.verifying_key().to_bytes())
    }
}

/// Public key (32 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PublicKey([u8; 32]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        PublicKey(bytes)
    }

    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> bool {
        if let Ok(verifying_key) = VerifyingKey::from_bytes(&self.0) {
            let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
            return verifying_key.verify(message, &sig).is_ok();
        }
        false
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature([u8; 64]);

impl Ed25519Signature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Ed25519Signature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

/// Compute HMAC-SHA256 over a message.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

/// Verify an HMAC-SHA256 tag in constant time.
pub fn hmac_sha256_verify(key: &[u8], message: &[u8], tag: &[u8]) -> bool {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(message);
    mac.verify_slice(tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let keys = KeyPair::generate();
        let message = b"0000000000000042|7|0850|0003";
        let signature = keys.sign(message);
        assert!(keys.public_key().verify(message, &signature));
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keys = KeyPair::generate();
        let signature = keys.sign(b"original");
        assert!(!keys.public_key().verify(b"tampered", &signature));
    }

    #[test]
    fn test_hmac_roundtrip() {
        let key = b"shared-secret";
        let tag = hmac_sha256(key, b"payload");
        assert!(hmac_sha256_verify(key, b"payload", &tag));
        assert!(!hmac_sha256_verify(key, b"other", &tag));
        assert!(!hmac_sha256_verify(b"wrong-key", b"payload", &tag));
    }
}
