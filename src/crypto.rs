//! Queue wire encryption: derives a Fernet key from each configured secret
//! and wraps the `fernet` crate with the request/response direction split
//! the queue protocol requires.
//!
//! Grounded on `kafka_consumer.py`'s `_derive_fernet_key`,
//! `get_chat_kafka_fernet`/`get_runner_kafka_fernet`: SHA-256 the
//! configured key string, then urlsafe-base64-encode the digest to get a
//! key `fernet::Fernet` accepts.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use fernet::Fernet;
use sha2::{Digest, Sha256};

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("configured encryption key did not produce a valid fernet key")]
    InvalidKey,

    #[error("failed to decrypt message: token invalid or expired")]
    Decrypt,
}

fn derive_fernet_key(key_string: &str) -> String {
    let digest = Sha256::digest(key_string.as_bytes());
    URL_SAFE.encode(digest)
}

/// Holds the two independent Fernet instances the queue protocol uses:
/// one key for decrypting inbound requests, one for encrypting outbound
/// responses.
pub struct QueueCrypto {
    request_fernet: Fernet,
    response_fernet: Fernet,
}

impl QueueCrypto {
    pub fn new(request_key: &str, response_key: &str) -> Result<Self, CryptoError> {
        let request_fernet = Fernet::new(&derive_fernet_key(request_key)).ok_or(CryptoError::InvalidKey)?;
        let response_fernet = Fernet::new(&derive_fernet_key(response_key)).ok_or(CryptoError::InvalidKey)?;
        Ok(Self { request_fernet, response_fernet })
    }

    pub fn decrypt_request(&self, token: &str) -> Result<Vec<u8>, CryptoError> {
        self.request_fernet.decrypt(token).map_err(|_| CryptoError::Decrypt)
    }

    pub fn encrypt_response(&self, payload: &[u8]) -> String {
        self.response_fernet.encrypt(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_both_directions() {
        let crypto = QueueCrypto::new("chat-kafka-encryption-key-32b!", "runner-kafka-encryption-key-32!").unwrap();

        let token = crypto.encrypt_response(b"{\"ok\":true}");
        // Response key only encrypts; decrypt with a crypto built the other
        // way round to simulate the chat side reading our response.
        let mirrored = QueueCrypto::new("runner-kafka-encryption-key-32!", "chat-kafka-encryption-key-32b!").unwrap();
        let decrypted = mirrored.decrypt_request(&token).unwrap();
        assert_eq!(decrypted, b"{\"ok\":true}");
    }

    #[test]
    fn derived_key_is_deterministic() {
        assert_eq!(derive_fernet_key("same-input"), derive_fernet_key("same-input"));
        assert_ne!(derive_fernet_key("a"), derive_fernet_key("b"));
    }

    #[test]
    fn decrypt_rejects_garbage_tokens() {
        let crypto = QueueCrypto::new("chat-kafka-encryption-key-32b!", "runner-kafka-encryption-key-32!").unwrap();
        assert!(crypto.decrypt_request("not-a-real-token").is_err());
    }
}
