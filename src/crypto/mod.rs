// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Note Encryption
//!
//! Clinical notes are encrypted at rest with AES-256-GCM (`ring::aead`).
//! Every key in the [`KeyRing`] is a 32-byte root secret split with
//! HKDF-SHA256 into an encryption subkey and a content-hash subkey.
//!
//! ## Envelope Layout
//!
//! ```text
//! EncryptedPayload {
//!     ciphertext:   nonce (12) || AES-256-GCM(plaintext) || tag (16)
//!     content_hash: HMAC-SHA256(hash_subkey, plaintext)
//!     key_id:       identifier of the root key (also the AEAD associated data)
//! }
//! ```
//!
//! Decryption verifies the AEAD tag and then re-hashes the recovered
//! plaintext. Either failure is an [`CryptoError::Integrity`] and no
//! plaintext is returned.

pub mod cipher;
pub mod keyring;

pub use cipher::{EncryptedPayload, EncryptionService};
pub use keyring::{KeyInfo, KeyRing, KeyStatus, NoteKey, ROOT_KEY_LEN};

/// Errors raised by the key ring and the encryption service.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The referenced key id is unknown or has been revoked.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The ring has no active key to encrypt with.
    #[error("no active encryption key installed")]
    NoActiveKey,

    /// Ciphertext failed authentication or the content hash did not match.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Key material has the wrong shape.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// A key ring administrative operation was rejected.
    #[error("key ring operation rejected: {0}")]
    Rejected(String),

    /// Underlying primitive failure (RNG, lock poisoning).
    #[error("cryptographic error: {0}")]
    Crypto(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;

/// Serde adapter storing byte strings as standard base64.
pub(crate) mod serde_b64 {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}
