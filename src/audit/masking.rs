// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Masking of note bodies before they reach the audit log.
//!
//! A masked value keeps a short preview (the first 8 characters followed by
//! `…[redacted]`) plus a keyed digest of the full text. The digest lets an
//! auditor prove whether a known plaintext equals what was logged without the
//! log ever storing the plaintext.

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use utoipa::ToSchema;

use super::AuditError;

type HmacSha256 = Hmac<Sha256>;

/// Number of leading characters kept in the preview.
pub const PREVIEW_CHARS: usize = 8;

/// Marker appended to every preview.
pub const REDACTION_MARKER: &str = "…[redacted]";

/// Minimum masking key length in bytes.
pub const MIN_MASK_KEY_LEN: usize = 16;

/// Masked form of a sensitive value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MaskedValue {
    /// First characters of the value followed by the redaction marker.
    pub preview: String,
    /// Base64 HMAC-SHA256 of the full value.
    pub digest: String,
}

/// Keyed masker shared by the audit recorder.
#[derive(Clone)]
pub struct Masker {
    mac: HmacSha256,
}

impl std::fmt::Debug for Masker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Masker([REDACTED])")
    }
}

impl Masker {
    pub fn new(key: &[u8]) -> Result<Self, AuditError> {
        if key.len() < MIN_MASK_KEY_LEN {
            return Err(AuditError::Invalid(format!(
                "masking key must be at least {MIN_MASK_KEY_LEN} bytes"
            )));
        }
        let mac = <HmacSha256 as Mac>::new_from_slice(key)
            .map_err(|e| AuditError::Invalid(format!("masking key rejected: {e}")))?;
        Ok(Self { mac })
    }

    /// Mask a value. Deterministic for a given key.
    pub fn mask(&self, value: &str) -> MaskedValue {
        let mut preview: String = value.chars().take(PREVIEW_CHARS).collect();
        preview.push_str(REDACTION_MARKER);

        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        let digest = Base64::encode_string(&mac.finalize().into_bytes());

        MaskedValue { preview, digest }
    }

    /// Whether `candidate` is the value that produced `masked`.
    pub fn matches(&self, masked: &MaskedValue, candidate: &str) -> bool {
        let Ok(expected) = Base64::decode_vec(&masked.digest) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(candidate.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn masker() -> Masker {
        Masker::new(&[3u8; 32]).unwrap()
    }

    #[test]
    fn preview_keeps_first_eight_characters() {
        let masked = masker().mask("Patient reports improved mood.");
        assert_eq!(masked.preview, "Patient …[redacted]");
    }

    #[test]
    fn short_values_are_not_padded() {
        let masked = masker().mask("ok");
        assert_eq!(masked.preview, "ok…[redacted]");
        assert_eq!(masker().mask("").preview, REDACTION_MARKER);
    }

    #[test]
    fn multibyte_characters_are_not_split() {
        let masked = masker().mask("ünïcödé✓✓✓✓");
        assert_eq!(masked.preview, "ünïcödé✓…[redacted]");
    }

    #[test]
    fn masking_is_deterministic_and_bounded() {
        let m = masker();
        let long = "y".repeat(50_000);
        let a = m.mask(&long);
        let b = m.mask(&long);
        assert_eq!(a, b);
        assert!(a.preview.chars().count() <= PREVIEW_CHARS + REDACTION_MARKER.chars().count());
        assert_eq!(a.digest.len(), 44);
    }

    #[test]
    fn digest_proves_equality() {
        let m = masker();
        let masked = m.mask("Prescribed 20mg daily");
        assert!(m.matches(&masked, "Prescribed 20mg daily"));
        assert!(!m.matches(&masked, "Prescribed 40mg daily"));
    }

    #[test]
    fn different_keys_give_different_digests() {
        let other = Masker::new(&[4u8; 32]).unwrap();
        assert_ne!(masker().mask("same").digest, other.mask("same").digest);
    }

    #[test]
    fn short_key_is_rejected() {
        assert!(matches!(Masker::new(&[0u8; 8]), Err(AuditError::Invalid(_))));
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", masker()), "Masker([REDACTED])");
    }
}
