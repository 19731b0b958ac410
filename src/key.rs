//! Application server key decoding.
//!
//! The push service identifies the sending backend by its VAPID public key
//! (RFC 8292). Configuration hands it to us as URL-safe base64 without
//! padding; the host's subscribe primitive wants raw bytes.
//!
//! # Algorithm
//!
//! ```text
//! "BNDx..._r4m"            input, alphabet [A-Za-z0-9-_]
//!     ↓ pad to a multiple of 4 with '='
//!     ↓ '-' → '+', '_' → '/'
//!     ↓ standard base64 decode
//! [0x04, 0xd0, 0xf1, ...]  one byte per decoded octet
//! ```
//!
//! A final quantum made of a single symbol carries only six bits, which is
//! not enough for a byte. That symbol is still validated but produces no
//! output.

// Rust guideline compliant 2026-02

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use thiserror::Error;

/// Standard alphabet, canonical padding, trailing bits tolerated.
///
/// Browsers' `atob` ignores non-zero trailing bits, and keys produced by
/// other tooling occasionally carry them.
const PADDED_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Length in bytes of an uncompressed SEC1 P-256 point (`0x04 || x || y`).
pub const P256_UNCOMPRESSED_LEN: usize = 65;

/// Why a key failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// A character outside `[A-Za-z0-9-_]`.
    #[error("invalid character {character:?} at position {position}")]
    InvalidCharacter {
        /// Zero-based character index.
        position: usize,
        /// The offending character.
        character: char,
    },

    /// The padded input was rejected by the base64 decoder.
    #[error("malformed base64: {0}")]
    Malformed(String),
}

fn is_url_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Decode an unpadded base64url string into raw bytes.
///
/// Deterministic and total over the URL-safe alphabet; a lone trailing
/// symbol is validated but yields no byte. Anything else fails with
/// [`DecodeError`] and no partial output is returned.
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    // All valid characters are ASCII, so the byte offset of the first
    // invalid one is also its character index.
    if let Some((position, character)) = input.char_indices().find(|(_, c)| !is_url_safe(*c)) {
        return Err(DecodeError::InvalidCharacter {
            position,
            character,
        });
    }

    // A lone final symbol holds no whole byte (see module docs).
    let body = if input.len() % 4 == 1 {
        &input[..input.len() - 1]
    } else {
        input
    };
    let padding = (4 - body.len() % 4) % 4;

    let mut padded: String = body
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    padded.extend(std::iter::repeat('=').take(padding));

    PADDED_STANDARD
        .decode(padded.as_bytes())
        .map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// A decoded VAPID application server key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationServerKey {
    bytes: Vec<u8>,
}

impl ApplicationServerKey {
    /// Decode a base64url key as it appears in configuration.
    pub fn from_base64url(encoded: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            bytes: decode(encoded)?,
        })
    }

    /// Raw key bytes, ready for the host's subscribe primitive.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the decoded key is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the bytes form an uncompressed point on the P-256 curve.
    ///
    /// Push services reject anything else, but the host is the authority, so
    /// callers only warn on `false`.
    pub fn is_p256_point(&self) -> bool {
        self.bytes.len() == P256_UNCOMPRESSED_LEN
            && self.bytes[0] == 0x04
            && p256::PublicKey::from_sec1_bytes(&self.bytes).is_ok()
    }
}

impl AsRef<[u8]> for ApplicationServerKey {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL;
    use p256::ecdsa::SigningKey;
    use p256::elliptic_curve::rand_core::OsRng;

    const REFERENCE_KEY: &str =
        "BNDxrLsyT-BTNT9Xl-r5MjAXTREeLfVe-cjH3q_r4mFLqJMzL5pCqGe9E3GQ1C_4LFqT1";

    #[test]
    fn test_reference_key_decodes_to_fixed_length() {
        let bytes = decode(REFERENCE_KEY).expect("reference key should decode");
        assert_eq!(bytes.len(), 51);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let first = decode(REFERENCE_KEY).expect("decode");
        let second = decode(REFERENCE_KEY).expect("decode");
        assert_eq!(first, second);
    }

    #[test]
    fn test_rejects_character_outside_alphabet() {
        let err = decode("abc!def").expect_err("'!' is not base64url");
        assert_eq!(
            err,
            DecodeError::InvalidCharacter {
                position: 3,
                character: '!'
            }
        );
    }

    #[test]
    fn test_rejects_standard_alphabet_and_padding() {
        assert!(matches!(
            decode("ab+c"),
            Err(DecodeError::InvalidCharacter { character: '+', .. })
        ));
        assert!(matches!(
            decode("ab/c"),
            Err(DecodeError::InvalidCharacter { character: '/', .. })
        ));
        assert!(matches!(
            decode("abc="),
            Err(DecodeError::InvalidCharacter { character: '=', .. })
        ));
    }

    #[test]
    fn test_url_safe_characters_map_to_standard() {
        // "+/8" in standard base64 is 0xfb 0xff
        assert_eq!(decode("-_8").expect("decode"), vec![0xfb, 0xff]);
    }

    #[test]
    fn test_empty_input_decodes_to_nothing() {
        assert_eq!(decode("").expect("empty is valid"), Vec::<u8>::new());
    }

    #[test]
    fn test_lone_trailing_symbol_yields_no_byte() {
        assert_eq!(decode("QUJD").expect("decode"), b"ABC".to_vec());
        assert_eq!(decode("QUJDR").expect("decode"), b"ABC".to_vec());
        // Still validated.
        assert!(decode("QUJD*").is_err());
    }

    #[test]
    fn test_matches_base64url_crate_for_generated_key() {
        let signing_key = SigningKey::random(&mut OsRng);
        let point = signing_key.verifying_key().to_encoded_point(false);
        let encoded = BASE64URL.encode(point.as_bytes());

        let key = ApplicationServerKey::from_base64url(&encoded).expect("decode");
        assert_eq!(key.as_bytes(), point.as_bytes());
        assert_eq!(key.len(), P256_UNCOMPRESSED_LEN);
        assert!(key.is_p256_point());
    }

    #[test]
    fn test_reference_key_is_not_a_p256_point() {
        let key = ApplicationServerKey::from_base64url(REFERENCE_KEY).expect("decode");
        assert!(!key.is_p256_point());
    }
}
