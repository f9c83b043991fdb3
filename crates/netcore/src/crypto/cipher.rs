//! AES-256-CBC encryption and decryption of UTF-8 payload text.
//!
//! **Algorithm choice:** the backend speaks AES-256-CBC with PKCS#7 padding and
//! a fixed key/IV pair. Identical plaintext always produces identical
//! ciphertext, which the retry path relies on to resend byte-identical requests.
//!
//! The compiled-in pair obfuscates payloads in transit; it is not a secret
//! against anyone holding the client binary.

use aes::{
    cipher::{block_padding::Pkcs7, generic_array::GenericArray, BlockDecryptMut, BlockEncryptMut, KeyIvInit},
    Aes256,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Byte length of a CBC initialisation vector (one AES block).
pub const IV_LEN: usize = 16;

const STATIC_KEY: &[u8; KEY_LEN] = b"0123456789abcdef0123456789abcdef";
const STATIC_IV: &[u8; IV_LEN] = b"abcdef9876543210";

/// Errors produced by the cipher layer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid key length: expected {KEY_LEN} bytes, got {0}")]
    InvalidKeyLength(usize),

    /// The IV is the wrong length (must be [`IV_LEN`] bytes).
    #[error("invalid IV length: expected {IV_LEN} bytes, got {0}")]
    InvalidIvLength(usize),

    /// The input is not valid standard base64.
    #[error("ciphertext is not valid base64")]
    InvalidBase64,

    /// Block decryption or padding removal failed (wrong key or tampered data).
    #[error("ciphertext could not be decrypted")]
    BadPadding,

    /// The decrypted bytes are not UTF-8 text.
    #[error("decrypted payload is not UTF-8")]
    InvalidUtf8,
}

/// Symmetric codec applied to every request and response payload.
///
/// Cheap to clone; holds only the key and IV bytes.
#[derive(Clone)]
pub struct CipherCodec {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl CipherCodec {
    /// Build a codec from an explicit key/IV pair.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidKeyLength`] or [`CipherError::InvalidIvLength`]
    /// if either slice has the wrong length.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; KEY_LEN] = key
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
        let iv: [u8; IV_LEN] = iv
            .try_into()
            .map_err(|_| CipherError::InvalidIvLength(iv.len()))?;
        Ok(Self { key, iv })
    }

    /// Encrypt UTF-8 text to base64 ciphertext. Deterministic for identical input.
    pub fn encrypt(&self, plain_text: &str) -> String {
        let ciphertext = Encryptor::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&self.iv))
            .encrypt_padded_vec_mut::<Pkcs7>(plain_text.as_bytes());
        STANDARD.encode(ciphertext)
    }

    /// Decrypt base64 ciphertext back to UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::InvalidBase64`], [`CipherError::BadPadding`] or
    /// [`CipherError::InvalidUtf8`] for malformed input.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError::InvalidBase64)?;
        let plain = Decryptor::new(GenericArray::from_slice(&self.key), GenericArray::from_slice(&self.iv))
            .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
            .map_err(|_| CipherError::BadPadding)?;
        String::from_utf8(plain).map_err(|_| CipherError::InvalidUtf8)
    }
}

impl Default for CipherCodec {
    /// The key/IV pair compiled into the client.
    fn default() -> Self {
        Self {
            key: *STATIC_KEY,
            iv: *STATIC_IV,
        }
    }
}

impl std::fmt::Debug for CipherCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("CipherCodec([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// Arbitrary JSON documents. Numbers are integers: floats do not survive
    /// a text round trip bit-for-bit.
    fn json_strategy() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<String>().prop_map(Value::String),
            "[a-zà-ÿ日本語 ]{0,48}".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map(any::<String>(), inner, 0..8)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn any_json_survives_round_trip(payload in json_strategy()) {
            let codec = CipherCodec::default();
            let plain = codec.decrypt(&codec.encrypt(&payload.to_string())).unwrap();
            let back: Value = serde_json::from_str(&plain).unwrap();
            prop_assert_eq!(back, payload);
        }

        #[test]
        fn any_text_survives_round_trip(text in any::<String>()) {
            let codec = CipherCodec::default();
            prop_assert_eq!(codec.decrypt(&codec.encrypt(&text)).unwrap(), text);
        }
    }

    #[test]
    fn every_length_around_block_boundaries_round_trips() {
        let codec = CipherCodec::default();
        for len in 0..=64 {
            let text = "x".repeat(len);
            let sealed = STANDARD.decode(codec.encrypt(&text)).unwrap();
            assert_eq!(sealed.len(), (len / 16 + 1) * 16);
            assert_eq!(codec.decrypt(&codec.encrypt(&text)).unwrap(), text);
        }
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let codec = CipherCodec::default();
        let payload = json!({"email": "a@b.c", "tags": ["x", "y"], "n": 3, "nested": {"ok": true}});
        let encrypted = codec.encrypt(&payload.to_string());
        let decrypted: serde_json::Value = serde_json::from_str(&codec.decrypt(&encrypted).unwrap()).unwrap();
        assert_eq!(decrypted, payload);
    }

    #[test]
    fn encryption_is_deterministic() {
        let codec = CipherCodec::default();
        assert_eq!(codec.encrypt("{\"page\":1}"), codec.encrypt("{\"page\":1}"));
        assert_ne!(codec.encrypt("{\"page\":1}"), codec.encrypt("{\"page\":2}"));
    }

    #[test]
    fn output_is_block_aligned_base64() {
        let codec = CipherCodec::default();
        let bytes = STANDARD.decode(codec.encrypt("")).unwrap();
        // PKCS#7 always adds at least one byte of padding.
        assert_eq!(bytes.len(), 16);
        let bytes = STANDARD.decode(codec.encrypt("0123456789abcdef")).unwrap();
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn unicode_survives() {
        let codec = CipherCodec::default();
        let text = "{\"name\":\"Zoë 日本\"}";
        assert_eq!(codec.decrypt(&codec.encrypt(text)).unwrap(), text);
    }

    #[test]
    fn malformed_base64_rejected() {
        let codec = CipherCodec::default();
        assert_eq!(codec.decrypt("!!!not base64"), Err(CipherError::InvalidBase64));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let other = CipherCodec::new(&[7u8; KEY_LEN], &[9u8; IV_LEN]).unwrap();
        let encrypted = CipherCodec::default().encrypt("a longer secret payload body");
        // A wrong key almost always breaks the padding; if it happens to
        // unpad, the bytes will not round-trip to the original text.
        match other.decrypt(&encrypted) {
            Err(_) => {}
            Ok(text) => assert_ne!(text, "a longer secret payload body"),
        }
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let codec = CipherCodec::default();
        // 15 bytes is not a whole block.
        let short = STANDARD.encode([0u8; 15]);
        assert_eq!(codec.decrypt(&short), Err(CipherError::BadPadding));
    }

    #[test]
    fn invalid_lengths_rejected() {
        assert_eq!(
            CipherCodec::new(&[0u8; 16], &[0u8; IV_LEN]).unwrap_err(),
            CipherError::InvalidKeyLength(16)
        );
        assert_eq!(
            CipherCodec::new(&[0u8; KEY_LEN], &[0u8; 12]).unwrap_err(),
            CipherError::InvalidIvLength(12)
        );
    }

    #[test]
    fn debug_is_redacted() {
        assert!(format!("{:?}", CipherCodec::default()).contains("REDACTED"));
    }
}
