//! Payload cipher shared by the request builder and response resolver.
//!
//! # Ciphertext format
//!
//! ```text
//! base64(AES-256-CBC(PKCS#7(utf8(json))))
//! ```
//!
//! Standard alphabet with `=` padding. The same codec decrypts replies.

pub mod cipher;

pub use cipher::{CipherCodec, CipherError};
