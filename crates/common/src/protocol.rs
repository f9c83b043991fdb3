//! The response contract handed to callers and the wire schema of backend replies.
//!
//! Every backend reply body carries its payload as ciphertext:
//!
//! ```text
//! HTTP body      {"data": "<base64 ciphertext>", ...}
//! decrypted      {"status": bool, "response": {"status", "message", "data", "error"}}
//! ```
//!
//! Decrypted text is validated against [`DecryptedEnvelope`] before any field
//! is read; a mismatch is a [`ParseError`], never a silently missing value.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{ErrorClassification, OFFLINE_MESSAGE};

// ---------------------------------------------------------------------------
// Caller contract
// ---------------------------------------------------------------------------

/// The single result shape every network call resolves to.
///
/// `success` is `true` only for a 200/201 reply whose payload decrypted and
/// whose decrypted status flag was set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkResponse<T = Value> {
    pub success: bool,
    pub data: Option<T>,
    pub error: String,
    pub code: u16,
    pub message: String,
}

impl<T> NetworkResponse<T> {
    /// Build a failed response from a classification.
    pub fn failure(classification: &ErrorClassification, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: error.into(),
            code: classification.code,
            message: classification.message.clone(),
        }
    }

    /// The response returned for any call attempted while offline.
    pub fn offline() -> Self {
        Self {
            success: false,
            data: None,
            error: OFFLINE_MESSAGE.into(),
            code: 500,
            message: OFFLINE_MESSAGE.into(),
        }
    }

    /// Attach a data payload, replacing any existing one.
    pub fn with_data(mut self, data: Option<T>) -> Self {
        self.data = data;
        self
    }

    /// Returns `true` if this response reports the offline short-circuit.
    pub fn is_offline(&self) -> bool {
        !self.success && self.message == OFFLINE_MESSAGE
    }
}

impl NetworkResponse<Value> {
    /// Convert the JSON `data` payload into a caller-defined type.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Schema`] if `data` does not match `T`.
    pub fn decode_data<T: DeserializeOwned>(self) -> Result<NetworkResponse<T>, ParseError> {
        let data = match self.data {
            Some(v) => Some(serde_json::from_value(v).map_err(|e| ParseError::Schema(e.to_string()))?),
            None => None,
        };
        Ok(NetworkResponse {
            success: self.success,
            data,
            error: self.error,
            code: self.code,
            message: self.message,
        })
    }
}

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// Errors raised while validating a reply against the wire schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// The HTTP body carried no ciphertext string in its `data` field.
    #[error("response body has no ciphertext")]
    MissingCiphertext,

    /// The decrypted text is not JSON.
    #[error("decrypted payload is not JSON: {0}")]
    NotJson(String),

    /// The JSON does not match the expected shape.
    #[error("payload does not match schema: {0}")]
    Schema(String),
}

/// Outer HTTP body of a backend reply.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EncryptedBody {
    /// Base64 ciphertext of a [`DecryptedEnvelope`].
    pub data: String,
}

impl EncryptedBody {
    /// Extract the ciphertext from a raw reply body.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MissingCiphertext`] when `data` is absent or not a string.
    pub fn from_value(body: &Value) -> Result<Self, ParseError> {
        EncryptedBody::deserialize(body).map_err(|_| ParseError::MissingCiphertext)
    }
}

/// Decrypted reply envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DecryptedEnvelope {
    /// Outer status flag. `None` when the field is absent, `Some(None)` when
    /// it is present but `null`.
    #[serde(default, deserialize_with = "present")]
    pub status: Option<Option<bool>>,
    #[serde(default)]
    pub response: Option<ResponsePayload>,
}

/// Inner payload of a [`DecryptedEnvelope`].
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct ResponsePayload {
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl DecryptedEnvelope {
    /// Parse decrypted text into raw JSON plus the validated envelope.
    ///
    /// The raw JSON is returned alongside so failure paths can surface the
    /// whole decrypted document.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::NotJson`] or [`ParseError::Schema`].
    pub fn parse(plain: &str) -> Result<(Value, Self), ParseError> {
        let raw: Value = serde_json::from_str(plain).map_err(|e| ParseError::NotJson(e.to_string()))?;
        let envelope = DecryptedEnvelope::deserialize(&raw).map_err(|e| ParseError::Schema(e.to_string()))?;
        Ok((raw, envelope))
    }

    /// The success flag: the decrypted `status`, `true` only when the field is absent.
    pub fn status_flag(&self) -> bool {
        match self.status {
            None => true,
            Some(flag) => flag.unwrap_or(false),
        }
    }

    /// Server-provided code, ignoring a zero placeholder.
    pub fn code(&self) -> Option<u16> {
        self.response.as_ref().and_then(|r| r.status).filter(|c| *c != 0)
    }

    /// Server-provided message, ignoring an empty string.
    pub fn message(&self) -> Option<&str> {
        self.response
            .as_ref()
            .and_then(|r| r.message.as_deref())
            .filter(|m| !m.is_empty())
    }

    /// The server's error field rendered as text.
    pub fn error_text(&self) -> String {
        match self.response.as_ref().and_then(|r| r.error.as_ref()) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    /// Take the inner data payload.
    pub fn into_data(self) -> Option<Value> {
        self.response.and_then(|r| r.data)
    }
}

/// Distinguishes a present-but-null field from an absent one.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn envelope_with_all_fields() {
        let text = r#"{"status":true,"response":{"status":200,"message":"ok","data":{"id":1},"error":""}}"#;
        let (_, env) = DecryptedEnvelope::parse(text).unwrap();
        assert!(env.status_flag());
        assert_eq!(env.code(), Some(200));
        assert_eq!(env.message(), Some("ok"));
        assert_eq!(env.into_data(), Some(json!({"id": 1})));
    }

    #[test]
    fn absent_status_defaults_to_true() {
        let (_, env) = DecryptedEnvelope::parse(r#"{"response":{}}"#).unwrap();
        assert!(env.status_flag());
    }

    #[test]
    fn null_status_is_not_success() {
        let (_, env) = DecryptedEnvelope::parse(r#"{"status":null}"#).unwrap();
        assert!(!env.status_flag());
    }

    #[test]
    fn wrong_types_are_schema_errors() {
        let err = DecryptedEnvelope::parse(r#"{"status":"yes"}"#).unwrap_err();
        assert!(matches!(err, ParseError::Schema(_)));
        let err = DecryptedEnvelope::parse(r#"{"response":{"status":"200"}}"#).unwrap_err();
        assert!(matches!(err, ParseError::Schema(_)));
    }

    #[test]
    fn non_json_is_rejected() {
        assert!(matches!(DecryptedEnvelope::parse("not json"), Err(ParseError::NotJson(_))));
    }

    #[test]
    fn zero_code_and_empty_message_are_ignored() {
        let (_, env) = DecryptedEnvelope::parse(r#"{"response":{"status":0,"message":""}}"#).unwrap();
        assert_eq!(env.code(), None);
        assert_eq!(env.message(), None);
    }

    #[test]
    fn error_field_rendering() {
        let (_, env) = DecryptedEnvelope::parse(r#"{"response":{"error":{"field":"otp"}}}"#).unwrap();
        assert_eq!(env.error_text(), r#"{"field":"otp"}"#);
        let (_, env) = DecryptedEnvelope::parse(r#"{"response":{"error":"bad"}}"#).unwrap();
        assert_eq!(env.error_text(), "bad");
    }

    #[test]
    fn encrypted_body_requires_string_data() {
        assert!(EncryptedBody::from_value(&json!({"data": "abc"})).is_ok());
        assert_eq!(
            EncryptedBody::from_value(&json!({"message": "boom"})),
            Err(ParseError::MissingCiphertext)
        );
        assert!(EncryptedBody::from_value(&json!({"data": {"nested": 1}})).is_err());
    }

    #[test]
    fn offline_response_shape() {
        let r: NetworkResponse = NetworkResponse::offline();
        assert!(!r.success);
        assert!(r.is_offline());
        assert_eq!(r.message, "No internet connection");
    }

    #[test]
    fn failure_uses_classification() {
        let c = ErrorClassification::new(ErrorKind::DecryptError, "Response decryption failed");
        let r: NetworkResponse = NetworkResponse::failure(&c, "Failed to decrypt response");
        assert_eq!(r.code, 500);
        assert!(!r.success);
        assert!(r.data.is_none());
    }

    #[test]
    fn decode_data_into_typed() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Profile {
            id: u32,
        }
        let r = NetworkResponse {
            success: true,
            data: Some(json!({"id": 7})),
            error: String::new(),
            code: 200,
            message: String::new(),
        };
        let typed = r.clone().decode_data::<Profile>().unwrap();
        assert_eq!(typed.data, Some(Profile { id: 7 }));

        let bad = r.with_data(Some(json!("nope"))).decode_data::<Profile>();
        assert!(bad.is_err());
    }
}
