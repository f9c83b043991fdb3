//! Response resolver: turns a transport outcome into the uniform [`NetworkResponse`].
//!
//! Resolution order:
//!
//! 1. Offline at call time → offline response, retry overlay (the transport
//!    is never reached; see [`ResponseResolver::offline`]).
//! 2. Non-2xx with a body → decrypt the body for `{status, message}`; if that
//!    fails, fall back to the raw HTTP status and message.
//! 3. No response at all → code 500 with the transport message.
//! 4. Code 401 on an authenticated call, on either the failure or the success
//!    path → session invalidation plus a "session expired" toast.
//! 5. 2xx → decrypt and unwrap; `success` is the decrypted status flag.
//! 6. An undecryptable 2xx body → decryption failure response.
//!
//! The resolver is pure: side effects are returned as [`SideEffect`] values
//! and dispatched by the caller.

use common::{
    protocol::{DecryptedEnvelope, EncryptedBody},
    ErrorClassification, ErrorKind, NetworkResponse, ParseError,
};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::auth::AuthState;
use crate::crypto::{CipherCodec, CipherError};
use crate::notify::{ErrorOverlay, Toast};
use crate::request::RequestEnvelope;
use crate::transport::{RawResponse, TransportError, TransportResult};

const NETWORK_ERROR: &str = "Network Error";
const GENERIC_ERROR: &str = "Something went wrong";
const DECRYPT_ERROR: &str = "Failed to decrypt response";
const DECRYPT_MESSAGE: &str = "Response decryption failed";

/// Per-call suppression flags. Session invalidation is never suppressible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub skip_toast: bool,
    pub skip_error_screen: bool,
}

/// A notification or state change requested by a resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    InvalidateSession,
    Toast(Toast),
    ShowOverlay(ErrorOverlay),
    HideOverlay,
}

/// Result of resolving one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub response: NetworkResponse<Value>,
    /// `None` for a successful call.
    pub classification: Option<ErrorClassification>,
    pub effects: Vec<SideEffect>,
}

#[derive(Debug, Error)]
enum DecodeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Resolves outcomes against one call's auth snapshot and options.
#[derive(Debug)]
pub struct ResponseResolver<'a> {
    codec: &'a CipherCodec,
    auth: &'a AuthState,
    options: CallOptions,
}

impl<'a> ResponseResolver<'a> {
    pub fn new(codec: &'a CipherCodec, auth: &'a AuthState, options: CallOptions) -> Self {
        Self { codec, auth, options }
    }

    /// Resolution for a call attempted while offline.
    pub fn offline(&self, envelope: &RequestEnvelope) -> Resolution {
        let mut effects = Vec::new();
        if !self.options.skip_error_screen {
            effects.push(SideEffect::ShowOverlay(ErrorOverlay::offline(envelope.clone())));
        }
        let response = NetworkResponse::offline();
        Resolution {
            classification: Some(ErrorClassification::new(ErrorKind::Offline, response.message.clone())),
            response,
            effects,
        }
    }

    /// Resolution for a call whose operation could not be dispatched.
    pub fn rejected(&self, message: impl Into<String>) -> Resolution {
        let message = message.into();
        let classification = ErrorClassification::new(ErrorKind::ConfigError, message.clone());
        let mut effects = Vec::new();
        if !self.options.skip_toast {
            effects.push(SideEffect::Toast(Toast::error("Error", message.clone())));
        }
        Resolution {
            response: NetworkResponse::failure(&classification, message),
            classification: Some(classification),
            effects,
        }
    }

    /// Resolve a transport outcome.
    pub fn resolve(&self, outcome: TransportResult) -> Resolution {
        match outcome {
            Ok(raw) => self.resolve_success(raw),
            Err(err) => self.resolve_failure(err),
        }
    }

    fn resolve_failure(&self, err: TransportError) -> Resolution {
        let error_text = err.to_string();
        let (kind, code, message, data) = match err {
            TransportError::Status {
                status,
                status_text,
                body: Some(body),
            } => match self.decode(Some(&body)) {
                Ok((raw, envelope)) => {
                    let code = envelope.code().unwrap_or(status);
                    let message = envelope.message().unwrap_or(NETWORK_ERROR).to_owned();
                    (ErrorKind::ServerError, code, message, Some(raw))
                }
                Err(e) => {
                    warn!(error = %e, status, "failure body not decryptable; using raw status");
                    let message = body
                        .get("message")
                        .and_then(Value::as_str)
                        .filter(|m| !m.is_empty())
                        .map(str::to_owned)
                        .or_else(|| Some(status_text).filter(|s| !s.is_empty()))
                        .unwrap_or_else(|| NETWORK_ERROR.to_owned());
                    (ErrorKind::ServerError, status, message, Some(body))
                }
            },
            TransportError::Status { status, status_text, body: None } => {
                let message = Some(status_text)
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| error_text.clone());
                (ErrorKind::ServerError, status, message, None)
            }
            TransportError::NoResponse { message } => {
                let message = if message.is_empty() { NETWORK_ERROR.to_owned() } else { message };
                (ErrorKind::TransportNoResponse, 500, message, None)
            }
        };

        let mut effects = Vec::new();
        let expired = self.check_auth_expiry(code, &mut effects);
        if code != 401 && !self.options.skip_toast {
            let shown = data
                .as_ref()
                .and_then(|d| d.get("msg"))
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or(if message.is_empty() { GENERIC_ERROR } else { message.as_str() })
                .to_owned();
            effects.push(SideEffect::Toast(Toast::error("Error", shown)));
        }

        let kind = if expired { ErrorKind::AuthExpired } else { kind };
        Resolution {
            classification: Some(ErrorClassification::with_code(kind, code, message.clone())),
            response: NetworkResponse {
                success: false,
                data,
                error: error_text,
                code,
                message,
            },
            effects,
        }
    }

    fn resolve_success(&self, raw: RawResponse) -> Resolution {
        let (_, envelope) = match self.decode(raw.body.as_ref()) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, status = raw.status, "successful response not decryptable");
                let classification = ErrorClassification::new(ErrorKind::DecryptError, DECRYPT_MESSAGE);
                let mut effects = Vec::new();
                if !self.options.skip_toast {
                    effects.push(SideEffect::Toast(Toast::error("Error", DECRYPT_MESSAGE)));
                }
                return Resolution {
                    response: NetworkResponse::failure(&classification, DECRYPT_ERROR),
                    classification: Some(classification),
                    effects,
                };
            }
        };

        let code = envelope.code().unwrap_or(raw.status);
        let message = envelope.message().unwrap_or_default().to_owned();
        let error = envelope.error_text();
        let flag = envelope.status_flag();

        let mut effects = Vec::new();
        let (success, data) = if matches!(raw.status, 200 | 201) {
            effects.push(SideEffect::HideOverlay);
            (flag && matches!(code, 200 | 201), envelope.into_data())
        } else {
            (false, None)
        };

        let expired = self.check_auth_expiry(code, &mut effects);
        let classification = if success {
            None
        } else if expired {
            Some(ErrorClassification::with_code(ErrorKind::AuthExpired, code, message.clone()))
        } else {
            Some(ErrorClassification::with_code(ErrorKind::ServerError, code, message.clone()))
        };

        Resolution {
            response: NetworkResponse {
                success,
                data,
                error,
                code,
                message,
            },
            classification,
            effects,
        }
    }

    /// Push the auth-expiry effects when `code` is 401 on an authenticated call.
    fn check_auth_expiry(&self, code: u16, effects: &mut Vec<SideEffect>) -> bool {
        if code != 401 || !self.auth.is_authenticated {
            return false;
        }
        effects.push(SideEffect::InvalidateSession);
        if !self.options.skip_toast {
            effects.push(SideEffect::Toast(Toast::session_expired()));
        }
        true
    }

    fn decode(&self, body: Option<&Value>) -> Result<(Value, DecryptedEnvelope), DecodeError> {
        let body = body.ok_or(ParseError::MissingCiphertext)?;
        let ciphertext = EncryptedBody::from_value(body)?;
        let plain = self.codec.decrypt(&ciphertext.data)?;
        Ok(DecryptedEnvelope::parse(&plain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::HttpMethod;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sealed(v: Value) -> Value {
        json!({"data": CipherCodec::default().encrypt(&v.to_string())})
    }

    fn ok(status: u16, decrypted: Value) -> TransportResult {
        Ok(RawResponse {
            status,
            body: Some(sealed(decrypted)),
        })
    }

    fn failed(status: u16, body: Option<Value>) -> TransportResult {
        Err(TransportError::Status {
            status,
            status_text: "Bad Request".into(),
            body,
        })
    }

    fn resolve(outcome: TransportResult, auth: &AuthState, options: CallOptions) -> Resolution {
        let codec = CipherCodec::default();
        ResponseResolver::new(&codec, auth, options).resolve(outcome)
    }

    fn toasts(effects: &[SideEffect]) -> Vec<&Toast> {
        effects
            .iter()
            .filter_map(|e| match e {
                SideEffect::Toast(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn success_unwraps_data() {
        let r = resolve(
            ok(200, json!({"status": true, "response": {"data": {"id": 1}}})),
            &AuthState::default(),
            CallOptions::default(),
        );
        assert!(r.response.success);
        assert_eq!(r.response.data, Some(json!({"id": 1})));
        assert_eq!(r.response.code, 200);
        assert_eq!(r.classification, None);
        assert_eq!(r.effects, vec![SideEffect::HideOverlay]);
    }

    #[test]
    fn success_flag_comes_from_payload_not_http_status() {
        let r = resolve(
            ok(200, json!({"status": false, "response": {"message": "otp invalid", "error": "E42"}})),
            &AuthState::default(),
            CallOptions::default(),
        );
        assert!(!r.response.success);
        assert_eq!(r.response.message, "otp invalid");
        assert_eq!(r.response.error, "E42");
        assert_eq!(r.classification.unwrap().kind, ErrorKind::ServerError);
    }

    #[test]
    fn created_is_success() {
        let r = resolve(ok(201, json!({"response": {"status": 201}})), &AuthState::default(), CallOptions::default());
        assert!(r.response.success);
        assert_eq!(r.response.code, 201);
    }

    #[test]
    fn other_2xx_is_never_success() {
        let r = resolve(ok(202, json!({"status": true, "response": {"data": 1}})), &AuthState::default(), CallOptions::default());
        assert!(!r.response.success);
        assert_eq!(r.response.data, None);
        assert_eq!(r.response.code, 202);
        assert!(!r.effects.contains(&SideEffect::HideOverlay));
    }

    #[test]
    fn undecryptable_success_is_decrypt_error() {
        let outcome = Ok(RawResponse {
            status: 200,
            body: Some(json!({"data": "definitely-not-ciphertext"})),
        });
        let r = resolve(outcome, &AuthState::default(), CallOptions::default());
        assert!(!r.response.success);
        assert_eq!(r.response.code, 500);
        assert!(r.response.message.contains("decryption"));
        assert_eq!(r.classification.unwrap().kind, ErrorKind::DecryptError);
    }

    #[test]
    fn schema_mismatch_is_decrypt_error() {
        let r = resolve(ok(200, json!({"status": "yes"})), &AuthState::default(), CallOptions::default());
        assert!(!r.response.success);
        assert_eq!(r.response.code, 500);
        assert_eq!(r.classification.unwrap().kind, ErrorKind::DecryptError);
    }

    #[test]
    fn missing_success_body_is_decrypt_error() {
        let r = resolve(Ok(RawResponse { status: 200, body: None }), &AuthState::default(), CallOptions::default());
        assert_eq!(r.classification.unwrap().kind, ErrorKind::DecryptError);
    }

    #[test]
    fn failure_body_decrypted_for_code_and_message() {
        let body = sealed(json!({"status": false, "response": {"status": 422, "message": "email taken"}}));
        let r = resolve(failed(400, Some(body)), &AuthState::default(), CallOptions::default());
        assert!(!r.response.success);
        assert_eq!(r.response.code, 422);
        assert_eq!(r.response.message, "email taken");
        assert_eq!(r.response.error, "request failed with status code 400");
        assert_eq!(r.response.data.unwrap()["response"]["status"], 422);
        assert_eq!(toasts(&r.effects)[0].message, "email taken");
    }

    #[test]
    fn failure_body_falls_back_to_raw_status() {
        let r = resolve(
            failed(503, Some(json!({"message": "maintenance"}))),
            &AuthState::default(),
            CallOptions::default(),
        );
        assert_eq!(r.response.code, 503);
        assert_eq!(r.response.message, "maintenance");
        assert_eq!(r.response.data, Some(json!({"message": "maintenance"})));
    }

    #[test]
    fn raw_fallback_uses_status_text_then_generic() {
        let r = resolve(failed(400, Some(Value::String("html".into()))), &AuthState::default(), CallOptions::default());
        assert_eq!(r.response.message, "Bad Request");

        let outcome = Err(TransportError::Status {
            status: 599,
            status_text: String::new(),
            body: Some(json!({})),
        });
        let r = resolve(outcome, &AuthState::default(), CallOptions::default());
        assert_eq!(r.response.message, "Network Error");
    }

    #[test]
    fn toast_prefers_msg_field() {
        let r = resolve(
            failed(500, Some(json!({"message": "m", "msg": "friendly"}))),
            &AuthState::default(),
            CallOptions::default(),
        );
        assert_eq!(toasts(&r.effects)[0].message, "friendly");
    }

    #[test]
    fn no_response_is_500_with_transport_message() {
        let outcome = Err(TransportError::NoResponse {
            message: "connection refused".into(),
        });
        let r = resolve(outcome, &AuthState::default(), CallOptions::default());
        assert_eq!(r.response.code, 500);
        assert_eq!(r.response.message, "connection refused");
        assert_eq!(r.response.data, None);
        assert_eq!(r.classification.unwrap().kind, ErrorKind::TransportNoResponse);
    }

    #[test]
    fn http_401_while_authenticated_invalidates() {
        let auth = AuthState::authenticated("tok", None);
        let r = resolve(failed(401, Some(json!({"message": "expired"}))), &auth, CallOptions::default());
        assert!(!r.response.success);
        let invalidations = r.effects.iter().filter(|e| **e == SideEffect::InvalidateSession).count();
        assert_eq!(invalidations, 1);
        assert_eq!(toasts(&r.effects), vec![&Toast::session_expired()]);
        assert_eq!(r.classification.unwrap().kind, ErrorKind::AuthExpired);
    }

    #[test]
    fn http_401_unauthenticated_has_no_side_effects() {
        let r = resolve(failed(401, Some(json!({"message": "no"}))), &AuthState::default(), CallOptions::default());
        assert!(r.effects.is_empty());
        assert_eq!(r.classification.unwrap().kind, ErrorKind::ServerError);
    }

    #[test]
    fn embedded_401_in_http_200_invalidates() {
        let auth = AuthState::authenticated("tok", None);
        let r = resolve(ok(200, json!({"status": false, "response": {"status": 401}})), &auth, CallOptions::default());
        assert!(!r.response.success);
        assert_eq!(r.response.code, 401);
        assert!(r.effects.contains(&SideEffect::InvalidateSession));
        assert_eq!(r.classification.unwrap().kind, ErrorKind::AuthExpired);
    }

    #[test]
    fn skip_toast_keeps_invalidation() {
        let auth = AuthState::authenticated("tok", None);
        let options = CallOptions {
            skip_toast: true,
            skip_error_screen: true,
        };
        let r = resolve(failed(401, None), &auth, options);
        assert_eq!(r.effects, vec![SideEffect::InvalidateSession]);

        let r = resolve(failed(500, None), &auth, options);
        assert!(r.effects.is_empty());
    }

    #[test]
    fn status_without_body_keeps_http_status() {
        let r = resolve(failed(404, None), &AuthState::default(), CallOptions::default());
        assert_eq!(r.response.code, 404);
        assert_eq!(r.response.message, "Bad Request");
    }

    #[test]
    fn offline_attaches_envelope_unless_suppressed() {
        let envelope = RequestEnvelope {
            operation: "LOGIN".into(),
            method: HttpMethod::Post,
            url: "https://api.example.com/user/v1/auth/login".into(),
            headers: BTreeMap::new(),
            body: None,
        };
        let codec = CipherCodec::default();
        let auth = AuthState::default();

        let r = ResponseResolver::new(&codec, &auth, CallOptions::default()).offline(&envelope);
        assert!(r.response.is_offline());
        match &r.effects[..] {
            [SideEffect::ShowOverlay(o)] => {
                assert_eq!(o.retry_envelope.as_ref(), Some(&envelope));
                assert_eq!(o.button_label, "Try again");
            }
            other => panic!("unexpected effects {other:?}"),
        }

        let quiet = CallOptions {
            skip_error_screen: true,
            ..CallOptions::default()
        };
        let r = ResponseResolver::new(&codec, &auth, quiet).offline(&envelope);
        assert!(r.effects.is_empty());
        assert_eq!(r.classification.unwrap().kind, ErrorKind::Offline);
    }

    #[test]
    fn rejected_call_toasts_unless_suppressed() {
        let codec = CipherCodec::default();
        let auth = AuthState::default();

        let r = ResponseResolver::new(&codec, &auth, CallOptions::default()).rejected("unknown operation: NOPE");
        assert!(!r.response.success);
        assert_eq!(r.classification.unwrap().kind, ErrorKind::ConfigError);
        assert_eq!(toasts(&r.effects), vec![&Toast::error("Error", "unknown operation: NOPE")]);

        let quiet = CallOptions {
            skip_toast: true,
            ..CallOptions::default()
        };
        let r = ResponseResolver::new(&codec, &auth, quiet).rejected("unknown operation: NOPE");
        assert!(r.effects.is_empty());
    }
}
