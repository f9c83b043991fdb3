//! Failure taxonomy shared across crates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Message surfaced for every call made while the device is offline.
pub const OFFLINE_MESSAGE: &str = "No internet connection";

/// Kind of failure a single network call ended in.
///
/// Derived per call and never persisted. Each kind has a default code used
/// when the server did not provide one:
/// - [`ErrorKind::AuthExpired`] → 401
/// - everything else → 500
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The connectivity flag was down when the call started.
    Offline,
    /// The request never produced a response (timeout, DNS, connection refused).
    TransportNoResponse,
    /// The server answered with a failure status.
    ServerError,
    /// A payload could not be decrypted or did not match the response schema.
    DecryptError,
    /// The server reported 401 for an authenticated session.
    AuthExpired,
    /// The call named an unknown operation or was otherwise misconfigured.
    ConfigError,
}

impl ErrorKind {
    /// Returns the code reported for this kind when no server code is available.
    pub fn default_code(&self) -> u16 {
        match self {
            ErrorKind::AuthExpired => 401,
            ErrorKind::Offline
            | ErrorKind::TransportNoResponse
            | ErrorKind::ServerError
            | ErrorKind::DecryptError
            | ErrorKind::ConfigError => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Offline => "offline",
            ErrorKind::TransportNoResponse => "transport_no_response",
            ErrorKind::ServerError => "server_error",
            ErrorKind::DecryptError => "decrypt_error",
            ErrorKind::AuthExpired => "auth_expired",
            ErrorKind::ConfigError => "config_error",
        };
        f.write_str(s)
    }
}

/// A classified failure: kind plus the code and message surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub code: u16,
    pub message: String,
}

impl ErrorClassification {
    /// Classify with the kind's default code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
        }
    }

    /// Classify with an explicit, usually server-provided, code.
    pub fn with_code(kind: ErrorKind, code: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }
}
