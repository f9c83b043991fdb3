//! Static catalogue of logical operations and the path + verb each maps to.
//!
//! The authenticated/non-authenticated split is organisational only. Whether
//! a call carries a token is decided per call from the auth snapshot.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// HTTP verb of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// Operation name, e.g. `"LOGIN"`.
    pub name: &'static str,
    /// Path relative to the configured base URL.
    pub path: &'static str,
    pub method: HttpMethod,
    /// Whether the endpoint accepts multipart file attachments.
    pub upload: bool,
}

impl EndpointDescriptor {
    const fn new(name: &'static str, path: &'static str, method: HttpMethod) -> Self {
        Self {
            name,
            path,
            method,
            upload: false,
        }
    }

    const fn upload(name: &'static str, path: &'static str, method: HttpMethod) -> Self {
        Self {
            name,
            path,
            method,
            upload: true,
        }
    }
}

/// Operations callable without a session.
pub const NON_AUTHENTICATED: &[EndpointDescriptor] = &[
    EndpointDescriptor::new("PRIVACY_POLICY", "privacy-policy", HttpMethod::Get),
    EndpointDescriptor::new("TERMS_CONDITION", "user/v1/account/list", HttpMethod::Get),
    EndpointDescriptor::new("LOGIN", "user/v1/auth/login", HttpMethod::Post),
    EndpointDescriptor::upload("SIGNUP", "api/user/v1/auth/register", HttpMethod::Post),
    EndpointDescriptor::new("FORGET_PASSWORD", "auth/forgot-password", HttpMethod::Post),
    EndpointDescriptor::new("SENDOTP", "api/user/v1/auth/sendotp", HttpMethod::Post),
];

/// Operations that expect a session.
pub const AUTHENTICATED: &[EndpointDescriptor] = &[
    EndpointDescriptor::new("LOGOUT", "auth/logout", HttpMethod::Get),
    EndpointDescriptor::new("REFRESH_TOKEN", "auth/refresh-token", HttpMethod::Get),
    EndpointDescriptor::new("FETCH_PROFILE", "profile", HttpMethod::Get),
    EndpointDescriptor::upload("UPDATE_PROFILE", "api/user/v1/account/update-profile", HttpMethod::Post),
];

/// Errors from the registry.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The requested operation has no descriptor.
    #[error("unknown operation: {0}")]
    UnknownOperation(String),
}

/// Name → descriptor lookup, fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct EndpointRegistry {
    entries: HashMap<&'static str, EndpointDescriptor>,
}

impl EndpointRegistry {
    /// Registry holding the built-in catalogue.
    pub fn standard() -> Self {
        Self::from_descriptors(NON_AUTHENTICATED.iter().chain(AUTHENTICATED).cloned())
    }

    /// Registry holding exactly `descriptors`. A later duplicate name wins.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = EndpointDescriptor>) -> Self {
        let entries = descriptors.into_iter().map(|d| (d.name, d)).collect();
        Self { entries }
    }

    /// Look up an operation by name.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownOperation`] if `name` is not registered.
    pub fn lookup(&self, name: &str) -> Result<&EndpointDescriptor, RegistryError> {
        self.entries
            .get(name)
            .ok_or_else(|| RegistryError::UnknownOperation(name.to_owned()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EndpointRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
