//! Request envelope assembly.
//!
//! Every call is turned into a [`RequestEnvelope`]: the complete transport
//! request with payloads already encrypted. Envelopes are plain values, so a
//! failed call's envelope can be kept and resent byte-for-byte later.
//!
//! # Payload layout
//!
//! - Query parameters: one `reqData=<ciphertext>` pair holding the whole map.
//! - Body (non-GET): `{"reqData": "<ciphertext>"}`, or a multipart form with a
//!   `reqData` text part plus binary file parts on upload endpoints.
//! - GET requests never carry a body.

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::Url;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::auth::AuthState;
use crate::crypto::CipherCodec;
use crate::endpoints::{EndpointDescriptor, HttpMethod};

/// Name of the single field that carries encrypted payloads.
pub const REQ_DATA_FIELD: &str = "reqData";

/// Body field the access token is injected under.
pub const TOKEN_FIELD: &str = "token";

pub const CONTENT_TYPE: &str = "Content-Type";
pub const AUTHORIZATION: &str = "Authorization";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/form-data";

/// A binary file part sent alongside the encrypted JSON field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Form field name. Several attachments may share one name.
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn new(field: impl Into<String>, file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// Encrypted request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// JSON object `{"reqData": "<ciphertext>"}`.
    Encrypted { req_data: String },
    /// Multipart form: a `reqData` text part plus file parts.
    Multipart { req_data: String, parts: Vec<Attachment> },
}

impl RequestBody {
    pub fn req_data(&self) -> &str {
        match self {
            RequestBody::Encrypted { req_data } | RequestBody::Multipart { req_data, .. } => req_data,
        }
    }

    /// The JSON document sent for [`RequestBody::Encrypted`].
    pub fn json(&self) -> Option<Value> {
        match self {
            RequestBody::Encrypted { req_data } => {
                let mut map = Map::new();
                map.insert(REQ_DATA_FIELD.into(), Value::String(req_data.clone()));
                Some(Value::Object(map))
            }
            RequestBody::Multipart { .. } => None,
        }
    }
}

/// Transport-ready request.
#[derive(Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Logical operation the envelope was built for.
    pub operation: String,
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

impl RequestEnvelope {
    /// The encrypted payload: the body's `reqData`, else the query's.
    pub fn req_data(&self) -> Option<String> {
        if let Some(body) = &self.body {
            return Some(body.req_data().to_owned());
        }
        let url = Url::parse(&self.url).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == REQ_DATA_FIELD)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl std::fmt::Debug for RequestEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let headers: BTreeMap<&str, &str> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let v = if k == AUTHORIZATION { "[REDACTED]" } else { v.as_str() };
                (k.as_str(), v)
            })
            .collect();
        let body = match &self.body {
            None => "none".to_owned(),
            Some(RequestBody::Encrypted { req_data }) => format!("encrypted({} bytes)", req_data.len()),
            Some(RequestBody::Multipart { req_data, parts }) => {
                format!("multipart({} bytes, {} parts)", req_data.len(), parts.len())
            }
        };
        f.debug_struct("RequestEnvelope")
            .field("operation", &self.operation)
            .field("method", &self.method)
            .field("headers", &headers)
            .field("body", &body)
            .finish_non_exhaustive()
    }
}

/// Errors raised when constructing a [`RequestBuilder`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuilderError {
    /// The base URL is unparsable, not http(s), or cannot carry a path.
    #[error("invalid base URL {0:?}")]
    InvalidBaseUrl(String),
}

/// Assembles [`RequestEnvelope`]s against a fixed base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Url,
    codec: CipherCodec,
}

impl RequestBuilder {
    /// # Errors
    ///
    /// Returns [`BuilderError::InvalidBaseUrl`] if `base_url` is not an absolute
    /// http(s) URL that can carry a path.
    pub fn new(base_url: &str, codec: CipherCodec) -> Result<Self, BuilderError> {
        let url = Url::parse(base_url).map_err(|_| BuilderError::InvalidBaseUrl(base_url.to_owned()))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(BuilderError::InvalidBaseUrl(base_url.to_owned()));
        }
        Ok(Self { base_url: url, codec })
    }

    /// Build the envelope for one call.
    ///
    /// Never fails: inputs are JSON maps, and the base URL was validated at
    /// construction.
    pub fn build(
        &self,
        endpoint: &EndpointDescriptor,
        params: &Map<String, Value>,
        body: &Map<String, Value>,
        attachments: &[Attachment],
        auth: &AuthState,
    ) -> RequestEnvelope {
        let url = self.url_for(endpoint, params);

        let multipart = !attachments.is_empty() && endpoint.upload;
        if !attachments.is_empty() && !endpoint.upload {
            warn!(
                operation = endpoint.name,
                count = attachments.len(),
                "attachments ignored on non-upload endpoint"
            );
        }

        let mut headers = BTreeMap::new();
        let content_type = if multipart { MULTIPART_CONTENT_TYPE } else { JSON_CONTENT_TYPE };
        headers.insert(CONTENT_TYPE.to_owned(), content_type.to_owned());
        if let Some(token) = auth.bearer() {
            headers.insert(AUTHORIZATION.to_owned(), token.to_owned());
        }

        let body = if endpoint.method == HttpMethod::Get {
            None
        } else {
            let mut body = body.clone();
            if let Some(token) = auth.bearer() {
                body.insert(TOKEN_FIELD.into(), Value::String(token.to_owned()));
            }
            let req_data = self.codec.encrypt(&Value::Object(body).to_string());
            Some(if multipart {
                RequestBody::Multipart {
                    req_data,
                    parts: attachments.to_vec(),
                }
            } else {
                RequestBody::Encrypted { req_data }
            })
        };

        RequestEnvelope {
            operation: endpoint.name.to_owned(),
            method: endpoint.method,
            url,
            headers,
            body,
        }
    }

    fn url_for(&self, endpoint: &EndpointDescriptor, params: &Map<String, Value>) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(endpoint.path.split('/').filter(|s| !s.is_empty()));
        }
        if !params.is_empty() {
            let blob = self.codec.encrypt(&Value::Object(params.clone()).to_string());
            url.query_pairs_mut().append_pair(REQ_DATA_FIELD, &blob);
        }
        url.into()
    }
}
