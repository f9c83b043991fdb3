//! Transport executor: sends a [`RequestEnvelope`] and reports the outcome as a value.
//!
//! No retries and no payload interpretation happen here. A non-2xx status is
//! an `Err` value carrying whatever body came back; a call that never got a
//! response is [`TransportError::NoResponse`].

use std::future::Future;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::request::{RequestBody, RequestEnvelope, CONTENT_TYPE, REQ_DATA_FIELD};

/// A 2xx reply.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Parsed JSON body; non-JSON text is kept as a JSON string. `None` when empty.
    pub body: Option<Value>,
}

/// A failed transport outcome.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The server replied with a non-2xx status.
    #[error("request failed with status code {status}")]
    Status {
        status: u16,
        status_text: String,
        body: Option<Value>,
    },

    /// No response arrived: timeout, DNS failure, refused connection.
    #[error("{message}")]
    NoResponse { message: String },
}

impl TransportError {
    pub fn timeout(after: Duration) -> Self {
        TransportError::NoResponse {
            message: format!("timeout of {}ms exceeded", after.as_millis()),
        }
    }
}

pub type TransportResult = Result<RawResponse, TransportError>;

/// Performs one network exchange. Implementations must never panic on I/O failure.
pub trait Transport: Send + Sync + 'static {
    fn execute(&self, envelope: &RequestEnvelope) -> impl Future<Output = TransportResult> + Send;
}

/// [`Transport`] backed by a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the TLS backend cannot be initialised.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("netcore/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }

    fn prepare(&self, envelope: &RequestEnvelope) -> Result<reqwest::RequestBuilder, TransportError> {
        let mut req = self.client.request(envelope.method.to_reqwest(), &envelope.url);
        let multipart = matches!(envelope.body, Some(RequestBody::Multipart { .. }));
        for (name, value) in &envelope.headers {
            // reqwest writes the multipart content type itself, with the boundary.
            if multipart && name.eq_ignore_ascii_case(CONTENT_TYPE) {
                continue;
            }
            req = req.header(name.as_str(), value.as_str());
        }

        req = match &envelope.body {
            None => req,
            Some(body @ RequestBody::Encrypted { .. }) => {
                req.body(body.json().map(|v| v.to_string()).unwrap_or_default())
            }
            Some(RequestBody::Multipart { req_data, parts }) => {
                let mut form = Form::new();
                for a in parts {
                    let mut part = Part::bytes(a.bytes.to_vec()).file_name(a.file_name.clone());
                    if let Some(ct) = &a.content_type {
                        part = part.mime_str(ct).map_err(|e| TransportError::NoResponse {
                            message: format!("invalid attachment content type: {e}"),
                        })?;
                    }
                    form = form.part(a.field.clone(), part);
                }
                req.multipart(form.text(REQ_DATA_FIELD, req_data.clone()))
            }
        };
        Ok(req)
    }
}

impl Transport for HttpTransport {
    async fn execute(&self, envelope: &RequestEnvelope) -> TransportResult {
        let req = self.prepare(envelope)?;
        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::timeout(self.timeout)
            } else {
                TransportError::NoResponse { message: e.to_string() }
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| TransportError::NoResponse {
            message: format!("failed to read response body: {e}"),
        })?;
        let body = parse_body(&bytes);
        debug!(operation = %envelope.operation, status = status.as_u16(), "transport exchange complete");

        if status.is_success() {
            Ok(RawResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_owned(),
                body,
            })
        }
    }
}

fn parse_body(bytes: &[u8]) -> Option<Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(v) => Some(v),
        Err(_) => Some(Value::String(String::from_utf8_lossy(bytes).into_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthState;
    use crate::crypto::CipherCodec;
    use crate::endpoints::EndpointRegistry;
    use crate::request::{Attachment, RequestBuilder};
    use axum::{
        extract::Multipart,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Map};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn envelope(base: &str, op: &str, body: Value, files: &[Attachment], auth: &AuthState) -> RequestEnvelope {
        let reg = EndpointRegistry::standard();
        let builder = RequestBuilder::new(base, CipherCodec::default()).unwrap();
        let body = body.as_object().cloned().unwrap_or_else(Map::new);
        builder.build(reg.lookup(op).unwrap(), &Map::new(), &body, files, auth)
    }

    #[tokio::test]
    async fn success_returns_status_and_json_body() {
        let base = serve(Router::new().route(
            "/user/v1/auth/login",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                let ct = headers.get("content-type").unwrap().to_str().unwrap().to_owned();
                Json(json!({"data": body["reqData"], "ct": ct}))
            }),
        ))
        .await;
        let env = envelope(&base, "LOGIN", json!({"email": "a@b.c"}), &[], &AuthState::default());
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let resp = transport.execute(&env).await.unwrap();
        assert_eq!(resp.status, 200);
        let body = resp.body.unwrap();
        assert_eq!(body["data"].as_str(), env.req_data().as_deref());
        assert_eq!(body["ct"], "application/json");
    }

    #[tokio::test]
    async fn non_2xx_is_err_with_body() {
        let base = serve(Router::new().route(
            "/profile",
            get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"message": "expired"}))) }),
        ))
        .await;
        let env = envelope(&base, "FETCH_PROFILE", json!({}), &[], &AuthState::default());
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        match transport.execute(&env).await {
            Err(TransportError::Status { status, status_text, body }) => {
                assert_eq!(status, 401);
                assert_eq!(status_text, "Unauthorized");
                assert_eq!(body, Some(json!({"message": "expired"})));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_json_body_kept_as_text() {
        let base = serve(Router::new().route(
            "/privacy-policy",
            get(|| async { (StatusCode::BAD_GATEWAY, "upstream down") }),
        ))
        .await;
        let env = envelope(&base, "PRIVACY_POLICY", json!({}), &[], &AuthState::default());
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let err = transport.execute(&env).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Status {
                status: 502,
                status_text: "Bad Gateway".into(),
                body: Some(Value::String("upstream down".into())),
            }
        );
    }

    #[tokio::test]
    async fn refused_connection_is_no_response() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let env = envelope(&format!("http://{addr}/"), "PRIVACY_POLICY", json!({}), &[], &AuthState::default());
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        assert!(matches!(
            transport.execute(&env).await,
            Err(TransportError::NoResponse { .. })
        ));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let base = serve(Router::new().route(
            "/privacy-policy",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let env = envelope(&base, "PRIVACY_POLICY", json!({}), &[], &AuthState::default());
        let transport = HttpTransport::new(Duration::from_millis(100)).unwrap();

        let err = transport.execute(&env).await.unwrap_err();
        assert_eq!(err, TransportError::timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn multipart_carries_files_and_req_data() {
        let base = serve(Router::new().route(
            "/api/user/v1/auth/register",
            post(|headers: HeaderMap, mut mp: Multipart| async move {
                let ct = headers.get("content-type").unwrap().to_str().unwrap().to_owned();
                let mut fields = Vec::new();
                while let Some(field) = mp.next_field().await.unwrap() {
                    let name = field.name().unwrap().to_owned();
                    let bytes = field.bytes().await.unwrap();
                    fields.push(json!([name, bytes.len()]));
                }
                Json(json!({"ct": ct, "fields": fields}))
            }),
        ))
        .await;
        let files = vec![
            Attachment::new("profileImages", "a.jpg", vec![1u8, 2, 3]).with_content_type("image/jpeg"),
            Attachment::new("profilePic", "p.png", vec![9u8; 10]),
        ];
        let env = envelope(&base, "SIGNUP", json!({"name": "A"}), &files, &AuthState::default());
        let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

        let body = transport.execute(&env).await.unwrap().body.unwrap();
        assert!(body["ct"].as_str().unwrap().starts_with("multipart/form-data; boundary="));
        let fields = body["fields"].as_array().unwrap();
        assert_eq!(fields[0], json!(["profileImages", 3]));
        assert_eq!(fields[1], json!(["profilePic", 10]));
        assert_eq!(fields[2][0], "reqData");
    }

    #[test]
    fn parse_body_variants() {
        assert_eq!(parse_body(b""), None);
        assert_eq!(parse_body(b"{\"a\":1}"), Some(json!({"a": 1})));
        assert_eq!(parse_body(b"oops"), Some(Value::String("oops".into())));
    }
}
