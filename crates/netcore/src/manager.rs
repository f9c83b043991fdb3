//! The network manager: single entry point for every backend call.
//!
//! One call runs: registry lookup → auth snapshot → envelope build →
//! connectivity gate → transport (bounded by the configured timeout) →
//! resolution → side-effect dispatch. Every call resolves to a
//! [`NetworkResponse`]; failures never surface as `Err` or panics.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use common::{ErrorClassification, ErrorKind, NetworkResponse};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::time;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::{AuthState, AuthStore};
use crate::config::ClientConfig;
use crate::connectivity::ConnectivityMonitor;
use crate::crypto::CipherCodec;
use crate::endpoints::EndpointRegistry;
use crate::notify::{ErrorOverlayChannel, ToastChannel};
use crate::request::{Attachment, BuilderError, RequestBuilder, RequestEnvelope};
use crate::resolver::{CallOptions, Resolution, ResponseResolver, SideEffect};
use crate::transport::{HttpTransport, Transport, TransportError};

/// Errors raised while constructing a [`NetworkManager`].
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    BaseUrl(#[from] BuilderError),

    #[error("failed to initialise HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// One logical call.
#[derive(Debug, Clone, Default)]
pub struct ApiRequest {
    pub operation: String,
    pub params: Map<String, Value>,
    pub body: Map<String, Value>,
    pub attachments: Vec<Attachment>,
    pub options: CallOptions,
}

impl ApiRequest {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            ..Self::default()
        }
    }

    /// Query parameters. Non-object values are ignored.
    pub fn params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.params = map;
        }
        self
    }

    /// Body fields. Non-object values are ignored.
    pub fn body(mut self, body: Value) -> Self {
        if let Value::Object(map) = body {
            self.body = map;
        }
        self
    }

    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn skip_toast(mut self) -> Self {
        self.options.skip_toast = true;
        self
    }

    pub fn skip_error_screen(mut self) -> Self {
        self.options.skip_error_screen = true;
        self
    }
}

/// A resolved call whose user-facing notices have not been shown yet.
#[derive(Debug, Clone, PartialEq)]
pub struct HeldCall {
    pub response: NetworkResponse<Value>,
    /// `None` for a successful call.
    pub classification: Option<ErrorClassification>,
    /// Toasts and overlays awaiting [`NetworkManager::release`].
    pub notices: Vec<SideEffect>,
}

/// Application-owned collaborators the manager reads from and notifies.
#[derive(Clone)]
pub struct Collaborators {
    pub auth: Arc<dyn AuthStore>,
    pub toasts: Arc<dyn ToastChannel>,
    pub overlay: Arc<dyn ErrorOverlayChannel>,
    pub connectivity: ConnectivityMonitor,
}

struct Inner<T> {
    registry: EndpointRegistry,
    builder: RequestBuilder,
    codec: CipherCodec,
    transport: T,
    timeout: Duration,
    collaborators: Collaborators,
    /// Envelope of the last call rejected while offline.
    pending: ArcSwapOption<RequestEnvelope>,
}

/// Executes calls and normalises their outcomes. Cheap to clone.
pub struct NetworkManager<T = HttpTransport> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for NetworkManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl NetworkManager<HttpTransport> {
    /// Manager over the standard endpoint catalogue and the static cipher pair.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn from_config(cfg: &ClientConfig, collaborators: Collaborators) -> Result<Self, ClientError> {
        let timeout = cfg.request_timeout();
        Self::new(
            &cfg.base_url,
            CipherCodec::default(),
            EndpointRegistry::standard(),
            timeout,
            HttpTransport::new(timeout)?,
            collaborators,
        )
    }
}

impl<T: Transport> NetworkManager<T> {
    /// # Errors
    ///
    /// Returns [`ClientError::BaseUrl`] if `base_url` is not an absolute http(s) URL.
    pub fn new(
        base_url: &str,
        codec: CipherCodec,
        registry: EndpointRegistry,
        timeout: Duration,
        transport: T,
        collaborators: Collaborators,
    ) -> Result<Self, ClientError> {
        let builder = RequestBuilder::new(base_url, codec.clone())?;
        info!(endpoints = registry.len(), timeout_ms = timeout.as_millis() as u64, "network manager ready");
        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                builder,
                codec,
                transport,
                timeout,
                collaborators,
                pending: ArcSwapOption::empty(),
            }),
        })
    }

    /// Perform one logical call.
    pub async fn call(&self, request: ApiRequest) -> NetworkResponse<Value> {
        let held = self.call_held(request).await;
        self.release(held.notices);
        held.response
    }

    /// Perform one logical call, holding back its toasts and error overlay.
    ///
    /// Session invalidation and overlay dismissal still apply immediately.
    /// Pass the held notices to [`NetworkManager::release`] to show them, or
    /// drop them to discard.
    pub async fn call_held(&self, request: ApiRequest) -> HeldCall {
        let span = info_span!(
            "network_call",
            request_id = %Uuid::new_v4(),
            operation = %request.operation,
        );
        self.call_inner(request).instrument(span).await
    }

    /// Show notices held back by [`NetworkManager::call_held`].
    pub fn release(&self, notices: Vec<SideEffect>) {
        self.dispatch(notices);
    }

    async fn call_inner(&self, request: ApiRequest) -> HeldCall {
        let auth = self.inner.collaborators.auth.snapshot();
        let endpoint = match self.inner.registry.lookup(&request.operation) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "call rejected");
                let resolver = ResponseResolver::new(&self.inner.codec, &auth, request.options);
                return self.settle(resolver.rejected(e.to_string()));
            }
        };

        let envelope = self.inner.builder.build(
            endpoint,
            &request.params,
            &request.body,
            &request.attachments,
            &auth,
        );
        self.send(envelope, &auth, request.options).await
    }

    /// Resend a previously built envelope verbatim.
    ///
    /// The envelope is not rebuilt: its ciphertext, headers and URL go out
    /// exactly as first built, whatever the session looks like now.
    pub async fn retry(&self, envelope: RequestEnvelope, options: CallOptions) -> NetworkResponse<Value> {
        let span = info_span!(
            "network_retry",
            request_id = %Uuid::new_v4(),
            operation = %envelope.operation,
        );
        let auth = self.inner.collaborators.auth.snapshot();
        let held = self.send(envelope, &auth, options).instrument(span).await;
        self.release(held.notices);
        held.response
    }

    /// Resend the envelope held for the offline prompt, if any.
    pub async fn retry_pending(&self, options: CallOptions) -> Option<NetworkResponse<Value>> {
        let envelope = self.inner.pending.swap(None)?;
        let envelope = Arc::try_unwrap(envelope).unwrap_or_else(|shared| (*shared).clone());
        Some(self.retry(envelope, options).await)
    }

    /// The envelope held for the offline prompt, if any.
    pub fn pending_retry(&self) -> Option<RequestEnvelope> {
        self.inner.pending.load_full().map(|e| (*e).clone())
    }

    pub fn auth(&self) -> &Arc<dyn AuthStore> {
        &self.inner.collaborators.auth
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.collaborators.connectivity
    }

    pub fn registry(&self) -> &EndpointRegistry {
        &self.inner.registry
    }

    async fn send(&self, envelope: RequestEnvelope, auth: &AuthState, options: CallOptions) -> HeldCall {
        let resolver = ResponseResolver::new(&self.inner.codec, auth, options);

        let resolution = if !self.inner.collaborators.connectivity.is_online() {
            let resolution = resolver.offline(&envelope);
            self.inner.pending.store(Some(Arc::new(envelope)));
            resolution
        } else {
            let outcome = match time::timeout(self.inner.timeout, self.inner.transport.execute(&envelope)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::timeout(self.inner.timeout)),
            };
            resolver.resolve(outcome)
        };

        self.settle(resolution)
    }

    /// Log the resolution, apply its state changes and hold its notices.
    fn settle(&self, resolution: Resolution) -> HeldCall {
        self.report(&resolution);
        let Resolution {
            response,
            classification,
            effects,
        } = resolution;
        let (notices, immediate): (Vec<_>, Vec<_>) = effects
            .into_iter()
            .partition(|e| matches!(e, SideEffect::Toast(_) | SideEffect::ShowOverlay(_)));
        self.dispatch(immediate);
        HeldCall {
            response,
            classification,
            notices,
        }
    }

    fn report(&self, resolution: &Resolution) {
        match &resolution.classification {
            None => debug!(code = resolution.response.code, "call succeeded"),
            Some(c) if c.kind == ErrorKind::Offline => info!("call short-circuited: offline"),
            Some(c) => warn!(kind = %c.kind, code = c.code, "call failed"),
        }
    }

    fn dispatch(&self, effects: Vec<SideEffect>) {
        let collaborators = &self.inner.collaborators;
        for effect in effects {
            match effect {
                SideEffect::InvalidateSession => {
                    info!("session invalidated after 401");
                    collaborators.auth.invalidate_session();
                }
                SideEffect::Toast(toast) => collaborators.toasts.show(toast),
                SideEffect::ShowOverlay(overlay) => collaborators.overlay.show(overlay),
                SideEffect::HideOverlay => {
                    self.inner.pending.store(None);
                    collaborators.overlay.hide();
                }
            }
        }
    }
}
