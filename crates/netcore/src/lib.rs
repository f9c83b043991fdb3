//! `netcore`: encrypted request/response plumbing between an application and its backend.
//!
//! Call flow:
//! 1. [`NetworkManager::call`] looks the operation up in the [`EndpointRegistry`].
//! 2. The [`RequestBuilder`] encrypts params and body into a [`RequestEnvelope`].
//! 3. The [`ConnectivityMonitor`] gates the call; offline calls never reach the wire.
//! 4. A [`Transport`] performs the exchange.
//! 5. The [`ResponseResolver`] decrypts and normalises the outcome into a
//!    [`NetworkResponse`] and lists the side effects (session invalidation,
//!    toasts, overlay) the manager dispatches.
//!
//! [`QueryClient`] adds caching and retries on top; [`Services`] is the typed facade.

pub mod auth;
pub mod config;
pub mod connectivity;
pub mod crypto;
pub mod endpoints;
pub mod manager;
pub mod notify;
pub mod query;
pub mod request;
pub mod resolver;
pub mod services;
pub mod transport;

pub use auth::{AuthState, AuthStore, MemoryAuthStore};
pub use common::{ErrorClassification, ErrorKind, NetworkResponse, ParseError};
pub use config::ClientConfig;
pub use connectivity::{poll_task, ConnectivityMonitor, ConnectivityProvider, TcpProbe};
pub use crypto::{CipherCodec, CipherError};
pub use endpoints::{EndpointDescriptor, EndpointRegistry, HttpMethod};
pub use manager::{ApiRequest, ClientError, Collaborators, HeldCall, NetworkManager};
pub use notify::{ErrorOverlay, Toast, ToastKind, UiEvent, UiEventChannel};
pub use query::{Fetcher, MutationOptions, NetworkMode, QueryClient, QueryDefaults, QueryKey, QueryOptions, RetryPolicy};
pub use request::{Attachment, RequestBuilder, RequestEnvelope};
pub use resolver::{CallOptions, ResponseResolver, SideEffect};
pub use services::Services;
pub use transport::{HttpTransport, RawResponse, Transport, TransportError};
