//! Authentication state consumed by the network core.
//!
//! The core only reads a snapshot once per call and writes through
//! [`AuthStore::invalidate_session`] (or [`AuthStore::update_tokens`] after a
//! refresh). Who owns the session otherwise is up to the application.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

/// Point-in-time view of the session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthState {
    pub is_authenticated: bool,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl AuthState {
    /// An authenticated state carrying `access_token`.
    pub fn authenticated(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            is_authenticated: true,
            access_token: Some(access_token.into()),
            refresh_token,
        }
    }

    /// The token to attach to a request, present only while authenticated.
    pub fn bearer(&self) -> Option<&str> {
        if self.is_authenticated {
            self.access_token.as_deref()
        } else {
            None
        }
    }
}

impl std::fmt::Debug for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens never reach logs.
        f.debug_struct("AuthState")
            .field("is_authenticated", &self.is_authenticated)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Session collaborator injected into the network core.
#[cfg_attr(test, mockall::automock)]
pub trait AuthStore: Send + Sync {
    /// Read the current session.
    fn snapshot(&self) -> AuthState;

    /// Drop the session. Called unconditionally when the server reports 401
    /// for an authenticated call.
    fn invalidate_session(&self);

    /// Replace the tokens of the current session after a refresh.
    ///
    /// A no-op when no session exists: a refresh completing after an
    /// invalidation must not revive the session.
    fn update_tokens(&self, access_token: String, refresh_token: Option<String>);
}

/// In-memory [`AuthStore`] with lock-free snapshot reads.
///
/// Backed by [`ArcSwap`] so concurrent calls never block on the session while
/// login, refresh or invalidation swap in a new state.
#[derive(Clone, Debug)]
pub struct MemoryAuthStore {
    inner: Arc<ArcSwap<AuthState>>,
}

impl MemoryAuthStore {
    /// Create a store with no session.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(AuthState::default())),
        }
    }

    /// Start a session.
    pub fn login(&self, access_token: impl Into<String>, refresh_token: Option<String>) {
        self.inner
            .store(Arc::new(AuthState::authenticated(access_token, refresh_token)));
        info!("session started");
    }
}

impl Default for MemoryAuthStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthStore for MemoryAuthStore {
    fn snapshot(&self) -> AuthState {
        self.inner.load().as_ref().clone()
    }

    fn invalidate_session(&self) {
        self.inner.store(Arc::new(AuthState::default()));
        info!("session invalidated");
    }

    fn update_tokens(&self, access_token: String, refresh_token: Option<String>) {
        let mut applied = false;
        self.inner.rcu(|current| {
            let mut next = current.as_ref().clone();
            applied = next.is_authenticated;
            if applied {
                next.access_token = Some(access_token.clone());
                if refresh_token.is_some() {
                    next.refresh_token = refresh_token.clone();
                }
            }
            next
        });
        if applied {
            info!("session tokens refreshed");
        } else {
            warn!("token refresh dropped: no active session");
        }
    }
}
