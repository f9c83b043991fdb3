//! Fire-and-forget UI notifications emitted by the network core.
//!
//! Toasts and the error overlay are owned by the UI layer. The core only
//! pushes messages at it; no call ever waits on a notification.

use tokio::sync::mpsc;
use tracing::debug;

use crate::request::RequestEnvelope;

/// Default on-screen time of a toast.
pub const TOAST_DURATION_MS: u64 = 3000;

/// Severity of a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    Error,
    Success,
    Warn,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub message: String,
    pub duration_ms: u64,
}

impl Toast {
    /// An error toast with the default duration.
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            title: title.into(),
            message: message.into(),
            duration_ms: TOAST_DURATION_MS,
        }
    }

    /// The toast shown when a session is dropped after a 401.
    pub fn session_expired() -> Self {
        Self::error("Session Expired", "You've been logged out. Please login again.")
    }
}

/// Full-screen error prompt, optionally carrying the request to resend.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorOverlay {
    pub title: String,
    pub message: String,
    pub button_label: String,
    pub retry_envelope: Option<RequestEnvelope>,
}

impl ErrorOverlay {
    /// The prompt shown for a call attempted while offline.
    pub fn offline(retry_envelope: RequestEnvelope) -> Self {
        Self {
            title: "Oops!".into(),
            message: "It seems your internet connection is off. Please check your connection and try again!"
                .into(),
            button_label: "Try again".into(),
            retry_envelope: Some(retry_envelope),
        }
    }
}

/// Toast sink. Implementations must return without blocking.
#[cfg_attr(test, mockall::automock)]
pub trait ToastChannel: Send + Sync {
    fn show(&self, toast: Toast);
}

/// Error overlay sink. Implementations must return without blocking.
#[cfg_attr(test, mockall::automock)]
pub trait ErrorOverlayChannel: Send + Sync {
    fn show(&self, overlay: ErrorOverlay);
    fn hide(&self);
}

/// A notification as delivered to the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    Toast(Toast),
    ShowOverlay(ErrorOverlay),
    HideOverlay,
}

/// Channel-backed implementation of both sinks.
///
/// Sends on an unbounded queue, so dispatch never waits. Events sent after
/// the receiver is dropped are discarded.
#[derive(Debug, Clone)]
pub struct UiEventChannel {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl UiEventChannel {
    /// Create a channel and the receiver the UI layer drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            debug!("ui event receiver dropped; notification discarded");
        }
    }
}

impl ToastChannel for UiEventChannel {
    fn show(&self, toast: Toast) {
        self.send(UiEvent::Toast(toast));
    }
}

impl ErrorOverlayChannel for UiEventChannel {
    fn show(&self, overlay: ErrorOverlay) {
        self.send(UiEvent::ShowOverlay(overlay));
    }

    fn hide(&self) {
        self.send(UiEvent::HideOverlay);
    }
}
