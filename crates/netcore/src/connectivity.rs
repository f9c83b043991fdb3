//! Connectivity monitor: a lock-free, eventually consistent online flag.
//!
//! # Lifecycle
//!
//! 1. The monitor starts with an assumed state (usually online).
//! 2. Updates are pushed by a platform subscription ([`ConnectivityMonitor::follow`])
//!    or produced by polling a [`ConnectivityProvider`] ([`poll_task`]).
//! 3. [`ConnectivityMonitor::is_online`] is a single atomic load: it never
//!    blocks and always returns the last known value.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::{net::TcpStream, sync::watch, task::JoinHandle, time};
use tracing::{debug, info};

/// Shared online/offline flag. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ConnectivityMonitor {
    online: Arc<AtomicBool>,
    changes: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self {
            online: Arc::new(AtomicBool::new(initially_online)),
            changes: Arc::new(tx),
        }
    }

    /// Last known state.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Record a new state. Transitions are logged and broadcast.
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::AcqRel);
        if previous != online {
            info!(online, "connectivity changed");
            self.changes.send_replace(online);
        }
    }

    /// Receiver notified on every transition.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.changes.subscribe()
    }

    /// Mirror a platform reachability subscription into this monitor.
    ///
    /// The task lives until the sending side is dropped.
    pub fn follow(&self, mut updates: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            monitor.set_online(*updates.borrow_and_update());
            while updates.changed().await.is_ok() {
                let online = *updates.borrow_and_update();
                monitor.set_online(online);
            }
            debug!("connectivity subscription closed");
        })
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Source of reachability checks.
pub trait ConnectivityProvider: Send + Sync + 'static {
    fn check(&self) -> impl Future<Output = bool> + Send;
}

/// Reachability check that opens a TCP connection to a known address.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// `addr` is `host:port`; DNS resolution is part of the check.
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl ConnectivityProvider for TcpProbe {
    async fn check(&self) -> bool {
        matches!(
            time::timeout(self.timeout, TcpStream::connect(self.addr.as_str())).await,
            Ok(Ok(_))
        )
    }
}

/// Spawn a background task that polls `provider` every `interval`.
///
/// The first check runs immediately so the flag reflects reality at startup.
pub fn poll_task<P: ConnectivityProvider>(
    provider: P,
    monitor: ConnectivityMonitor,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = provider.check().await;
            monitor.set_online(online);
        }
    })
}
