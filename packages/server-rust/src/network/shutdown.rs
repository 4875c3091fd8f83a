//! Per-server lifecycle state with in-flight request tracking.
//!
//! Uses `ArcSwap` for lock-free state transitions, a watch channel for the
//! drain signal, a second watch channel for the single-fire readiness report,
//! and an atomic counter with RAII guards for in-flight requests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of one listening server.
///
/// State machine: Created -> Listening -> Draining -> Stopped, with
/// Created -> Stopped when the socket cannot be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, socket not yet bound.
    Created,
    /// Socket bound; accepting connections.
    Listening(SocketAddr),
    /// No new connections; in-flight requests finishing.
    Draining,
    /// Socket closed.
    Stopped,
}

impl ServerState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Listening(_) => "listening",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// The socket could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to bind {address}: {message}")]
pub struct BindError {
    pub address: String,
    pub kind: std::io::ErrorKind,
    pub message: String,
}

impl BindError {
    #[must_use]
    pub fn new(address: impl Into<String>, err: &std::io::Error) -> Self {
        Self {
            address: address.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Readiness {
    Pending,
    Ready(SocketAddr),
    Failed(BindError),
}

/// Coordinates one server's bind report, drain signal, and in-flight work.
///
/// 1. The serve task reports `mark_listening()` or `mark_bind_failed()`
/// 2. Boot code awaits `ready()` for that report
/// 3. `trigger_shutdown()` moves to Draining and wakes `wait_for_shutdown()`
/// 4. `cancel_requests()` fires every request token when draining overruns
#[derive(Debug)]
pub struct ShutdownController {
    shutdown_signal: watch::Sender<bool>,
    readiness: watch::Sender<Readiness>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<ServerState>,
    requests: CancellationToken,
}

impl ShutdownController {
    /// Creates a controller in the `Created` state.
    #[must_use]
    pub fn new() -> Self {
        let (shutdown_signal, _) = watch::channel(false);
        let (readiness, _) = watch::channel(Readiness::Pending);
        Self {
            shutdown_signal,
            readiness,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(ServerState::Created),
            requests: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        **self.state.load()
    }

    /// Records a successful bind and fires the readiness report.
    pub fn mark_listening(&self, addr: SocketAddr) {
        self.state.store(Arc::new(ServerState::Listening(addr)));
        self.readiness.send_replace(Readiness::Ready(addr));
    }

    /// Records a failed bind: the server goes straight to `Stopped`.
    pub fn mark_bind_failed(&self, err: BindError) {
        self.state.store(Arc::new(ServerState::Stopped));
        self.readiness.send_replace(Readiness::Failed(err));
    }

    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(ServerState::Stopped));
    }

    /// Waits for the bind report.
    ///
    /// # Errors
    ///
    /// Returns the [`BindError`] when binding failed.
    pub async fn ready(&self) -> Result<SocketAddr, BindError> {
        let mut rx = self.readiness.subscribe();
        let report = match rx.wait_for(|r| *r != Readiness::Pending).await {
            Ok(report) => report.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => Readiness::Pending,
        };
        match report {
            Readiness::Ready(addr) => Ok(addr),
            Readiness::Failed(err) => Err(err),
            Readiness::Pending => Err(BindError {
                address: String::new(),
                kind: std::io::ErrorKind::Other,
                message: "server dropped before binding".to_string(),
            }),
        }
    }

    /// Stops accepting new work.
    ///
    /// Transitions a listening server to `Draining` and signals all waiters.
    pub fn trigger_shutdown(&self) {
        if matches!(self.state(), ServerState::Listening(_)) {
            self.state.store(Arc::new(ServerState::Draining));
        }
        self.shutdown_signal.send_replace(true);
    }

    /// Resolves once `trigger_shutdown()` has been called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_signal.subscribe();
        // The sender lives in `self`, so the only error is unreachable.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_signal.borrow()
    }

    /// Token for one request; fires when draining is abandoned.
    #[must_use]
    pub fn request_token(&self) -> CancellationToken {
        self.requests.child_token()
    }

    /// Cancels every outstanding request token.
    pub fn cancel_requests(&self) {
        self.requests.cancel();
    }

    /// Creates an RAII guard that tracks an in-flight request.
    ///
    /// The in-flight counter is incremented on creation and decremented
    /// when the guard is dropped, even if the handler panics.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that decrements the in-flight counter when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
