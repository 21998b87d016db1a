//! Shutdown coordination for the proxy.
//!
//! The coordinator is a tri-state cell (`Serving → Draining → Stopped`)
//! shared by every request handler and by the listener lifecycle. Handlers
//! only ever read it; the single transition writer is `trigger_shutdown`
//! followed by the drain timer.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Process shutdown state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Accepting and proxying requests.
    Serving = 0,
    /// Rejecting new requests while in-flight ones finish.
    Draining = 1,
    /// Drain window elapsed; listeners may close.
    Stopped = 2,
}

impl From<u8> for ShutdownState {
    fn from(val: u8) -> Self {
        match val {
            0 => ShutdownState::Serving,
            1 => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }
}

impl std::fmt::Display for ShutdownState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ShutdownState::Serving => "serving",
            ShutdownState::Draining => "draining",
            ShutdownState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct Inner {
    state: AtomicU8,
    drain: Duration,
    deadline: OnceLock<Instant>,
    notify: watch::Sender<ShutdownState>,
}

impl Inner {
    fn stop(&self) {
        self.state.store(ShutdownState::Stopped as u8, Ordering::Release);
        self.notify.send_replace(ShutdownState::Stopped);
        tracing::info!("Drain window elapsed, shutdown state is now stopped");
    }
}

/// Coordinator for graceful shutdown.
///
/// Cheap to clone; all clones share one state cell.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

impl ShutdownCoordinator {
    /// Create a coordinator in the `Serving` state with the given drain window.
    pub fn new(drain: Duration) -> Self {
        let (notify, _) = watch::channel(ShutdownState::Serving);
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(ShutdownState::Serving as u8),
                drain,
                deadline: OnceLock::new(),
                notify,
            }),
        }
    }

    /// Current state. Never blocks.
    pub fn current_state(&self) -> ShutdownState {
        ShutdownState::from(self.inner.state.load(Ordering::Acquire))
    }

    pub fn is_serving(&self) -> bool {
        self.current_state() == ShutdownState::Serving
    }

    /// Configured drain window.
    pub fn drain_timeout(&self) -> Duration {
        self.inner.drain
    }

    /// Instant at which draining ends, once shutdown has been triggered.
    pub fn drain_deadline(&self) -> Option<Instant> {
        self.inner.deadline.get().copied()
    }

    /// Begin draining.
    ///
    /// Moves `Serving → Draining` and starts the drain timer, after which the
    /// state becomes `Stopped`. Returns `false` if shutdown was already
    /// triggered; draining cannot be cancelled or restarted.
    pub fn trigger_shutdown(&self) -> bool {
        if self
            .inner
            .state
            .compare_exchange(
                ShutdownState::Serving as u8,
                ShutdownState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            tracing::debug!("Shutdown already triggered");
            return false;
        }

        let drain = self.inner.drain;
        let deadline = Instant::now() + drain;
        let _ = self.inner.deadline.set(deadline);
        self.inner.notify.send_replace(ShutdownState::Draining);
        tracing::info!(drain_ms = drain.as_millis() as u64, "Shutdown triggered, draining");

        let inner = Arc::clone(&self.inner);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep_until(deadline.into()).await;
                    inner.stop();
                });
            }
            Err(_) => {
                std::thread::spawn(move || {
                    std::thread::sleep(drain);
                    inner.stop();
                });
            }
        }
        true
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
        self.inner.notify.subscribe()
    }

    /// Resolves once the state has left `Serving`.
    pub fn draining(&self) -> impl Future<Output = ()> + Send + 'static {
        self.wait_until(|state| *state != ShutdownState::Serving)
    }

    /// Resolves once the drain window has elapsed.
    pub fn stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        self.wait_until(|state| *state == ShutdownState::Stopped)
    }

    fn wait_until(
        &self,
        done: fn(&ShutdownState) -> bool,
    ) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.wait_for(done).await;
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
