//! Process-wide stop signal shared by both schedulers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::CancellationConfig;

use super::{ActiveCounter, ConnectionRegistry};

#[derive(Debug)]
struct ControllerInner {
    root: Mutex<CancellationToken>,
    registry: ConnectionRegistry,
    counters: Mutex<Vec<ActiveCounter>>,
    reset_delay: Duration,
    /// Bumped on every stop; a pending auto-reset only applies to its own stop.
    stop_generation: AtomicU64,
}

impl ControllerInner {
    fn root(&self) -> MutexGuard<'_, CancellationToken> {
        self.root.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_if_generation(&self, generation: u64) {
        if self.stop_generation.load(Ordering::SeqCst) != generation {
            return;
        }
        let mut root = self.root();
        if root.is_cancelled() {
            *root = CancellationToken::new();
            info!("Cancellation reset, new runs may start");
        }
    }
}

/// Owner of the stop flag, the connection table and the pools' active counts.
///
/// Runs capture [`CancellationController::token`] when they start. `stop()`
/// cancels that token, so a stopped run stays stopped even after the
/// controller resets for the next run.
#[derive(Clone, Debug)]
pub struct CancellationController {
    inner: Arc<ControllerInner>,
}

impl CancellationController {
    pub fn new(reset_delay: Duration) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                root: Mutex::new(CancellationToken::new()),
                registry: ConnectionRegistry::new(),
                counters: Mutex::new(Vec::new()),
                reset_delay,
                stop_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn from_config(config: &CancellationConfig) -> Self {
        Self::new(config.reset_delay())
    }

    /// The current cancellation scope.
    pub fn token(&self) -> CancellationToken {
        self.inner.root().clone()
    }

    /// Whether a stop is in effect and has not been reset yet.
    pub fn is_stopped(&self) -> bool {
        self.inner.root().is_cancelled()
    }

    /// The shared connection table.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    /// Track a pool's active counter so `stop()` can zero it.
    pub fn register_counter(&self, counter: ActiveCounter) {
        self.inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(counter);
    }

    /// Stop all work.
    ///
    /// Cancels the current scope, which closes every open stream, drops
    /// every in-flight request and clears every per-run timer. Empties the
    /// connection table and zeroes the active counts, then schedules an
    /// automatic reset. Calling it while idle is harmless.
    pub fn stop(&self) {
        let generation = self.inner.stop_generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.inner.root().cancel();
        let closed = self.inner.registry.close_all();

        let counters = self
            .inner
            .counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for counter in &counters {
            counter.reset();
        }

        if !closed.is_empty() {
            debug!(items = ?closed, "Closed in-flight connections");
        }
        info!(
            "Stop requested: closed {} connections, reset {} pools",
            closed.len(),
            counters.len()
        );

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let delay = self.inner.reset_delay;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.reset_if_generation(generation);
                });
            }
            Err(_) => {
                debug!("No runtime for delayed reset, resetting immediately");
                self.inner.reset_if_generation(generation);
            }
        }
    }

    /// Accept new runs immediately, without waiting for the auto-reset.
    pub fn reset(&self) {
        let generation = self.inner.stop_generation.load(Ordering::SeqCst);
        self.inner.reset_if_generation(generation);
    }
}

impl Default for CancellationController {
    fn default() -> Self {
        Self::from_config(&CancellationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stop_cancels_scope_and_connections() {
        let controller = CancellationController::new(Duration::from_millis(50));
        let scope = controller.token();
        let handle = controller.registry().register("doc-1", &scope).unwrap();

        controller.stop();

        assert!(controller.is_stopped());
        assert!(scope.is_cancelled());
        assert!(handle.is_closed());
        assert!(controller.registry().is_empty());
    }

    #[tokio::test]
    async fn test_stop_resets_counters() {
        let controller = CancellationController::new(Duration::from_millis(50));
        let counter = ActiveCounter::new("test");
        controller.register_counter(counter.clone());
        let _guard = counter.try_acquire(3).unwrap();

        controller.stop();
        assert_eq!(counter.get(), 0);
    }

    #[tokio::test]
    async fn test_auto_reset_installs_fresh_scope() {
        let controller = CancellationController::new(Duration::from_millis(20));
        let old_scope = controller.token();
        controller.stop();

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!controller.is_stopped());
        assert!(old_scope.is_cancelled());
        assert!(!controller.token().is_cancelled());
    }

    #[tokio::test]
    async fn test_later_stop_extends_reset() {
        let controller = CancellationController::new(Duration::from_millis(60));
        controller.stop();
        tokio::time::sleep(Duration::from_millis(40)).await;
        controller.stop();
        tokio::time::sleep(Duration::from_millis(40)).await;

        // The first reset was superseded by the second stop.
        assert!(controller.is_stopped());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!controller.is_stopped());
    }

    #[test]
    fn test_stop_when_idle_without_runtime() {
        let controller = CancellationController::default();
        controller.stop();
        assert!(!controller.is_stopped());
    }
}
