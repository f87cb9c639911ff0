//! Active-run counting for bounded pools.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics::ACTIVE_RUNS;

#[derive(Debug, Default)]
struct CounterState {
    epoch: u64,
    count: usize,
    peak: usize,
}

#[derive(Debug)]
struct CounterInner {
    pool: &'static str,
    state: Mutex<CounterState>,
}

/// Number of runs a pool has in flight.
///
/// Slots are held through [`ActiveGuard`]s. [`ActiveCounter::reset`] zeroes
/// the count and starts a new epoch; guards from an older epoch release
/// nothing when dropped.
#[derive(Clone, Debug)]
pub struct ActiveCounter {
    inner: Arc<CounterInner>,
}

impl ActiveCounter {
    /// Create a counter labelled with its pool name.
    pub fn new(pool: &'static str) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                pool,
                state: Mutex::new(CounterState::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CounterState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn pool(&self) -> &'static str {
        self.inner.pool
    }

    /// Take a slot if fewer than `limit` are held.
    pub fn try_acquire(&self, limit: usize) -> Option<ActiveGuard> {
        let mut state = self.state();
        if state.count >= limit {
            return None;
        }
        state.count += 1;
        state.peak = state.peak.max(state.count);
        ACTIVE_RUNS
            .with_label_values(&[self.inner.pool])
            .set(state.count as i64);

        Some(ActiveGuard {
            counter: self.clone(),
            epoch: state.epoch,
        })
    }

    /// Slots currently held.
    pub fn get(&self) -> usize {
        self.state().count
    }

    /// Highest count observed since creation.
    pub fn peak(&self) -> usize {
        self.state().peak
    }

    /// Zero the count and invalidate every outstanding guard.
    pub fn reset(&self) {
        let mut state = self.state();
        state.epoch += 1;
        state.count = 0;
        ACTIVE_RUNS.with_label_values(&[self.inner.pool]).set(0);
    }

    fn release(&self, epoch: u64) {
        let mut state = self.state();
        if state.epoch == epoch {
            state.count = state.count.saturating_sub(1);
            ACTIVE_RUNS
                .with_label_values(&[self.inner.pool])
                .set(state.count as i64);
        }
    }
}

/// One held slot; dropping it frees the slot.
#[derive(Debug)]
pub struct ActiveGuard {
    counter: ActiveCounter,
    epoch: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.release(self.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_respects_limit() {
        let counter = ActiveCounter::new("test");
        let a = counter.try_acquire(2).unwrap();
        let _b = counter.try_acquire(2).unwrap();
        assert!(counter.try_acquire(2).is_none());
        assert_eq!(counter.get(), 2);

        drop(a);
        assert_eq!(counter.get(), 1);
        assert!(counter.try_acquire(2).is_some());
        assert_eq!(counter.peak(), 2);
    }

    #[test]
    fn test_reset_ignores_stale_guards() {
        let counter = ActiveCounter::new("test");
        let stale = counter.try_acquire(5).unwrap();
        counter.reset();
        assert_eq!(counter.get(), 0);

        let fresh = counter.try_acquire(5).unwrap();
        drop(stale);
        assert_eq!(counter.get(), 1);
        drop(fresh);
        assert_eq!(counter.get(), 0);
    }
}
