//! Testing utilities for the bounce governor.
//!
//! - [`ManualScheduler`]: a virtual clock that only moves when told to, so
//!   timer-driven resolutions happen at exact, reproducible instants.
//! - [`Recorder`]: an action that captures every [`Resolution`] together with
//!   the virtual time it fired at.
//!
//! ```ignore
//! let clock = ManualScheduler::new();
//! let recorder = Recorder::new(&clock);
//! let governor = Governor::builder(Duration::from_millis(100))
//!     .scheduler(clock.shared())
//!     .build(recorder.action())?;
//!
//! governor.trigger(1);
//! clock.advance(Duration::from_millis(100));
//! assert_eq!(recorder.len(), 1);
//! ```

use bounce_core::{Resolution, Scheduler, TimerId, TimerTask};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::trace;

// ============================================================================
// ManualScheduler
// ============================================================================

/// Deterministic scheduler driven by [`advance`](Self::advance).
///
/// Timers due at the same instant run in the order they were scheduled.
/// Tasks run without the scheduler's lock held, so they may schedule or
/// cancel further timers.
#[derive(Clone)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ClockState>>,
}

struct ClockState {
    origin: Instant,
    elapsed: Duration,
    next_id: u64,
    pending: BTreeMap<(Duration, TimerId), TimerTask>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::with_origin(Instant::now())
    }

    /// Create a clock whose virtual time zero is `origin`.
    pub fn with_origin(origin: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockState {
                origin,
                elapsed: Duration::ZERO,
                next_id: 1,
                pending: BTreeMap::new(),
            })),
        }
    }

    /// This clock as a scheduler handle for
    /// [`GovernorBuilder::scheduler`](bounce_core::GovernorBuilder::scheduler).
    pub fn shared(&self) -> Arc<dyn Scheduler> {
        Arc::new(self.clone())
    }

    /// Virtual time elapsed since the origin.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Number of timers waiting to fire.
    pub fn outstanding(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward by `by`, running every timer that falls due.
    ///
    /// The clock sits at each timer's due time while that timer runs.
    pub fn advance(&self, by: Duration) {
        let target = self.elapsed() + by;
        self.advance_to(target);
    }

    /// Move the clock forward to `target` (relative to the origin).
    pub fn advance_to(&self, target: Duration) {
        loop {
            let task = {
                let mut state = self.lock();
                let due = state
                    .pending
                    .first_key_value()
                    .map(|(key, _)| *key)
                    .filter(|(at, _)| *at <= target);
                match due {
                    Some(key) => {
                        state.elapsed = state.elapsed.max(key.0);
                        state.pending.remove(&key).map(|task| (key, task))
                    }
                    None => None,
                }
            };

            match task {
                Some(((at, id), task)) => {
                    trace!(%id, at_ms = at.as_millis() as u64, "manual timer fired");
                    task();
                }
                None => break,
            }
        }

        let mut state = self.lock();
        state.elapsed = state.elapsed.max(target);
    }

    fn lock(&self) -> MutexGuard<'_, ClockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        let state = self.lock();
        state.origin + state.elapsed
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let mut state = self.lock();
        let id = TimerId::new(state.next_id);
        state.next_id += 1;
        let due = state.elapsed + delay;
        state.pending.insert((due, id), task);
        id
    }

    fn cancel(&self, id: TimerId) {
        self.lock().pending.retain(|(_, pending), _| *pending != id);
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// A resolution and the virtual time it was delivered at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired<A> {
    pub at: Duration,
    pub resolution: Resolution<A>,
}

/// Collects resolutions delivered to its [`action`](Self::action).
pub struct Recorder<A> {
    clock: ManualScheduler,
    fired: Arc<Mutex<Vec<Fired<A>>>>,
}

impl<A> Clone for Recorder<A> {
    fn clone(&self) -> Self {
        Self {
            clock: self.clock.clone(),
            fired: Arc::clone(&self.fired),
        }
    }
}

impl<A: Clone + Send + 'static> Recorder<A> {
    pub fn new(clock: &ManualScheduler) -> Self {
        Self {
            clock: clock.clone(),
            fired: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An action closure that records into this recorder.
    pub fn action(&self) -> impl Fn(Resolution<A>) + Send + Sync + 'static {
        let recorder = self.clone();
        move |resolution| recorder.record(resolution)
    }

    pub fn record(&self, resolution: Resolution<A>) {
        let at = self.clock.elapsed();
        self.lock().push(Fired { at, resolution });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Everything recorded so far.
    pub fn fired(&self) -> Vec<Fired<A>> {
        self.lock().clone()
    }

    pub fn last(&self) -> Option<Fired<A>> {
        self.lock().last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Fired<A>>> {
        self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
