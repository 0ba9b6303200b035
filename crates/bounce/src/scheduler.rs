//! Pluggable timer primitives.
//!
//! A governor never touches the system clock or spawns timers on its own; it
//! asks its [`Scheduler`] for the current instant and for delayed callbacks.
//! [`TokioScheduler`] is the default. Tests substitute a virtual clock so
//! timing behaviour is fully deterministic.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{BounceError, Result};

/// Callback run once when a timer expires.
pub type TimerTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle identifying a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

/// Source of time and delayed execution for a governor.
///
/// # Contract
///
/// - `now` is monotonic and is the only clock the governor reads.
/// - `schedule` must never run `task` before returning. The governor calls it
///   while holding its own state lock.
/// - `cancel` on an unknown or already-fired id is a no-op.
pub trait Scheduler: Send + Sync + 'static {
    /// Current instant on this scheduler's clock.
    fn now(&self) -> Instant;

    /// Run `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId;

    /// Prevent a pending timer from running.
    fn cancel(&self, id: TimerId);
}

/// Scheduler backed by tokio timers.
///
/// Each timer is a spawned task sleeping on `tokio::time::sleep`; cancelling
/// aborts the task. Time is read from `tokio::time::Instant`, so a runtime with
/// paused time drives governors deterministically as well.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: Handle,
    timers: Arc<DashMap<TimerId, AbortHandle>>,
    next_id: Arc<AtomicU64>,
}

impl TokioScheduler {
    /// Create a scheduler spawning onto the given runtime.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            timers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Create a scheduler bound to the runtime the caller is running on.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| BounceError::NoRuntime)
    }

    /// Number of timers that have been scheduled and have neither fired nor
    /// been cancelled.
    pub fn outstanding(&self) -> usize {
        self.timers.len()
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let timers = Arc::clone(&self.timers);

        // The task waits until its abort handle is registered, so its own
        // removal below can never race ahead of the insert.
        let (registered, gate) = oneshot::channel::<()>();

        let join = self.handle.spawn(async move {
            if gate.await.is_err() {
                return;
            }
            tokio::time::sleep(delay).await;
            // Forget the handle before running so the task may re-arm freely.
            timers.remove(&id);
            task();
        });

        self.timers.insert(id, join.abort_handle());
        let _ = registered.send(());
        id
    }

    fn cancel(&self, id: TimerId) {
        if let Some((_, abort)) = self.timers.remove(&id) {
            abort.abort();
        }
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("outstanding", &self.timers.len())
            .finish()
    }
}
