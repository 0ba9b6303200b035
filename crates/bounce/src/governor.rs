//! The governor state machine.
//!
//! ```text
//! trigger(args) ──► record on chain ──► control hook ──► feed throttle ──► arm max delay
//!                                           │                 │                 │
//!                                       bounce()        same instant       timer expiry
//!                                           │                 │                 │
//!                                           ▼                 ▼                 ▼
//!                                  decide(trigger) ──► settle: action(Resolution) ──► reset
//! ```
//!
//! All state lives behind one mutex. User callbacks (the action and the
//! control hook) are always invoked with that lock released, so they may call
//! back into the governor.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::chain::{Bouncer, Chain, ChainControl, ChainId, Resolution, Trigger};
use crate::config::GovernorConfig;
use crate::error::Result;
use crate::scheduler::{Scheduler, TimerId, TokioScheduler};

type Action<A> = Box<dyn Fn(Resolution<A>) + Send + Sync>;
type ControlHook<A> = Box<dyn Fn(&mut Chain<A>) + Send + Sync>;

/// A combined throttle-and-debounce event governor.
///
/// Feed events with [`trigger`](Self::trigger). Events accumulate in a chain
/// until one of these happens first:
///
/// - nothing arrives for the throttle wait ([`Trigger::Throttle`]),
/// - the max delay expires, measured from the chain's first event ([`Trigger::Debounce`]),
/// - the control hook bounces the chain ([`Trigger::Control`]),
/// - [`bounce`](Self::bounce) is called ([`Trigger::Global`]).
///
/// The action then receives a [`Resolution`] and a fresh chain begins.
///
/// Each accepted event pushes the quiet-period deadline out to `now +
/// throttle_wait`. An event arriving at the very instant the deadline was last
/// pushed out (no clock progress at all) resolves the chain on the spot with
/// [`Trigger::Throttle`].
///
/// `Governor` is a cheap handle; clones drive the same state. When the last
/// handle is dropped, outstanding timers are cancelled.
pub struct Governor<A> {
    shared: Arc<Shared<A>>,
}

impl<A> Clone for Governor<A> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<A: Send + 'static> Governor<A> {
    /// Start building a governor with the given throttle wait.
    pub fn builder(throttle_wait: Duration) -> GovernorBuilder<A> {
        GovernorBuilder::new(throttle_wait)
    }

    /// Feed one event into the current chain.
    ///
    /// Ignored entirely while the governor is cancelled. May resolve the chain
    /// synchronously, in which case the action has run before this returns.
    ///
    /// While the control hook runs it holds the live chain; any event fed in
    /// meanwhile, whether from the hook itself or from another thread, is
    /// dropped.
    pub fn trigger(&self, arguments: A) {
        self.shared.accept(arguments);
    }

    /// Drop the current chain without firing and ignore events until
    /// [`resume`](Self::resume). Returns `false` if already cancelled.
    pub fn cancel(&self) -> bool {
        let mut state = self.shared.lock();
        if state.cancelled {
            return false;
        }
        state.cancelled = true;
        debug!(chain_id = %state.chain_id, call_count = state.call_count(), "governor cancelled");
        self.shared.reset(&mut state);
        true
    }

    /// Accept events again after [`cancel`](Self::cancel). Returns `false` if
    /// the governor was not cancelled.
    pub fn resume(&self) -> bool {
        let mut state = self.shared.lock();
        if !state.cancelled {
            return false;
        }
        state.cancelled = false;
        debug!(chain_id = %state.chain_id, "governor resumed");
        true
    }

    /// Resolve the current chain now with [`Trigger::Global`].
    ///
    /// Without `force` this only acts when the chain has accepted at least one
    /// event. Returns `true` if this call decided the resolution.
    pub fn bounce(&self, force: bool) -> bool {
        let mut state = self.shared.lock();
        if !force && !state.got_event {
            return false;
        }
        if !self.shared.decide(&mut state, Trigger::Global) {
            return false;
        }
        self.shared.settle(state);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }

    /// Whether the current chain's resolution has been decided but the chain
    /// has not been replaced yet.
    pub fn is_resolving(&self) -> bool {
        !matches!(self.shared.lock().phase, Phase::Accumulating)
    }

    /// Events accepted by the live chain so far.
    pub fn call_count(&self) -> u64 {
        self.shared.lock().call_count()
    }

    pub fn chain_id(&self) -> ChainId {
        self.shared.lock().chain_id
    }
}

impl<A> fmt::Debug for Governor<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Governor")
            .field("throttle_wait", &self.shared.throttle_wait)
            .field("max_delay", &self.shared.max_delay)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Governor`].
///
/// ```no_run
/// use bounce_core::Governor;
/// use std::time::Duration;
///
/// # async fn demo() -> bounce_core::Result<()> {
/// let governor = Governor::builder(Duration::from_millis(100))
///     .max_delay(Duration::from_millis(500))
///     .control(|chain: &mut bounce_core::Chain<String>| {
///         if chain.call_count() >= 10 {
///             chain.bounce();
///         }
///     })
///     .build(|resolution| println!("{} events ({})", resolution.call_count, resolution.trigger))?;
///
/// governor.trigger("hello".to_string());
/// # Ok(())
/// # }
/// ```
pub struct GovernorBuilder<A> {
    throttle_wait: Duration,
    max_delay: Option<Duration>,
    control: Option<ControlHook<A>>,
    scheduler: Option<Arc<dyn Scheduler>>,
}

impl<A: Send + 'static> GovernorBuilder<A> {
    pub fn new(throttle_wait: Duration) -> Self {
        Self {
            throttle_wait,
            max_delay: None,
            control: None,
            scheduler: None,
        }
    }

    pub fn from_config(config: GovernorConfig) -> Self {
        Self {
            max_delay: config.max_delay(),
            ..Self::new(config.throttle_wait())
        }
    }

    /// Cap the time from a chain's first event to its resolution.
    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Install a control hook, run synchronously on every accepted event.
    ///
    /// Keep it lightweight: it delays every `trigger` call.
    pub fn control<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Chain<A>) + Send + Sync + 'static,
    {
        self.control = Some(Box::new(hook));
        self
    }

    /// Use a specific scheduler instead of the current tokio runtime.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Build the governor around `action`.
    pub fn build<F>(self, action: F) -> Result<Governor<A>>
    where
        F: Fn(Resolution<A>) + Send + Sync + 'static,
    {
        let scheduler = match self.scheduler {
            Some(scheduler) => scheduler,
            None => Arc::new(TokioScheduler::current()?),
        };
        let control = self.control;
        let throttle_wait = self.throttle_wait;
        let max_delay = self.max_delay;

        let shared = Arc::new_cyclic(|this: &Weak<Shared<A>>| {
            let chain_id = ChainId::new();
            let chain = Chain::new(chain_id, Bouncer::new(chain_id, shared_control(this)));
            Shared {
                this: this.clone(),
                throttle_wait,
                max_delay,
                action: Box::new(action),
                control,
                scheduler,
                state: Mutex::new(State::new(chain)),
            }
        });

        Ok(Governor { shared })
    }

    /// Build a governor whose resolutions are delivered on a channel.
    pub fn build_channel(self) -> Result<(Governor<A>, mpsc::UnboundedReceiver<Resolution<A>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let governor = self.build(move |resolution| {
            if tx.send(resolution).is_err() {
                trace!("resolution receiver dropped");
            }
        })?;
        Ok((governor, rx))
    }
}

fn shared_control<A: Send + 'static>(this: &Weak<Shared<A>>) -> Weak<dyn ChainControl> {
    this.clone()
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Accumulating,
    /// Resolution decided; the action has not started yet.
    Decided(Trigger),
    /// The action is running.
    Firing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Throttle,
    MaxDelay,
}

/// An outstanding timer, tagged so a late firing can be recognised.
#[derive(Debug, Clone, Copy)]
struct Armed {
    token: u64,
    id: TimerId,
}

struct State<A> {
    /// `None` while the control hook holds the chain.
    chain: Option<Chain<A>>,
    chain_id: ChainId,
    phase: Phase,
    cancelled: bool,
    got_event: bool,
    throttle_deadline: Option<Instant>,
    throttle_timer: Option<Armed>,
    max_delay_timer: Option<Armed>,
    next_token: u64,
}

impl<A> State<A> {
    fn new(chain: Chain<A>) -> Self {
        Self {
            chain_id: chain.id(),
            chain: Some(chain),
            phase: Phase::Accumulating,
            cancelled: false,
            got_event: false,
            throttle_deadline: None,
            throttle_timer: None,
            max_delay_timer: None,
            next_token: 0,
        }
    }

    fn call_count(&self) -> u64 {
        self.chain.as_ref().map_or(0, Chain::call_count)
    }

    fn timer_slot(&mut self, kind: TimerKind) -> &mut Option<Armed> {
        match kind {
            TimerKind::Throttle => &mut self.throttle_timer,
            TimerKind::MaxDelay => &mut self.max_delay_timer,
        }
    }
}

struct Shared<A> {
    this: Weak<Shared<A>>,
    throttle_wait: Duration,
    max_delay: Option<Duration>,
    action: Action<A>,
    control: Option<ControlHook<A>>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<State<A>>,
}

impl<A: Send + 'static> Shared<A> {
    fn lock(&self) -> MutexGuard<'_, State<A>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin a new chain, discarding the current one and its timers.
    fn reset(&self, state: &mut State<A>) {
        for kind in [TimerKind::Throttle, TimerKind::MaxDelay] {
            if let Some(armed) = state.timer_slot(kind).take() {
                self.scheduler.cancel(armed.id);
            }
        }
        state.throttle_deadline = None;
        state.phase = Phase::Accumulating;
        state.got_event = false;

        let chain_id = ChainId::new();
        let bouncer = Bouncer::new(chain_id, shared_control(&self.this));
        state.chain_id = chain_id;
        state.chain = Some(Chain::new(chain_id, bouncer));
        trace!(%chain_id, "new chain");
    }

    fn accept(&self, arguments: A) {
        let mut state = self.lock();
        if state.cancelled {
            trace!("event ignored: governor cancelled");
            return;
        }
        match state.chain.as_mut() {
            Some(chain) => chain.record(arguments),
            None => {
                debug!(chain_id = %state.chain_id, "event dropped: control hook is running");
                return;
            }
        }
        state.got_event = true;

        if let Some(control) = &self.control {
            state = match self.run_control(state, control) {
                Some(state) => state,
                None => return,
            };
            if let Phase::Decided(_) = state.phase {
                self.settle(state);
                return;
            }
        }

        if state.phase != Phase::Accumulating {
            // The action is running; this event closes with its chain.
            return;
        }

        self.feed_throttle(&mut state);
        if let Phase::Decided(_) = state.phase {
            self.settle(state);
            return;
        }

        if let Some(max_delay) = self.max_delay {
            if state.max_delay_timer.is_none() {
                self.arm(&mut state, TimerKind::MaxDelay, max_delay);
            }
        }
    }

    /// Lend the chain to the control hook. Returns the re-acquired lock, or
    /// `None` if the chain was replaced while the hook ran.
    fn run_control<'a>(
        &'a self,
        mut state: MutexGuard<'a, State<A>>,
        control: &ControlHook<A>,
    ) -> Option<MutexGuard<'a, State<A>>> {
        let mut chain = state.chain.take()?;
        let chain_id = chain.id();
        drop(state);

        let guard = ChainReset::new(self, chain_id);
        control(&mut chain);
        guard.disarm();

        let mut state = self.lock();
        if state.chain_id != chain_id || state.chain.is_some() {
            trace!(%chain_id, "chain replaced while control hook ran");
            return None;
        }
        state.chain = Some(chain);
        Some(state)
    }

    fn feed_throttle(&self, state: &mut State<A>) {
        let now = self.scheduler.now();
        let horizon = now + self.throttle_wait;

        match state.throttle_deadline {
            None => {
                state.throttle_deadline = Some(horizon);
                self.arm(state, TimerKind::Throttle, self.throttle_wait);
            }
            Some(deadline) if horizon <= deadline => {
                // No time has passed since the deadline was last pushed out.
                self.decide(state, Trigger::Throttle);
            }
            Some(_) => {
                // Absorb the overtime; the running timer re-arms on expiry.
                state.throttle_deadline = Some(horizon);
                if state.throttle_timer.is_none() {
                    self.arm(state, TimerKind::Throttle, self.throttle_wait);
                }
            }
        }
    }

    fn arm(&self, state: &mut State<A>, kind: TimerKind, delay: Duration) {
        let token = state.next_token;
        state.next_token += 1;

        let this = self.this.clone();
        let id = self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(shared) = this.upgrade() {
                    shared.on_timer(kind, token);
                }
            }),
        );
        if let Some(previous) = state.timer_slot(kind).replace(Armed { token, id }) {
            self.scheduler.cancel(previous.id);
        }
    }

    fn on_timer(&self, kind: TimerKind, token: u64) {
        let mut state = self.lock();
        let outstanding = *state.timer_slot(kind);
        match outstanding {
            Some(armed) if armed.token == token => {
                *state.timer_slot(kind) = None;
            }
            _ => {
                trace!(?kind, "superseded timer fired");
                return;
            }
        }
        if state.phase != Phase::Accumulating {
            return;
        }

        let decided = match kind {
            TimerKind::MaxDelay => self.decide(&mut state, Trigger::Debounce),
            TimerKind::Throttle => {
                let now = self.scheduler.now();
                let remaining = state
                    .throttle_deadline
                    .map_or(Duration::ZERO, |deadline| deadline.saturating_duration_since(now));
                if remaining.is_zero() {
                    self.decide(&mut state, Trigger::Throttle)
                } else {
                    // Fired early, or the deadline moved since arming.
                    self.arm(&mut state, TimerKind::Throttle, remaining);
                    false
                }
            }
        };
        if decided {
            self.settle(state);
        }
    }

    /// Commit the current chain to resolving with `trigger`. Only the first
    /// decision per chain wins.
    fn decide(&self, state: &mut State<A>, trigger: Trigger) -> bool {
        if state.cancelled || state.phase != Phase::Accumulating {
            return false;
        }
        state.phase = Phase::Decided(trigger);
        debug!(chain_id = %state.chain_id, %trigger, call_count = state.call_count(), "chain resolving");
        true
    }

    /// Fire the action for a decided chain, then begin the next chain.
    ///
    /// Does nothing while the control hook holds the chain; the hook's caller
    /// settles once the chain is back.
    fn settle(&self, mut state: MutexGuard<'_, State<A>>) {
        let Phase::Decided(trigger) = state.phase else {
            return;
        };
        let Some(chain) = state.chain.as_mut() else {
            return;
        };
        let resolution = chain.close(trigger);
        let chain_id = resolution.chain_id;
        state.phase = Phase::Firing;
        drop(state);

        // Resets on both normal return and unwind out of the action.
        let _reset = ChainReset::new(self, chain_id);
        (self.action)(resolution);
    }
}

impl<A: Send + 'static> ChainControl for Shared<A> {
    fn bounce_chain(&self, chain: ChainId, trigger: Trigger) -> bool {
        let mut state = self.lock();
        if state.chain_id != chain {
            trace!(%chain, "stale bounce ignored");
            return false;
        }
        if !self.decide(&mut state, trigger) {
            return false;
        }
        self.settle(state);
        true
    }
}

impl<A> Drop for Shared<A> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for armed in [state.throttle_timer.take(), state.max_delay_timer.take()]
            .into_iter()
            .flatten()
        {
            self.scheduler.cancel(armed.id);
        }
    }
}

/// Begins a new chain when dropped, unless disarmed or the chain it guards
/// has already been replaced.
struct ChainReset<'a, A: Send + 'static> {
    shared: &'a Shared<A>,
    chain_id: ChainId,
    armed: bool,
}

impl<'a, A: Send + 'static> ChainReset<'a, A> {
    fn new(shared: &'a Shared<A>, chain_id: ChainId) -> Self {
        Self {
            shared,
            chain_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<A: Send + 'static> Drop for ChainReset<'_, A> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        if state.chain_id == self.chain_id {
            if std::thread::panicking() {
                debug!(chain_id = %self.chain_id, "callback panicked; starting a new chain");
            }
            self.shared.reset(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_into_one_throttle_resolution() {
        let (governor, mut rx) = Governor::builder(Duration::from_millis(100))
            .build_channel()
            .unwrap();
        let start = tokio::time::Instant::now();

        for i in 0..3u32 {
            governor.trigger(i);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let resolution = rx.recv().await.unwrap();
        assert_eq!(resolution.trigger, Trigger::Throttle);
        assert_eq!(resolution.call_count, 3);
        assert_eq!(resolution.arguments, Some(2));
        // Last event at t=60, so the chain goes quiet at t=160.
        assert_eq!(start.elapsed(), Duration::from_millis(160));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_caps_a_continuous_stream() {
        let (governor, mut rx) = Governor::builder(Duration::from_millis(100))
            .max_delay(Duration::from_millis(200))
            .build_channel()
            .unwrap();
        let start = tokio::time::Instant::now();

        let feeder = {
            let governor = governor.clone();
            tokio::spawn(async move {
                for i in 0..8u32 {
                    governor.trigger(i);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.trigger, Trigger::Debounce);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_governor_cancels_timers() {
        let scheduler = Arc::new(TokioScheduler::current().unwrap());
        let governor = Governor::builder(Duration::from_millis(100))
            .max_delay(Duration::from_millis(300))
            .scheduler(scheduler.clone())
            .build(|_: Resolution<()>| panic!("action must not run"))
            .unwrap();

        governor.trigger(());
        assert_eq!(scheduler.outstanding(), 2);

        drop(governor);
        assert_eq!(scheduler.outstanding(), 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    #[test]
    fn test_build_without_runtime_or_scheduler_fails() {
        let result = Governor::<()>::builder(Duration::from_millis(10)).build(|_| {});
        assert!(matches!(result, Err(crate::BounceError::NoRuntime)));
    }
}
