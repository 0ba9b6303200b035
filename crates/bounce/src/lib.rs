//! # Bounce
//!
//! A combined throttle-and-debounce event governor: collapse a high-frequency
//! stream of trigger calls into a bounded number of action invocations, with a
//! hard upper bound on how long any event waits.
//!
//! ## Core Concepts
//!
//! - [`Governor`] = the listener handle events are fed into
//! - [`Chain`] = one burst of activity between two resolutions
//! - [`Resolution`] = the detached snapshot the action receives
//! - [`Trigger`] = why a chain resolved
//!
//! ## Architecture
//!
//! ```text
//! caller ── trigger(args) ──► Governor
//!                               │
//!                               ├─► control hook(&mut Chain) ── bounce() ──┐
//!                               │                                          │
//!                               ├─► throttle timer (quiet period) ─────────┤
//!                               │                                          │
//!                               └─► max-delay timer (ceiling) ─────────────┤
//!                                                                          │
//!                     bounce(force) ───────────────────────────────────────┤
//!                                                                          ▼
//!                                                          action(Resolution)
//!                                                                          │
//!                                                                          ▼
//!                                                                  fresh Chain
//! ```
//!
//! ## Key Invariants
//!
//! 1. **One live chain** - replaced, never reused, after every resolution
//! 2. **One resolution per chain** - the first trigger to be decided wins
//! 3. **Fixed ceiling** - the max-delay timer is armed once, on a chain's first event
//! 4. **Stale capabilities are inert** - a [`Bouncer`] only acts on its own chain
//! 5. **Cancel drops, never flushes** - a cancelled chain never reaches the action
//!
//! ## Example
//!
//! ```ignore
//! use bounce_core::{Governor, Trigger};
//! use std::time::Duration;
//!
//! let (governor, mut resolutions) = Governor::builder(Duration::from_millis(100))
//!     .max_delay(Duration::from_millis(500))
//!     .build_channel()?;
//!
//! for key in "hello".chars() {
//!     governor.trigger(key);
//!     tokio::time::sleep(Duration::from_millis(20)).await;
//! }
//!
//! let resolution = resolutions.recv().await.unwrap();
//! assert_eq!(resolution.call_count, 5);
//! assert_eq!(resolution.arguments, Some('o'));
//! ```
//!
//! ## Timers
//!
//! The governor reads time and arms timers only through a [`Scheduler`].
//! [`TokioScheduler`] is used by default; the `bounce-testing` crate provides
//! a virtual clock for deterministic tests.

mod chain;
mod config;
mod error;
mod governor;
mod scheduler;

pub use crate::chain::{Bouncer, Chain, ChainId, Resolution, Trigger};
pub use crate::config::GovernorConfig;
pub use crate::error::{BounceError, Result};
pub use crate::governor::{Governor, GovernorBuilder};
pub use crate::scheduler::{Scheduler, TimerId, TimerTask, TokioScheduler};
