//! Chains: one burst of activity between two resolutions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;
use uuid::Uuid;

/// Opaque identity of a single chain.
///
/// A fresh id is minted on every reset, so a capability bound to one chain can
/// never act on its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(Uuid);

impl ChainId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Why a chain resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    /// The control hook (or a [`Bouncer`]) asked for it.
    Control,
    /// The max-delay ceiling expired.
    Debounce,
    /// The chain went quiet for the throttle wait.
    Throttle,
    /// [`Governor::bounce`](crate::Governor::bounce) forced it.
    Global,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Control => "control",
            Trigger::Debounce => "debounce",
            Trigger::Throttle => "throttle",
            Trigger::Global => "global",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by the governor so chain capabilities can reach it without
/// knowing its argument type.
pub(crate) trait ChainControl: Send + Sync {
    fn bounce_chain(&self, chain: ChainId, trigger: Trigger) -> bool;
}

/// Capability to resolve one specific chain.
///
/// Obtained from [`Chain::bouncer`]. It may be cloned and kept anywhere, but
/// it only ever acts on the chain it was taken from: once that chain has
/// started resolving, or has been replaced, every call returns `false`.
#[derive(Clone)]
pub struct Bouncer {
    chain: ChainId,
    target: Weak<dyn ChainControl>,
}

impl Bouncer {
    pub(crate) fn new(chain: ChainId, target: Weak<dyn ChainControl>) -> Self {
        Self { chain, target }
    }

    /// Request resolution of the bound chain with [`Trigger::Control`].
    ///
    /// Returns `true` if this call decided the resolution.
    pub fn bounce(&self) -> bool {
        match self.target.upgrade() {
            Some(target) => target.bounce_chain(self.chain, Trigger::Control),
            None => false,
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain
    }
}

impl fmt::Debug for Bouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bouncer").field("chain", &self.chain).finish()
    }
}

/// The live chain, as seen by the control hook.
pub struct Chain<A> {
    id: ChainId,
    call_count: u64,
    arguments: Option<A>,
    bouncer: Bouncer,
}

impl<A> Chain<A> {
    pub(crate) fn new(id: ChainId, bouncer: Bouncer) -> Self {
        Self {
            id,
            call_count: 0,
            arguments: None,
            bouncer,
        }
    }

    pub fn id(&self) -> ChainId {
        self.id
    }

    /// Number of events accepted since this chain began.
    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Arguments of the most recent accepted event.
    pub fn arguments(&self) -> Option<&A> {
        self.arguments.as_ref()
    }

    /// Mutable access to the captured arguments, for hooks that aggregate.
    pub fn arguments_mut(&mut self) -> Option<&mut A> {
        self.arguments.as_mut()
    }

    /// Request immediate resolution with [`Trigger::Control`].
    ///
    /// When called from the control hook the action runs as soon as the hook
    /// returns. Returns `false` if a resolution was already decided.
    pub fn bounce(&self) -> bool {
        self.bouncer.bounce()
    }

    /// A detachable capability bound to this chain.
    pub fn bouncer(&self) -> Bouncer {
        self.bouncer.clone()
    }

    pub(crate) fn record(&mut self, arguments: A) {
        self.call_count += 1;
        self.arguments = Some(arguments);
    }

    /// Close the chain, handing its arguments over to the snapshot.
    pub(crate) fn close(&mut self, trigger: Trigger) -> Resolution<A> {
        Resolution {
            chain_id: self.id,
            call_count: self.call_count,
            arguments: self.arguments.take(),
            trigger,
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for Chain<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("id", &self.id)
            .field("call_count", &self.call_count)
            .field("arguments", &self.arguments)
            .finish()
    }
}

/// Snapshot of a resolved chain, handed to the action.
///
/// The snapshot owns its arguments and carries no way back into the governor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution<A> {
    pub chain_id: ChainId,
    pub call_count: u64,
    pub arguments: Option<A>,
    pub trigger: Trigger,
}
