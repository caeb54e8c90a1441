//! The capability every selectable event implements.
//!
//! A [`Guard`] is offered to an [`Alternative`](crate::alt::Alternative) and
//! must never block: `enable` either reports the event ready, records the
//! waker for a later [`AltWaker::schedule`], or (for timer guards) registers
//! a deadline; `disable` withdraws the offer and reports whether the event
//! became ready in the meantime.
//!
//! The variant set is closed: channel input, timer, alting barrier, skip,
//! stop, and nested alternative. Dispatch is through this trait, not an
//! inheritance tree.

use std::sync::Arc;
use std::time::Instant;

use crate::alt::AltWaker;
use crate::barrier::AltingBarrierCoordinate;
use crate::error::Result;

/// Outcome of enabling a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableResult {
    /// The event is already satisfiable; no residue was left behind.
    Ready,
    /// The waker was recorded; a later `schedule` will report the event.
    Pending,
    /// Timer guards: not ready, but wake the selection no later than this.
    /// The selection keeps the earliest deadline across all timer guards.
    Deadline(Instant),
}

/// A selectable event source.
pub trait Guard: Send + Sync {
    /// Offers this event to a selection.
    ///
    /// Returns [`EnableResult::Ready`] if the event is already satisfiable
    /// (leaving no residue), otherwise records `waker` (or a deadline) and
    /// reports the offer pending. Never blocks.
    fn enable(&mut self, waker: &AltWaker) -> Result<EnableResult>;

    /// Withdraws the offer, clearing any residue.
    ///
    /// Returns true if the event became (or already was) satisfiable since
    /// `enable`.
    fn disable(&mut self) -> Result<bool>;

    /// The coordination fence this guard's barrier belongs to; `None` for
    /// everything that is not an alting barrier.
    fn barrier_coordinate(&self) -> Option<Arc<AltingBarrierCoordinate>> {
        None
    }

    /// Consumes the fired flag: true once per round when this guard's
    /// barrier completed during `enable` or was found completed during
    /// `disable`. Always false for non-barrier guards.
    fn take_barrier_fired(&mut self) -> bool {
        false
    }
}

/// A guard that is always ready: selecting over it never waits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Skip;

impl Skip {
    /// Creates a skip guard.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Guard for Skip {
    fn enable(&mut self, _waker: &AltWaker) -> Result<EnableResult> {
        Ok(EnableResult::Ready)
    }

    fn disable(&mut self) -> Result<bool> {
        Ok(true)
    }
}

/// A guard that is never ready: it can only lose a selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stop;

impl Stop {
    /// Creates a stop guard.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Guard for Stop {
    fn enable(&mut self, _waker: &AltWaker) -> Result<EnableResult> {
        Ok(EnableResult::Pending)
    }

    fn disable(&mut self) -> Result<bool> {
        Ok(false)
    }
}
