//! The guarded-choice (ALT) engine.
//!
//! An [`Alternative`] offers a fixed array of [`Guard`]s and commits to
//! exactly one per round. A round has three phases:
//!
//! 1. **Enable**: guards are enabled in order from the round's start index,
//!    wrapping. The walk stops at the first guard that is already ready, so
//!    only a prefix of the array is ever touched — which is what makes an
//!    uncommitted channel write safe to offer to many selections at once.
//!    Timer guards register a deadline instead of succeeding; the earliest
//!    deadline is retained. If any guard is an alting barrier, the whole
//!    enable sequence runs under the runtime-wide coordination fence.
//! 2. **Wait**: if nothing was ready, the process blocks on the
//!    alternative's private monitor until some guard schedules it or the
//!    earliest deadline passes. The wait is a predicate-checked loop: both
//!    spurious wake-ups and timers firing early simply loop again. A
//!    configurable tolerance decides which of the two a premature wake-up
//!    is reported as; the distinction is diagnostic only.
//! 3. **Disable**: enabled guards are disabled in reverse enable order
//!    (from just before the stopping point back to the start index,
//!    wrapping). Every guard found ready overwrites the selection, so the
//!    last one found — the closest to the start index — wins. This
//!    tie-break is a fixed contract. A completed alting barrier overrides
//!    it: the barrier's index is the selection for every party in its
//!    round, and a second completed barrier in one round is an engine
//!    defect.
//!
//! `select` makes an arbitrary choice (implemented as fair), `pri_select`
//! favors the lowest index, and `fair_select` rotates the start index past
//! the previous selection so no persistently-ready guard is starved.
//! Each variant has a precondition overload that masks guards out of the
//! round entirely.
//!
//! One `Alternative` serves one process; it is not meant to be shared, and
//! its monitor only ever blocks that one process.

mod nested;
mod signal;

pub use nested::NestedAlternative;
pub use signal::AltWaker;

use core::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::barrier::AltingBarrierCoordinate;
use crate::cx::{Cx, CANCEL_POLL_TICK};
use crate::error::{Error, ErrorKind, Result};
use crate::guard::{EnableResult, Guard};
use signal::{AltPhase, AltSignal};

/// Premature timer wake-ups within this much of the deadline are logged as
/// early timeouts rather than spurious wake-ups.
const DEFAULT_EARLY_TIMEOUT_TOLERANCE: Duration = Duration::from_millis(4);

/// Guarded choice over a fixed set of event sources.
pub struct Alternative {
    guards: Vec<Box<dyn Guard>>,
    signal: Arc<AltSignal>,
    /// Present iff any guard is an alting barrier; all barrier guards must
    /// share it.
    coordinate: Option<Arc<AltingBarrierCoordinate>>,
    /// Rotation pointer: where the next fair round starts.
    favourite: usize,
    /// Which guards hold an offer this round.
    enabled: Vec<bool>,
    tolerance: Duration,
}

impl fmt::Debug for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Alternative")
            .field("guards", &self.guards.len())
            .field("favourite", &self.favourite)
            .field("barrier_present", &self.coordinate.is_some())
            .finish_non_exhaustive()
    }
}

impl Alternative {
    /// Builds a selection over `guards` (at least one).
    ///
    /// Fails if the set is empty or if alting-barrier guards span different
    /// coordination scopes.
    pub fn new(guards: Vec<Box<dyn Guard>>) -> Result<Self> {
        if guards.is_empty() {
            return Err(Error::new(ErrorKind::EmptyGuardSet)
                .with_message("selection needs at least one guard"));
        }
        let mut coordinate: Option<Arc<AltingBarrierCoordinate>> = None;
        for guard in &guards {
            if let Some(scope) = guard.barrier_coordinate() {
                match &coordinate {
                    None => coordinate = Some(scope),
                    Some(existing) if Arc::ptr_eq(existing, &scope) => {}
                    Some(_) => {
                        return Err(Error::new(ErrorKind::ForeignFrontEnd).with_message(
                            "barrier guards span different coordination scopes",
                        ))
                    }
                }
            }
        }
        let count = guards.len();
        Ok(Self {
            guards,
            signal: AltSignal::new(),
            coordinate,
            favourite: 0,
            enabled: vec![false; count],
            tolerance: DEFAULT_EARLY_TIMEOUT_TOLERANCE,
        })
    }

    /// Overrides the early-timeout tolerance used to classify premature
    /// wake-ups in diagnostics.
    #[must_use]
    pub fn with_early_timeout_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Number of guards in the selection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Always false: a selection holds at least one guard.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Commits to one ready guard, arbitrarily. Implemented as fair choice.
    pub fn select(&mut self, cx: &Cx) -> Result<usize> {
        self.fair_select(cx)
    }

    /// Commits to the lowest-indexed ready guard.
    pub fn pri_select(&mut self, cx: &Cx) -> Result<usize> {
        self.do_select(cx, 0, None)
    }

    /// Commits to a ready guard, rotating the start index past the previous
    /// selection so every persistently-ready guard is served within one
    /// cycle.
    pub fn fair_select(&mut self, cx: &Cx) -> Result<usize> {
        let selected = self.do_select(cx, self.favourite, None)?;
        self.favourite = (selected + 1) % self.guards.len();
        Ok(selected)
    }

    /// [`Alternative::select`] over only the guards whose precondition is
    /// true.
    pub fn select_pre(&mut self, cx: &Cx, preconditions: &[bool]) -> Result<usize> {
        self.fair_select_pre(cx, preconditions)
    }

    /// [`Alternative::pri_select`] over only the guards whose precondition
    /// is true.
    pub fn pri_select_pre(&mut self, cx: &Cx, preconditions: &[bool]) -> Result<usize> {
        self.check_preconditions(preconditions)?;
        self.do_select(cx, 0, Some(preconditions))
    }

    /// [`Alternative::fair_select`] over only the guards whose precondition
    /// is true.
    pub fn fair_select_pre(&mut self, cx: &Cx, preconditions: &[bool]) -> Result<usize> {
        self.check_preconditions(preconditions)?;
        let selected = self.do_select(cx, self.favourite, Some(preconditions))?;
        self.favourite = (selected + 1) % self.guards.len();
        Ok(selected)
    }

    fn check_preconditions(&self, preconditions: &[bool]) -> Result<()> {
        if preconditions.len() == self.guards.len() {
            Ok(())
        } else {
            Err(Error::precondition_mismatch(
                self.guards.len(),
                preconditions.len(),
            ))
        }
    }

    /// One selection round: enable walk, optional wait, reverse disable
    /// walk.
    fn do_select(&mut self, cx: &Cx, start: usize, pre: Option<&[bool]>) -> Result<usize> {
        let count = self.guards.len();
        cx.checkpoint("selection")?;
        for flag in &mut self.enabled {
            *flag = false;
        }
        self.signal.set_phase(AltPhase::Enabling);
        let waker = AltWaker::new(Arc::clone(&self.signal));

        if let Some(coordinate) = &self.coordinate {
            if let Err(err) = coordinate.start_enable(cx) {
                self.signal.set_phase(AltPhase::Inactive);
                return Err(err);
            }
        }

        let mut deadline: Option<Instant> = None;
        let mut selected: Option<usize> = None;
        let mut barrier_index: Option<usize> = None;
        let mut failure: Option<Error> = None;
        // Number of walk positions holding offers to unwind in the disable
        // phase; the stopping guard itself is excluded.
        let mut stop = count;

        for position in 0..count {
            let index = (start + position) % count;
            if pre.is_some_and(|p| !p[index]) {
                continue;
            }
            match self.guards[index].enable(&waker) {
                Ok(EnableResult::Ready) => {
                    selected = Some(index);
                    if self.guards[index].take_barrier_fired() {
                        // The completion converted the fence into a disable
                        // wave; finish_enable must not run.
                        barrier_index = Some(index);
                    } else if let Some(coordinate) = &self.coordinate {
                        if let Err(err) = coordinate.finish_enable() {
                            failure = Some(err);
                        }
                    }
                    stop = position;
                    break;
                }
                Ok(EnableResult::Pending) => self.enabled[index] = true,
                Ok(EnableResult::Deadline(at)) => {
                    self.enabled[index] = true;
                    deadline = Some(deadline.map_or(at, |d| d.min(at)));
                }
                Err(err) => {
                    failure = Some(err);
                    stop = position;
                    break;
                }
            }
        }

        if failure.is_none() && selected.is_none() {
            // Everything eligible is enabled and nothing was ready.
            if let Some(coordinate) = &self.coordinate {
                if let Err(err) = coordinate.finish_enable() {
                    failure = Some(err);
                }
            }
            if failure.is_none() {
                if let Err(err) = self.wait_for_event(cx, deadline) {
                    failure = Some(err);
                }
            }
        } else if failure.is_some() && barrier_index.is_none() {
            if let Some(coordinate) = &self.coordinate {
                // The failed enable walk still holds the fence.
                if let Err(err) = coordinate.finish_enable() {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Err(err) = self.disable_walk(start, stop, &mut selected, &mut barrier_index) {
            failure.get_or_insert(err);
        }

        if let Some(index) = barrier_index {
            // A completed barrier binds every party to it, overriding the
            // walk's tie-break, and retires this party's disable sequence
            // from the wave.
            selected = Some(index);
            match &self.coordinate {
                Some(coordinate) => {
                    if let Err(err) = coordinate.finish_disable() {
                        failure.get_or_insert(err);
                    }
                }
                None => {
                    failure
                        .get_or_insert(Error::internal("barrier fired without a coordination scope"));
                }
            }
        }

        self.signal.set_phase(AltPhase::Inactive);
        if let Some(err) = failure {
            return Err(err);
        }
        match selected {
            Some(index) => Ok(index),
            None => Err(Error::internal("selection finished with no ready guard")),
        }
    }

    /// Blocks until a guard schedules this selection or the deadline
    /// passes. Spurious and early wake-ups re-check the predicate and loop.
    fn wait_for_event(&self, cx: &Cx, deadline: Option<Instant>) -> Result<()> {
        let mut phase = self.signal.lock_phase();
        if *phase == AltPhase::Enabling {
            *phase = AltPhase::Waiting;
        }
        loop {
            if *phase == AltPhase::Ready {
                break;
            }
            if cx.is_cancel_requested() {
                *phase = AltPhase::Ready;
                return Err(Error::cancelled("selection wait"));
            }
            let now = Instant::now();
            if let Some(at) = deadline {
                if now >= at {
                    break;
                }
            }
            let tick = deadline.map_or(CANCEL_POLL_TICK, |at| CANCEL_POLL_TICK.min(at - now));
            let (guard, timed_out) = self.signal.wait_timeout(phase, tick);
            phase = guard;
            if !timed_out && *phase == AltPhase::Waiting {
                match deadline {
                    Some(at)
                        if at.saturating_duration_since(Instant::now()) <= self.tolerance =>
                    {
                        tracing::debug!("early timer wake-up within tolerance");
                    }
                    _ => tracing::debug!("spurious wake-up in selection wait"),
                }
            }
        }
        *phase = AltPhase::Ready;
        Ok(())
    }

    /// Reverse walk over the offers made this round. Every guard found
    /// ready overwrites `selected` (last found wins); completed barriers
    /// are recorded separately, and a second one is an engine defect.
    fn disable_walk(
        &mut self,
        start: usize,
        stop: usize,
        selected: &mut Option<usize>,
        barrier_index: &mut Option<usize>,
    ) -> Result<()> {
        let count = self.guards.len();
        let mut first_err: Option<Error> = None;
        for position in (0..stop).rev() {
            let index = (start + position) % count;
            if !self.enabled[index] {
                continue;
            }
            self.enabled[index] = false;
            match self.guards[index].disable() {
                Ok(true) => {
                    *selected = Some(index);
                    if self.guards[index].take_barrier_fired() {
                        if barrier_index.is_some() {
                            first_err.get_or_insert_with(|| {
                                Error::internal("two barriers completed in one selection round")
                            });
                        } else {
                            *barrier_index = Some(index);
                        }
                    }
                }
                Ok(false) => {}
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) fn signal_for_testing() -> AltWaker {
    AltWaker::new(AltSignal::new())
}
