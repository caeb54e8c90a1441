//! Global coordination fence for barrier-involving selections.
//!
//! At most one enable sequence that touches an alting barrier may run at a
//! time across the whole runtime. When such a sequence completes a barrier,
//! the fence converts into a counted *disable wave*: every completed party
//! runs its disable sequence in parallel, and the last one to finish reopens
//! the fence for the next enable sequence.
//!
//! One coordinate exists per [`Cx`](crate::cx::Cx) root, replacing the
//! source tradition of a process-global static so test runs stay isolated.
//!
//! The `active` counter obeys: `0` (idle), `1` (one enable sequence in
//! flight), `n > 0` (n disable sequences draining). Finding it anywhere else
//! is an engine defect, not a user error.

use std::sync::{Condvar, Mutex};

use crate::cx::{Cx, CANCEL_POLL_TICK};
use crate::error::{Error, Result};

/// Fence state shared by every alting barrier created under one context.
#[derive(Debug)]
pub struct AltingBarrierCoordinate {
    active: Mutex<usize>,
    idle: Condvar,
}

impl AltingBarrierCoordinate {
    pub(crate) fn new() -> Self {
        Self {
            active: Mutex::new(0),
            idle: Condvar::new(),
        }
    }

    /// Blocks until no enable sequence or disable wave is in flight, then
    /// claims the fence for one enable sequence.
    pub(crate) fn start_enable(&self, cx: &Cx) -> Result<()> {
        let mut active = self.active.lock().expect("coordinate lock poisoned");
        loop {
            if *active == 0 {
                *active = 1;
                return Ok(());
            }
            if cx.is_cancel_requested() {
                return Err(Error::cancelled("barrier enable fence"));
            }
            let (guard, _) = self
                .idle
                .wait_timeout(active, CANCEL_POLL_TICK)
                .expect("coordinate lock poisoned");
            active = guard;
        }
    }

    /// Releases the fence after an enable sequence that completed no barrier.
    pub(crate) fn finish_enable(&self) -> Result<()> {
        let mut active = self.active.lock().expect("coordinate lock poisoned");
        if *active != 1 {
            return Err(Error::internal(format!(
                "finish_enable with active = {} (expected 1)",
                *active
            )));
        }
        *active = 0;
        self.idle.notify_all();
        Ok(())
    }

    /// Converts the fence into a disable wave of `parties` parallel disable
    /// sequences. Called by the barrier completion itself, while the
    /// completing enable sequence still holds the fence.
    pub(crate) fn start_disable(&self, parties: usize) -> Result<()> {
        if parties == 0 {
            return Err(Error::internal("start_disable with zero parties"));
        }
        let mut active = self.active.lock().expect("coordinate lock poisoned");
        if *active != 1 {
            return Err(Error::internal(format!(
                "start_disable with active = {} (expected 1)",
                *active
            )));
        }
        *active = parties;
        Ok(())
    }

    /// Retires one disable sequence from the wave; the last one reopens the
    /// fence.
    pub(crate) fn finish_disable(&self) -> Result<()> {
        let mut active = self.active.lock().expect("coordinate lock poisoned");
        if *active == 0 {
            return Err(Error::internal("finish_disable with active = 0"));
        }
        *active -= 1;
        if *active == 0 {
            self.idle.notify_all();
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn active_for_testing(&self) -> usize {
        *self.active.lock().expect("coordinate lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn enable_then_finish_reopens_the_fence() {
        init_test("enable_then_finish_reopens_the_fence");
        let cx = Cx::for_testing();
        let coord = AltingBarrierCoordinate::new();
        coord.start_enable(&cx).expect("start_enable failed");
        assert_eq!(coord.active_for_testing(), 1);
        coord.finish_enable().expect("finish_enable failed");
        assert_eq!(coord.active_for_testing(), 0);
        crate::test_complete!("enable_then_finish_reopens_the_fence");
    }

    #[test]
    fn disable_wave_drains_to_idle() {
        init_test("disable_wave_drains_to_idle");
        let cx = Cx::for_testing();
        let coord = AltingBarrierCoordinate::new();
        coord.start_enable(&cx).expect("start_enable failed");
        coord.start_disable(3).expect("start_disable failed");
        assert_eq!(coord.active_for_testing(), 3);
        for _ in 0..3 {
            coord.finish_disable().expect("finish_disable failed");
        }
        assert_eq!(coord.active_for_testing(), 0);
        // Fence must be claimable again.
        coord.start_enable(&cx).expect("re-enable failed");
        coord.finish_enable().expect("re-finish failed");
        crate::test_complete!("disable_wave_drains_to_idle");
    }

    #[test]
    fn out_of_range_counters_are_internal_errors() {
        init_test("out_of_range_counters_are_internal_errors");
        let coord = AltingBarrierCoordinate::new();
        let err = coord.finish_enable().expect_err("expected invariant error");
        assert_eq!(
            err.kind(),
            crate::error::ErrorKind::InvariantViolation,
            "finish_enable on idle fence: {err}"
        );
        let err = coord
            .finish_disable()
            .expect_err("expected invariant error");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);
        let err = coord
            .start_disable(2)
            .expect_err("expected invariant error");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);
        crate::test_complete!("out_of_range_counters_are_internal_errors");
    }

    #[test]
    fn cancelled_enabler_gives_up_the_wait() {
        init_test("cancelled_enabler_gives_up_the_wait");
        let cx = Cx::for_testing();
        let coord = AltingBarrierCoordinate::new();
        coord.start_enable(&cx).expect("start_enable failed");

        let waiter_cx = Cx::for_testing();
        waiter_cx.cancel();
        let err = coord
            .start_enable(&waiter_cx)
            .expect_err("expected cancellation");
        assert!(err.is_cancelled(), "got {err}");
        crate::test_complete!("cancelled_enabler_gives_up_the_wait");
    }
}
