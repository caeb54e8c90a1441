//! N-party barrier with dynamic enrollment.
//!
//! All enrolled parties block in [`Barrier::sync`] until the last one
//! arrives; the cycle then resets for reuse. Enrollment may grow and shrink
//! between (and during) cycles, and a resignation that removes the last
//! outstanding party completes the cycle exactly as a sync would.
//!
//! The even/odd cycle flag exists solely to tell a genuine release from a
//! spurious wake-up: waiters loop until the flag flips.

use std::sync::{Condvar, Mutex};

use crate::cx::{Cx, CANCEL_POLL_TICK};
use crate::error::{Error, ErrorKind, Result};

#[derive(Debug)]
struct BarrierState {
    enrolled: usize,
    countdown: usize,
    even_odd: bool,
}

impl BarrierState {
    /// Completes the current cycle: resets the countdown and flips the
    /// cycle flag so every waiter's predicate turns true.
    fn release(&mut self) {
        self.countdown = self.enrolled;
        self.even_odd = !self.even_odd;
    }
}

/// N-party rendezvous point.
#[derive(Debug)]
pub struct Barrier {
    state: Mutex<BarrierState>,
    trip: Condvar,
}

impl Barrier {
    /// Creates a barrier with `enrolled` initial parties (may be zero;
    /// enroll later).
    #[must_use]
    pub fn new(enrolled: usize) -> Self {
        Self {
            state: Mutex::new(BarrierState {
                enrolled,
                countdown: enrolled,
                even_odd: false,
            }),
            trip: Condvar::new(),
        }
    }

    /// Returns the current enrollment.
    #[must_use]
    pub fn enrolled(&self) -> usize {
        self.state.lock().expect("barrier lock poisoned").enrolled
    }

    /// Blocks until every enrolled party has arrived this cycle.
    ///
    /// Cancellation while waiting withdraws this arrival and aborts with
    /// [`ErrorKind::Cancelled`]; the cycle stays completable for the others.
    pub fn sync(&self, cx: &Cx) -> Result<()> {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        if state.enrolled == 0 {
            return Err(Error::new(ErrorKind::BadEnrollment)
                .with_message("sync on a barrier with zero enrollment"));
        }
        cx.trace("barrier::sync arriving");
        state.countdown -= 1;
        if state.countdown == 0 {
            state.release();
            self.trip.notify_all();
            cx.trace("barrier::sync completed the cycle");
            return Ok(());
        }

        let cycle = state.even_odd;
        loop {
            if state.even_odd != cycle {
                cx.trace("barrier::sync released");
                return Ok(());
            }
            if cx.is_cancel_requested() {
                // Re-check: the release may have raced the cancellation.
                if state.even_odd != cycle {
                    return Ok(());
                }
                state.countdown += 1;
                return Err(Error::cancelled("barrier sync"));
            }
            let (guard, _) = self
                .trip
                .wait_timeout(state, CANCEL_POLL_TICK)
                .expect("barrier lock poisoned");
            state = guard;
        }
    }

    /// Adds one party to the barrier from the next arrival on.
    pub fn enroll(&self) {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        state.enrolled += 1;
        state.countdown += 1;
    }

    /// Removes one party. A resignation that leaves every remaining party
    /// already arrived completes the cycle on their behalf.
    pub fn resign(&self) -> Result<()> {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        if state.enrolled == 0 {
            return Err(Error::new(ErrorKind::NotEnrolled)
                .with_message("resign without a matching enrollment"));
        }
        state.enrolled -= 1;
        state.countdown -= 1;
        if state.countdown == 0 {
            state.release();
            self.trip.notify_all();
        }
        Ok(())
    }

    /// Forces enrollment to `enrolled` and abandons the current cycle's
    /// count. Only safe while no party is blocked in [`Barrier::sync`].
    pub fn reset(&self, enrolled: usize) {
        let mut state = self.state.lock().expect("barrier lock poisoned");
        state.enrolled = enrolled;
        state.countdown = enrolled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn all_parties_released_together() {
        init_test("all_parties_released_together");
        let barrier = Arc::new(Barrier::new(3));
        let released = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let barrier = Arc::clone(&barrier);
            let released = Arc::clone(&released);
            handles.push(std::thread::spawn(move || {
                let cx = Cx::for_testing();
                barrier.sync(&cx).expect("sync failed");
                released.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let cx = Cx::for_testing();
        barrier.sync(&cx).expect("sync failed");
        for handle in handles {
            handle.join().expect("party thread failed");
        }
        let count = released.load(Ordering::SeqCst);
        crate::assert_with_log!(count == 2, "released parties", 2usize, count);
        crate::test_complete!("all_parties_released_together");
    }

    #[test]
    fn barrier_cycles_are_reusable() {
        init_test("barrier_cycles_are_reusable");
        let barrier = Arc::new(Barrier::new(2));
        for _ in 0..3 {
            let barrier2 = Arc::clone(&barrier);
            let peer = std::thread::spawn(move || {
                let cx = Cx::for_testing();
                barrier2.sync(&cx)
            });
            let cx = Cx::for_testing();
            barrier.sync(&cx).expect("sync failed");
            peer.join().expect("peer thread failed").expect("peer sync");
        }
        crate::test_complete!("barrier_cycles_are_reusable");
    }

    #[test]
    fn resigning_last_party_completes_the_cycle() {
        init_test("resigning_last_party_completes_the_cycle");
        let barrier = Arc::new(Barrier::new(2));
        let barrier2 = Arc::clone(&barrier);
        let waiter = std::thread::spawn(move || {
            let cx = Cx::for_testing();
            barrier2.sync(&cx)
        });
        // Let the waiter arrive, then resign the only other party.
        while barrier.state.lock().expect("barrier lock poisoned").countdown != 1 {
            std::thread::yield_now();
        }
        barrier.resign().expect("resign failed");
        waiter
            .join()
            .expect("waiter thread failed")
            .expect("waiter sync failed");
        assert_eq!(barrier.enrolled(), 1);
        crate::test_complete!("resigning_last_party_completes_the_cycle");
    }

    #[test]
    fn resign_without_enrollment_is_misuse() {
        init_test("resign_without_enrollment_is_misuse");
        let barrier = Barrier::new(0);
        let err = barrier.resign().expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::NotEnrolled);
        let cx = Cx::for_testing();
        let err = barrier.sync(&cx).expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::BadEnrollment);
        crate::test_complete!("resign_without_enrollment_is_misuse");
    }

    #[test]
    fn cancelled_party_withdraws_its_arrival() {
        init_test("cancelled_party_withdraws_its_arrival");
        let barrier = Arc::new(Barrier::new(2));
        let cx = Cx::for_testing();
        cx.cancel();
        let err = barrier.sync(&cx).expect_err("expected cancellation");
        assert!(err.is_cancelled(), "got {err}");

        // The withdrawn arrival must not have consumed the cycle.
        let barrier2 = Arc::clone(&barrier);
        let peer = std::thread::spawn(move || {
            let cx = Cx::for_testing();
            barrier2.sync(&cx)
        });
        let cx = Cx::for_testing();
        barrier.sync(&cx).expect("sync failed");
        peer.join().expect("peer thread failed").expect("peer sync");
        crate::test_complete!("cancelled_party_withdraws_its_arrival");
    }

    #[test]
    fn enroll_grows_the_next_cycle() {
        init_test("enroll_grows_the_next_cycle");
        let barrier = Barrier::new(0);
        barrier.enroll();
        assert_eq!(barrier.enrolled(), 1);
        let cx = Cx::for_testing();
        // Single enrolled party completes alone.
        barrier.sync(&cx).expect("sync failed");
        barrier.reset(0);
        assert_eq!(barrier.enrolled(), 0);
        crate::test_complete!("enroll_grows_the_next_cycle");
    }
}
