//! The private monitor behind one [`Alternative`](crate::alt::Alternative).
//!
//! Exactly one process blocks here; guards wake it through cloned
//! [`AltWaker`] handles. The phase machine is
//! `Inactive → Enabling → (Ready | Waiting → Ready) → Inactive`.
//!
//! `schedule` never blocks: during `Enabling` it flips the phase quietly (the
//! owner has not gone to sleep yet and will notice before waiting); during
//! `Waiting` it flips and notifies; in any other phase it is a no-op, which
//! makes late wake-ups from a finished round harmless.

use std::sync::{Arc, Condvar, Mutex};

/// Where the owning process is within a selection round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AltPhase {
    /// No selection in progress.
    Inactive,
    /// The enable walk is running.
    Enabling,
    /// The owner is blocked waiting for an event or deadline.
    Waiting,
    /// Some guard fired (or the round is being wound down).
    Ready,
}

#[derive(Debug)]
pub(crate) struct AltSignal {
    phase: Mutex<AltPhase>,
    wake: Condvar,
}

impl AltSignal {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            phase: Mutex::new(AltPhase::Inactive),
            wake: Condvar::new(),
        })
    }

    pub(crate) fn set_phase(&self, phase: AltPhase) {
        *self.phase.lock().expect("alt monitor poisoned") = phase;
    }

    pub(crate) fn lock_phase(&self) -> std::sync::MutexGuard<'_, AltPhase> {
        self.phase.lock().expect("alt monitor poisoned")
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: std::sync::MutexGuard<'a, AltPhase>,
        timeout: std::time::Duration,
    ) -> (std::sync::MutexGuard<'a, AltPhase>, bool) {
        let (guard, result) = self
            .wake
            .wait_timeout(guard, timeout)
            .expect("alt monitor poisoned");
        (guard, result.timed_out())
    }
}

/// Cloneable wake-up handle a guard records while an offer is pending.
///
/// Guards call [`AltWaker::schedule`] from their own monitors; the alt
/// monitor is only ever acquired leaf-most, so no lock cycle can form.
#[derive(Debug, Clone)]
pub struct AltWaker {
    signal: Arc<AltSignal>,
}

impl AltWaker {
    pub(crate) fn new(signal: Arc<AltSignal>) -> Self {
        Self { signal }
    }

    /// Marks the owning selection ready, waking it if it is blocked.
    pub fn schedule(&self) {
        let mut phase = self.signal.lock_phase();
        match *phase {
            AltPhase::Enabling => *phase = AltPhase::Ready,
            AltPhase::Waiting => {
                *phase = AltPhase::Ready;
                self.signal.wake.notify_one();
            }
            AltPhase::Ready | AltPhase::Inactive => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_during_enabling_skips_the_wait() {
        let signal = AltSignal::new();
        signal.set_phase(AltPhase::Enabling);
        AltWaker::new(Arc::clone(&signal)).schedule();
        assert_eq!(*signal.lock_phase(), AltPhase::Ready);
    }

    #[test]
    fn schedule_wakes_a_waiting_owner() {
        let signal = AltSignal::new();
        signal.set_phase(AltPhase::Waiting);
        let waker = AltWaker::new(Arc::clone(&signal));

        let thread_signal = Arc::clone(&signal);
        let waiter = std::thread::spawn(move || {
            let mut phase = thread_signal.lock_phase();
            while *phase != AltPhase::Ready {
                let (guard, _) =
                    thread_signal.wait_timeout(phase, std::time::Duration::from_millis(50));
                phase = guard;
            }
        });

        waker.schedule();
        waiter.join().expect("waiter thread failed");
        assert_eq!(*signal.lock_phase(), AltPhase::Ready);
    }

    #[test]
    fn late_schedule_is_a_no_op() {
        let signal = AltSignal::new();
        signal.set_phase(AltPhase::Inactive);
        AltWaker::new(Arc::clone(&signal)).schedule();
        assert_eq!(*signal.lock_phase(), AltPhase::Inactive);
    }
}
