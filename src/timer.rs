//! Wall-clock timer usable as a selection guard.
//!
//! A [`Timer`] holds one alarm shared across clones, so the process that
//! boxed a clone into an [`Alternative`](crate::alt::Alternative) can keep
//! re-arming it between rounds through its own handle.
//!
//! As a guard, an expired alarm is [`EnableResult::Ready`]; a future alarm
//! registers its deadline and the selection wakes no later than the earliest
//! deadline across all timer guards. Enabling an un-armed timer is a misuse
//! error rather than an instantly-ready event.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::alt::AltWaker;
use crate::cx::{Cx, CANCEL_POLL_TICK};
use crate::error::{Error, ErrorKind, Result};
use crate::guard::{EnableResult, Guard};

/// Shared-alarm timer.
#[derive(Debug, Clone, Default)]
pub struct Timer {
    alarm: Arc<Mutex<Option<Instant>>>,
}

impl Timer {
    /// Creates a timer with no alarm set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current instant.
    #[must_use]
    pub fn now() -> Instant {
        Instant::now()
    }

    /// Arms the alarm at an absolute instant.
    pub fn set_alarm(&self, at: Instant) {
        *self.alarm.lock().expect("timer lock poisoned") = Some(at);
    }

    /// Arms the alarm `delay` from now.
    pub fn after(&self, delay: Duration) {
        self.set_alarm(Instant::now() + delay);
    }

    /// Returns the armed alarm, if any.
    #[must_use]
    pub fn alarm(&self) -> Option<Instant> {
        *self.alarm.lock().expect("timer lock poisoned")
    }

    /// Sleeps for `duration`, polling for cancellation.
    pub fn sleep(&self, cx: &Cx, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        loop {
            cx.checkpoint("timer sleep")?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(CANCEL_POLL_TICK.min(deadline - now));
        }
    }
}

impl Guard for Timer {
    fn enable(&mut self, _waker: &AltWaker) -> Result<EnableResult> {
        match self.alarm() {
            None => Err(Error::new(ErrorKind::AlarmNotSet)
                .with_message("timer offered to a selection with no alarm set")),
            Some(at) if Instant::now() >= at => Ok(EnableResult::Ready),
            Some(at) => Ok(EnableResult::Deadline(at)),
        }
    }

    fn disable(&mut self) -> Result<bool> {
        Ok(self.alarm().is_some_and(|at| Instant::now() >= at))
    }
}
