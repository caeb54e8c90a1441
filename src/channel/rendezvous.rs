//! Synchronous rendezvous channel core.
//!
//! One writer-side and one reader-side handle share a single monitor. A
//! `write` parks the value in the slot and blocks until a reader commits;
//! a `read` claims the value and releases the writer in one step. The
//! extended rendezvous splits that step: [`ChanIn::start_read`] claims the
//! value while the writer stays blocked, and the matching
//! [`ChanIn::end_read`] performs the release.
//!
//! The input side doubles as a selection guard ([`ChanIn::guard`]): enabling
//! registers the selection's waker, and a writer arriving later schedules it
//! instead of notifying the (absent) blocked reader. Only a committed `read`
//! releases the writer, so offering an input to many selections at once is
//! safe.
//!
//! Poison is a strength-graded teardown signal: `poison(s)` is forwarded to
//! the channel only when `s` exceeds the channel's immunity, after which
//! both ends fail with [`ErrorKind::Poisoned`](crate::error::ErrorKind)
//! carrying the strength.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::alt::AltWaker;
use crate::cx::{Cx, CANCEL_POLL_TICK};
use crate::error::{Error, ErrorKind, Result};
use crate::guard::{EnableResult, Guard};

/// Channel state shared by the two ends, guarded by one monitor.
#[derive(Debug)]
struct State<T> {
    /// The offered value; `Some` while a write awaits acceptance.
    slot: Option<T>,
    /// Set by the reader's commit; consumed by the blocked writer.
    done: bool,
    /// An extended rendezvous has claimed the value but not released it.
    reading: bool,
    /// The selection currently offering this input, if any.
    waker: Option<AltWaker>,
    /// Highest forwarded poison strength; 0 means healthy.
    poison: u32,
}

#[derive(Debug)]
pub(crate) struct Core<T> {
    inner: Mutex<State<T>>,
    cond: Condvar,
    immunity: u32,
}

impl<T> Core<T> {
    fn new(immunity: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(State {
                slot: None,
                done: false,
                reading: false,
                waker: None,
                poison: 0,
            }),
            cond: Condvar::new(),
            immunity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.inner.lock().expect("channel lock poisoned")
    }

    pub(crate) fn write(&self, cx: &Cx, value: T) -> Result<()> {
        let mut st = self.lock();
        if st.poison > 0 {
            return Err(Error::poison(st.poison));
        }
        // A writer abandoned by cancellation mid-extended-read may have left
        // a stale commit behind; this cycle starts clean.
        st.done = false;
        st.slot = Some(value);
        cx.trace("channel::write offering value");
        if let Some(waker) = &st.waker {
            waker.schedule();
        } else {
            self.cond.notify_all();
        }
        while !st.done {
            if st.poison > 0 {
                if !st.reading {
                    st.slot = None;
                }
                return Err(Error::poison(st.poison));
            }
            if cx.is_cancel_requested() {
                if !st.reading {
                    st.slot = None;
                }
                return Err(Error::cancelled("channel write"));
            }
            let (guard, _) = self
                .cond
                .wait_timeout(st, CANCEL_POLL_TICK)
                .expect("channel lock poisoned");
            st = guard;
        }
        st.done = false;
        cx.trace("channel::write released");
        Ok(())
    }

    pub(crate) fn read(&self, cx: &Cx) -> Result<T> {
        let mut st = self.lock();
        if st.reading {
            return Err(Error::new(ErrorKind::ReadInProgress)
                .with_message("read during an extended rendezvous"));
        }
        loop {
            if st.poison > 0 {
                return Err(Error::poison(st.poison));
            }
            if let Some(value) = st.slot.take() {
                st.done = true;
                self.cond.notify_all();
                cx.trace("channel::read accepted value");
                return Ok(value);
            }
            cx.checkpoint("channel read")?;
            let (guard, _) = self
                .cond
                .wait_timeout(st, CANCEL_POLL_TICK)
                .expect("channel lock poisoned");
            st = guard;
        }
    }

    pub(crate) fn start_read(&self, cx: &Cx) -> Result<T> {
        let mut st = self.lock();
        if st.reading {
            return Err(Error::new(ErrorKind::ReadInProgress)
                .with_message("start_read while one is already in progress"));
        }
        loop {
            if st.poison > 0 {
                return Err(Error::poison(st.poison));
            }
            if let Some(value) = st.slot.take() {
                st.reading = true;
                cx.trace("channel::start_read claimed value");
                return Ok(value);
            }
            cx.checkpoint("channel start_read")?;
            let (guard, _) = self
                .cond
                .wait_timeout(st, CANCEL_POLL_TICK)
                .expect("channel lock poisoned");
            st = guard;
        }
    }

    pub(crate) fn end_read(&self) -> Result<()> {
        let mut st = self.lock();
        if !st.reading {
            return Err(Error::new(ErrorKind::NoReadInProgress)
                .with_message("end_read without a matching start_read"));
        }
        st.reading = false;
        st.done = true;
        self.cond.notify_all();
        Ok(())
    }

    pub(crate) fn pending(&self) -> bool {
        let st = self.lock();
        st.poison > 0 || st.slot.is_some()
    }

    pub(crate) fn poison(&self, strength: u32) {
        if strength <= self.immunity {
            return;
        }
        let mut st = self.lock();
        st.poison = st.poison.max(strength);
        tracing::debug!(strength, "channel poisoned");
        if let Some(waker) = &st.waker {
            waker.schedule();
        }
        self.cond.notify_all();
    }

    fn reader_enable(&self, waker: &AltWaker) -> EnableResult {
        let mut st = self.lock();
        if st.poison > 0 || st.slot.is_some() {
            EnableResult::Ready
        } else {
            st.waker = Some(waker.clone());
            EnableResult::Pending
        }
    }

    fn reader_disable(&self) -> bool {
        let mut st = self.lock();
        st.waker = None;
        st.poison > 0 || st.slot.is_some()
    }
}

/// Creates a one-writer, one-reader rendezvous channel immune to poison.
#[must_use]
pub fn one2one<T: Send>() -> (ChanOut<T>, ChanIn<T>) {
    let core = Core::new(u32::MAX);
    (
        ChanOut {
            core: Arc::clone(&core),
        },
        ChanIn { core },
    )
}

/// Creates a one-to-one rendezvous channel that forwards poison stronger
/// than `immunity`.
#[must_use]
pub fn one2one_poisonable<T: Send>(immunity: u32) -> (ChanOut<T>, ChanIn<T>) {
    let core = Core::new(immunity);
    (
        ChanOut {
            core: Arc::clone(&core),
        },
        ChanIn { core },
    )
}

/// The writing end of a rendezvous channel.
#[derive(Debug)]
pub struct ChanOut<T> {
    core: Arc<Core<T>>,
}

impl<T: Send> ChanOut<T> {
    /// Writes `value`, blocking until a reader commits the rendezvous.
    pub fn write(&mut self, cx: &Cx, value: T) -> Result<()> {
        self.core.write(cx, value)
    }

    /// Injects poison of the given strength (forwarded only past the
    /// channel's immunity).
    pub fn poison(&self, strength: u32) {
        self.core.poison(strength);
    }

    pub(crate) fn core(&self) -> &Arc<Core<T>> {
        &self.core
    }
}

/// The reading end of a rendezvous channel.
#[derive(Debug)]
pub struct ChanIn<T> {
    core: Arc<Core<T>>,
}

impl<T: Send> ChanIn<T> {
    /// Reads a value, blocking until a writer arrives, and releases the
    /// writer.
    pub fn read(&mut self, cx: &Cx) -> Result<T> {
        self.core.read(cx)
    }

    /// Claims a value without releasing the writer (extended rendezvous).
    ///
    /// Exactly one [`ChanIn::end_read`] must follow.
    pub fn start_read(&mut self, cx: &Cx) -> Result<T> {
        self.core.start_read(cx)
    }

    /// Releases the writer blocked since the matching
    /// [`ChanIn::start_read`].
    pub fn end_read(&mut self) -> Result<()> {
        self.core.end_read()
    }

    /// Returns true if a `read` would complete without blocking (a value or
    /// poison is waiting).
    #[must_use]
    pub fn pending(&self) -> bool {
        self.core.pending()
    }

    /// Injects poison of the given strength (forwarded only past the
    /// channel's immunity).
    pub fn poison(&self, strength: u32) {
        self.core.poison(strength);
    }

    /// Creates a selection guard for this input.
    #[must_use]
    pub fn guard(&self) -> InputGuard<T> {
        InputGuard {
            core: Arc::clone(&self.core),
        }
    }

    pub(crate) fn core(&self) -> &Arc<Core<T>> {
        &self.core
    }
}

/// Selection guard over a channel input.
#[derive(Debug)]
pub struct InputGuard<T> {
    core: Arc<Core<T>>,
}

impl<T: Send> Guard for InputGuard<T> {
    fn enable(&mut self, waker: &AltWaker) -> Result<EnableResult> {
        Ok(self.core.reader_enable(waker))
    }

    fn disable(&mut self) -> Result<bool> {
        Ok(self.core.reader_disable())
    }
}
