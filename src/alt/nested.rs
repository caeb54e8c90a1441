//! A guard wrapping an inner guard set, selectable as one event.
//!
//! The inner set enables in priority order against the *outer* selection's
//! waker, so an inner event wakes the outer process directly. When an inner
//! guard is ready at enable time, the earlier inner offers are withdrawn on
//! the spot (an enable that reports ready must leave no residue) using the
//! same reverse walk and last-found-wins tie-break as the outer engine.
//! After the outer selection commits this guard, [`NestedAlternative::selected`]
//! reports which inner guard fired.
//!
//! Alting barriers may not nest: their fence accounting belongs to the
//! outer engine alone, and a nested set containing one is rejected at
//! construction.
//!
//! To keep the inner selection queryable after the nested set is boxed
//! into an outer [`Alternative`](crate::alt::Alternative), `Guard` is also
//! implemented for `Arc<Mutex<NestedAlternative>>`: box a clone of the
//! handle, keep the original, and read
//! [`NestedAlternative::selected`] through it once the round commits.

use std::sync::{Arc, Mutex};

use crate::alt::AltWaker;
use crate::error::{Error, ErrorKind, Result};
use crate::guard::{EnableResult, Guard};

/// An inner guard set offered to an outer selection as a single guard.
pub struct NestedAlternative {
    guards: Vec<Box<dyn Guard>>,
    enabled: Vec<bool>,
    selected: Option<usize>,
}

impl core::fmt::Debug for NestedAlternative {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NestedAlternative")
            .field("guards", &self.guards.len())
            .field("selected", &self.selected)
            .finish_non_exhaustive()
    }
}

impl NestedAlternative {
    /// Builds a nested guard set (at least one inner guard, no alting
    /// barriers).
    pub fn new(guards: Vec<Box<dyn Guard>>) -> Result<Self> {
        if guards.is_empty() {
            return Err(Error::new(ErrorKind::EmptyGuardSet)
                .with_message("nested selection needs at least one guard"));
        }
        if guards.iter().any(|g| g.barrier_coordinate().is_some()) {
            return Err(Error::new(ErrorKind::NestedBarrier)
                .with_message("alting barriers cannot join a nested selection"));
        }
        let count = guards.len();
        Ok(Self {
            guards,
            enabled: vec![false; count],
            selected: None,
        })
    }

    /// The inner guard that fired in the round that committed this nested
    /// set; `None` while no round has committed it.
    #[must_use]
    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Withdraws inner offers made before `stop`, letting a later-found
    /// ready guard overwrite the running selection.
    fn unwind(&mut self, stop: usize, selected: &mut Option<usize>) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for index in (0..stop).rev() {
            if !self.enabled[index] {
                continue;
            }
            self.enabled[index] = false;
            match self.guards[index].disable() {
                Ok(true) => *selected = Some(index),
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

impl Guard for NestedAlternative {
    fn enable(&mut self, waker: &AltWaker) -> Result<EnableResult> {
        self.selected = None;
        for flag in &mut self.enabled {
            *flag = false;
        }
        let mut deadline = None;
        for index in 0..self.guards.len() {
            match self.guards[index].enable(waker) {
                Ok(EnableResult::Ready) => {
                    let mut selected = Some(index);
                    self.unwind(index, &mut selected)?;
                    self.selected = selected;
                    return Ok(EnableResult::Ready);
                }
                Ok(EnableResult::Pending) => self.enabled[index] = true,
                Ok(EnableResult::Deadline(at)) => {
                    self.enabled[index] = true;
                    deadline = Some(deadline.map_or(at, |d: std::time::Instant| d.min(at)));
                }
                Err(err) => {
                    let mut ignored = None;
                    if let Err(unwind_err) = self.unwind(index, &mut ignored) {
                        tracing::debug!(error = %unwind_err, "nested unwind after failed enable");
                    }
                    return Err(err);
                }
            }
        }
        Ok(match deadline {
            Some(at) => EnableResult::Deadline(at),
            None => EnableResult::Pending,
        })
    }

    fn disable(&mut self) -> Result<bool> {
        let mut selected = None;
        self.unwind(self.guards.len(), &mut selected)?;
        self.selected = selected;
        Ok(selected.is_some())
    }
}

impl Guard for Arc<Mutex<NestedAlternative>> {
    fn enable(&mut self, waker: &AltWaker) -> Result<EnableResult> {
        self.lock()
            .expect("nested selection lock poisoned")
            .enable(waker)
    }

    fn disable(&mut self) -> Result<bool> {
        self.lock()
            .expect("nested selection lock poisoned")
            .disable()
    }
}
