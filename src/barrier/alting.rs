//! Barrier whose synchronization is offerable to a selection.
//!
//! One shared base serves a family of [`AltingBarrier`] front-ends, one per
//! enrolled process. A front-end offers the barrier to an
//! [`Alternative`](crate::alt::Alternative) like any other guard; the offer
//! that drives the outstanding count to zero completes the barrier for
//! everyone, converts the coordination fence into a disable wave
//! ([`AltingBarrierCoordinate`]), and schedules every other offering
//! front-end. All parties then select the barrier in the same round.
//!
//! Front-ends live in indexed arena slots under the base's monitor. Each
//! slot records its enrollment, any in-flight offer, the completion flag
//! consumed by the owning selection's disable pass, and the owner token:
//! a front-end binds to the first thread that uses it, and hand-off to
//! another process requires an explicit [`AltingBarrier::mark`] (or
//! [`AltingBarrier::reset`] before the move).
//!
//! Lock order: base monitor, then coordinate monitor; alt monitors are only
//! ever taken leaf-most from `schedule`. Invariant throughout:
//! `0 <= countdown <= enrolled`.

use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;
use std::time::Duration;

use crate::alt::{AltWaker, Alternative};
use crate::barrier::coordinate::AltingBarrierCoordinate;
use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::guard::{EnableResult, Guard};
use crate::timer::Timer;

#[derive(Debug)]
struct Slot {
    /// False once the front-end has been contracted away.
    live: bool,
    /// Enrolled (offers count) vs. resigned.
    enrolled: bool,
    /// Thread bound to this front-end; `None` until first use or after
    /// `reset`.
    owner: Option<ThreadId>,
    /// The selection currently offering through this front-end.
    waker: Option<AltWaker>,
    /// The barrier completed while this offer was in flight; consumed by
    /// the owning selection's disable pass.
    completed: bool,
}

impl Slot {
    fn fresh() -> Self {
        Self {
            live: true,
            enrolled: true,
            owner: None,
            waker: None,
            completed: false,
        }
    }

    fn offering(&self) -> bool {
        self.waker.is_some() || self.completed
    }
}

#[derive(Debug)]
struct BaseState {
    enrolled: usize,
    countdown: usize,
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl BaseState {
    fn allocate(&mut self) -> usize {
        if let Some(idx) = self.free.pop() {
            self.slots[idx] = Slot::fresh();
            idx
        } else {
            self.slots.push(Slot::fresh());
            self.slots.len() - 1
        }
    }

    /// Validates liveness and ownership, binding the owner on first use.
    fn check_usable(&mut self, idx: usize) -> Result<()> {
        let slot = &mut self.slots[idx];
        if !slot.live {
            return Err(Error::new(ErrorKind::FrontEndResigned)
                .with_message("front-end has been contracted"));
        }
        let me = std::thread::current().id();
        match slot.owner {
            None => {
                slot.owner = Some(me);
                Ok(())
            }
            Some(owner) if owner == me => Ok(()),
            Some(_) => Err(Error::wrong_owner("alting barrier front-end")),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Base {
    inner: Mutex<BaseState>,
    coordinate: Arc<AltingBarrierCoordinate>,
}

/// Outcome of an offer.
enum Offer {
    /// This offer completed the barrier for every party.
    Completed,
    /// The offer is parked; a completion will schedule the waker.
    Waiting,
}

impl Base {
    fn new(coordinate: Arc<AltingBarrierCoordinate>, parties: usize) -> Arc<Self> {
        let mut state = BaseState {
            enrolled: parties,
            countdown: parties,
            slots: Vec::with_capacity(parties),
            free: Vec::new(),
        };
        for _ in 0..parties {
            state.slots.push(Slot::fresh());
        }
        Arc::new(Self {
            inner: Mutex::new(state),
            coordinate,
        })
    }

    fn lock(&self) -> MutexGuard<'_, BaseState> {
        self.inner.lock().expect("alting barrier lock poisoned")
    }

    /// Schedules every enrolled front-end except `except`, marking each
    /// completed. Caller has just driven `countdown` to zero, so every one
    /// of them must hold a parked offer.
    fn broadcast(state: &mut BaseState, except: Option<usize>) -> Result<()> {
        for (idx, slot) in state.slots.iter_mut().enumerate() {
            if !slot.live || !slot.enrolled || Some(idx) == except {
                continue;
            }
            slot.completed = true;
            match slot.waker.take() {
                Some(waker) => waker.schedule(),
                None => {
                    return Err(Error::internal(
                        "barrier completed with an enrolled party not offering",
                    ))
                }
            }
        }
        Ok(())
    }

    /// Registers an offer from an enable sequence (which already holds the
    /// coordination fence).
    fn enable(&self, idx: usize, waker: &AltWaker) -> Result<Offer> {
        let mut state = self.lock();
        state.check_usable(idx)?;
        if !state.slots[idx].enrolled {
            return Err(Error::new(ErrorKind::FrontEndResigned)
                .with_message("resigned front-end offered to a selection"));
        }
        if state.slots[idx].offering() {
            return Err(Error::new(ErrorKind::OfferInFlight)
                .with_message("front-end offered twice in one selection"));
        }
        if state.countdown == 0 {
            return Err(Error::internal("offer with countdown already zero"));
        }
        state.countdown -= 1;
        if state.countdown == 0 {
            state.countdown = state.enrolled;
            self.coordinate.start_disable(state.enrolled)?;
            Self::broadcast(&mut state, Some(idx))?;
            tracing::debug!(parties = state.enrolled, "alting barrier completed");
            Ok(Offer::Completed)
        } else {
            state.slots[idx].waker = Some(waker.clone());
            Ok(Offer::Waiting)
        }
    }

    /// Withdraws an offer, unless the barrier completed first.
    fn disable(&self, idx: usize) -> Result<bool> {
        let mut state = self.lock();
        if !state.slots[idx].live {
            return Err(Error::internal("disable on a contracted front-end"));
        }
        if state.slots[idx].completed {
            state.slots[idx].completed = false;
            return Ok(true);
        }
        if state.slots[idx].waker.take().is_some() {
            state.countdown += 1;
            if state.countdown > state.enrolled {
                return Err(Error::internal("countdown overtook enrollment"));
            }
            return Ok(false);
        }
        Err(Error::internal("disable without a matching offer"))
    }

    fn enroll(&self, idx: usize) -> Result<()> {
        let mut state = self.lock();
        state.check_usable(idx)?;
        if state.slots[idx].enrolled {
            return Err(Error::new(ErrorKind::AlreadyEnrolled)
                .with_message("enroll on an enrolled front-end"));
        }
        state.slots[idx].enrolled = true;
        state.enrolled += 1;
        state.countdown += 1;
        Ok(())
    }

    /// Resigns the front-end. A resignation that leaves every remaining
    /// party offering completes the barrier; that path runs under the
    /// coordination fence, re-checked once the fence is held.
    fn resign(&self, idx: usize, cx: &Cx) -> Result<()> {
        loop {
            let mut state = self.lock();
            state.check_usable(idx)?;
            if !state.slots[idx].enrolled {
                return Err(Error::new(ErrorKind::NotEnrolled)
                    .with_message("resign without a matching enrollment"));
            }
            if state.slots[idx].offering() {
                return Err(Error::new(ErrorKind::OfferInFlight)
                    .with_message("resign with a selection offer in flight"));
            }
            if state.countdown > 1 || state.enrolled == 1 {
                // Cannot complete (or nobody is left to release).
                state.slots[idx].enrolled = false;
                state.enrolled -= 1;
                state.countdown -= 1;
                if state.countdown == 0 {
                    state.countdown = state.enrolled;
                }
                return Ok(());
            }

            // This resignation would complete the barrier: take the fence
            // first, then re-check, since offers may have been withdrawn in
            // the meantime.
            drop(state);
            self.coordinate.start_enable(cx)?;
            let mut state = self.lock();
            if !state.slots[idx].live || !state.slots[idx].enrolled {
                // Contracted away while we waited for the fence.
                drop(state);
                self.coordinate.finish_enable()?;
                return Err(Error::new(ErrorKind::FrontEndResigned)
                    .with_message("front-end contracted while resigning"));
            }
            if state.countdown != 1 || state.enrolled == 1 {
                drop(state);
                self.coordinate.finish_enable()?;
                continue;
            }
            state.slots[idx].enrolled = false;
            state.enrolled -= 1;
            state.countdown = state.enrolled;
            self.coordinate.start_disable(state.enrolled)?;
            Self::broadcast(&mut state, None)?;
            tracing::debug!(
                parties = state.enrolled,
                "resignation completed the alting barrier"
            );
            return Ok(());
        }
    }

    fn expand(&self, idx: usize, extra: usize) -> Result<Vec<usize>> {
        let mut state = self.lock();
        state.check_usable(idx)?;
        if extra == 0 {
            return Err(Error::new(ErrorKind::BadEnrollment)
                .with_message("expand by zero front-ends"));
        }
        let mut created = Vec::with_capacity(extra);
        for _ in 0..extra {
            created.push(state.allocate());
        }
        state.enrolled += extra;
        state.countdown += extra;
        Ok(created)
    }

    /// Unlinks the given front-ends. `caller` is checked for ownership when
    /// this is not a self-contract. A contract that leaves every remaining
    /// party offering completes the barrier under the fence, like `resign`.
    fn contract(&self, cx: &Cx, caller: Option<usize>, victims: &[usize]) -> Result<()> {
        let mut fenced = false;
        loop {
            let mut state = self.lock();
            if let Err(err) = Self::validate_contract(&mut state, caller, victims) {
                drop(state);
                if fenced {
                    self.coordinate.finish_enable()?;
                }
                return Err(err);
            }
            let removed = victims
                .iter()
                .filter(|&&victim| state.slots[victim].enrolled)
                .count();
            let completing =
                removed > 0 && state.countdown == removed && state.enrolled > removed;

            if completing && !fenced {
                drop(state);
                self.coordinate.start_enable(cx)?;
                fenced = true;
                continue;
            }
            if !completing && fenced {
                // Offers were withdrawn while we waited for the fence.
                self.coordinate.finish_enable()?;
                fenced = false;
            }

            for &victim in victims {
                let slot = &mut state.slots[victim];
                slot.live = false;
                slot.enrolled = false;
                slot.owner = None;
                state.free.push(victim);
            }
            state.enrolled -= removed;
            state.countdown -= removed;
            if state.countdown == 0 && state.enrolled > 0 {
                state.countdown = state.enrolled;
                self.coordinate.start_disable(state.enrolled)?;
                Self::broadcast(&mut state, None)?;
                tracing::debug!(
                    parties = state.enrolled,
                    "contract completed the alting barrier"
                );
            }
            return Ok(());
        }
    }

    fn validate_contract(
        state: &mut BaseState,
        caller: Option<usize>,
        victims: &[usize],
    ) -> Result<()> {
        if let Some(caller_idx) = caller {
            state.check_usable(caller_idx)?;
        }
        for &victim in victims {
            let slot = &state.slots[victim];
            if !slot.live {
                return Err(Error::new(ErrorKind::FrontEndResigned)
                    .with_message("contract of an already-contracted front-end"));
            }
            if slot.offering() {
                return Err(Error::new(ErrorKind::OfferInFlight)
                    .with_message("contract of a front-end with an offer in flight"));
            }
        }
        Ok(())
    }

    fn mark(&self, idx: usize) -> Result<()> {
        let mut state = self.lock();
        if !state.slots[idx].live {
            return Err(Error::new(ErrorKind::FrontEndResigned)
                .with_message("mark of a contracted front-end"));
        }
        if state.slots[idx].offering() {
            return Err(Error::new(ErrorKind::OfferInFlight)
                .with_message("mark with a selection offer in flight"));
        }
        state.slots[idx].owner = Some(std::thread::current().id());
        Ok(())
    }

    fn reset_owner(&self, idx: usize) -> Result<()> {
        let mut state = self.lock();
        if !state.slots[idx].live {
            return Err(Error::new(ErrorKind::FrontEndResigned)
                .with_message("reset of a contracted front-end"));
        }
        if state.slots[idx].offering() {
            return Err(Error::new(ErrorKind::OfferInFlight)
                .with_message("reset with a selection offer in flight"));
        }
        state.slots[idx].owner = None;
        Ok(())
    }

    pub(crate) fn coordinate(&self) -> &Arc<AltingBarrierCoordinate> {
        &self.coordinate
    }
}

/// One process's private handle onto a shared alting barrier.
#[derive(Debug)]
pub struct AltingBarrier {
    base: Arc<Base>,
    idx: usize,
    single_alt: Option<Alternative>,
    poll_alt: Option<(Alternative, Timer)>,
}

impl AltingBarrier {
    /// Creates a family of `parties` front-ends over one new barrier,
    /// coordinated under `cx`'s scope. Distribute one front-end to each
    /// process; they are not shareable.
    pub fn create(cx: &Cx, parties: usize) -> Result<Vec<Self>> {
        if parties == 0 {
            return Err(Error::new(ErrorKind::BadEnrollment)
                .with_message("alting barrier needs at least one party"));
        }
        let base = Base::new(Arc::clone(cx.coordinate()), parties);
        Ok((0..parties)
            .map(|idx| Self::from_parts(Arc::clone(&base), idx))
            .collect())
    }

    fn from_parts(base: Arc<Base>, idx: usize) -> Self {
        Self {
            base,
            idx,
            single_alt: None,
            poll_alt: None,
        }
    }

    /// Creates a selection guard for this front-end.
    #[must_use]
    pub fn guard(&self) -> AltingBarrierGuard {
        AltingBarrierGuard {
            base: Arc::clone(&self.base),
            idx: self.idx,
            fired: false,
        }
    }

    /// Appends `extra` newly-enrolled front-ends for distribution to forked
    /// processes.
    pub fn expand(&self, extra: usize) -> Result<Vec<Self>> {
        let created = self.base.expand(self.idx, extra)?;
        Ok(created
            .into_iter()
            .map(|idx| Self::from_parts(Arc::clone(&self.base), idx))
            .collect())
    }

    /// Appends one newly-enrolled front-end.
    pub fn expand_one(&self) -> Result<Self> {
        let mut created = self.expand(1)?;
        match created.pop() {
            Some(front_end) => Ok(front_end),
            None => Err(Error::internal("expand(1) produced no front-end")),
        }
    }

    /// Unlinks and invalidates the given sibling front-ends. Completes the
    /// barrier if every remaining party is already offering.
    pub fn contract(&self, cx: &Cx, set: Vec<Self>) -> Result<()> {
        if set.is_empty() {
            return Err(Error::new(ErrorKind::BadEnrollment)
                .with_message("contract of an empty front-end set"));
        }
        let mut victims = Vec::with_capacity(set.len());
        for front_end in &set {
            if !Arc::ptr_eq(&front_end.base, &self.base) {
                return Err(Error::new(ErrorKind::ForeignFrontEnd)
                    .with_message("contract of a front-end from another barrier"));
            }
            victims.push(front_end.idx);
        }
        self.base.contract(cx, Some(self.idx), &victims)
    }

    /// Unlinks this front-end itself.
    pub fn contract_self(self, cx: &Cx) -> Result<()> {
        self.base.contract(cx, None, &[self.idx])
    }

    /// Re-enrolls a resigned front-end.
    pub fn enroll(&self) -> Result<()> {
        self.base.enroll(self.idx)
    }

    /// Resigns from the barrier; the remaining parties can then complete
    /// without this front-end (a completing resignation releases them).
    pub fn resign(&self, cx: &Cx) -> Result<()> {
        self.base.resign(self.idx, cx)
    }

    /// Claims this front-end for the calling thread after a hand-off.
    pub fn mark(&self) -> Result<()> {
        self.base.mark(self.idx)
    }

    /// Clears the owner binding so the next using thread claims it.
    pub fn reset(&self) -> Result<()> {
        self.base.reset_owner(self.idx)
    }

    /// Synchronizes unconditionally: a one-guard selection over this
    /// front-end.
    pub fn sync(&mut self, cx: &Cx) -> Result<()> {
        if self.single_alt.is_none() {
            self.single_alt = Some(Alternative::new(vec![Box::new(self.guard())])?);
        }
        let Some(alt) = self.single_alt.as_mut() else {
            return Err(Error::internal("sync selection missing after init"));
        };
        let selected = alt.pri_select(cx)?;
        if selected != 0 {
            return Err(Error::internal(
                "single-guard selection chose a foreign index",
            ));
        }
        Ok(())
    }

    /// Offers to synchronize for at most `timeout`; true if the barrier
    /// completed, false if the offer timed out and was withdrawn.
    pub fn poll(&mut self, cx: &Cx, timeout: Duration) -> Result<bool> {
        if self.poll_alt.is_none() {
            let timer = Timer::new();
            let alt = Alternative::new(vec![
                Box::new(self.guard()),
                Box::new(timer.clone()),
            ])?;
            self.poll_alt = Some((alt, timer));
        }
        let Some((alt, timer)) = self.poll_alt.as_mut() else {
            return Err(Error::internal("poll selection missing after init"));
        };
        timer.after(timeout);
        Ok(alt.pri_select(cx)? == 0)
    }
}

/// Selection guard over an alting barrier front-end.
#[derive(Debug)]
pub struct AltingBarrierGuard {
    base: Arc<Base>,
    idx: usize,
    fired: bool,
}

impl Guard for AltingBarrierGuard {
    fn enable(&mut self, waker: &AltWaker) -> Result<EnableResult> {
        match self.base.enable(self.idx, waker)? {
            Offer::Completed => {
                self.fired = true;
                Ok(EnableResult::Ready)
            }
            Offer::Waiting => Ok(EnableResult::Pending),
        }
    }

    fn disable(&mut self) -> Result<bool> {
        let completed = self.base.disable(self.idx)?;
        if completed {
            self.fired = true;
        }
        Ok(completed)
    }

    fn barrier_coordinate(&self) -> Option<Arc<AltingBarrierCoordinate>> {
        Some(Arc::clone(self.base.coordinate()))
    }

    fn take_barrier_fired(&mut self) -> bool {
        std::mem::take(&mut self.fired)
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
    fn create_requires_at_least_one_party() {
        init_test("create_requires_at_least_one_party");
        let cx = Cx::for_testing();
        let err = AltingBarrier::create(&cx, 0).expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::BadEnrollment);
        crate::test_complete!("create_requires_at_least_one_party");
    }

    #[test]
    fn single_party_sync_completes_alone() {
        init_test("single_party_sync_completes_alone");
        let cx = Cx::for_testing();
        let mut family = AltingBarrier::create(&cx, 1).expect("create failed");
        let Some(mut only) = family.pop() else {
            unreachable!("create(1) returned no front-end");
        };
        only.sync(&cx).expect("sync failed");
        only.sync(&cx).expect("second cycle failed");
        assert_eq!(cx.coordinate().active_for_testing(), 0);
        crate::test_complete!("single_party_sync_completes_alone");
    }

    #[test]
    fn front_end_binds_to_its_first_thread() {
        init_test("front_end_binds_to_its_first_thread");
        let cx = Cx::for_testing();
        let family = AltingBarrier::create(&cx, 2).expect("create failed");
        let fe = &family[0];
        fe.resign(&cx).expect("resign failed");

        let err = std::thread::scope(|scope| {
            scope
                .spawn(|| fe.enroll().expect_err("expected wrong owner"))
                .join()
                .expect("thread failed")
        });
        assert_eq!(err.kind(), ErrorKind::WrongOwner);

        // Release the binding, and the next thread may claim it.
        fe.reset().expect("reset failed");
        std::thread::scope(|scope| {
            scope
                .spawn(|| {
                    fe.mark().expect("mark failed");
                    fe.enroll().expect("enroll after mark failed");
                })
                .join()
                .expect("thread failed");
        });
        crate::test_complete!("front_end_binds_to_its_first_thread");
    }

    #[test]
    fn resign_and_enroll_track_enrollment() {
        init_test("resign_and_enroll_track_enrollment");
        let cx = Cx::for_testing();
        let family = AltingBarrier::create(&cx, 2).expect("create failed");
        let fe = &family[0];
        fe.resign(&cx).expect("resign failed");
        let err = fe.resign(&cx).expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::NotEnrolled);
        fe.enroll().expect("enroll failed");
        let err = fe.enroll().expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::AlreadyEnrolled);
        crate::test_complete!("resign_and_enroll_track_enrollment");
    }

    #[test]
    fn contract_rejects_foreign_front_ends() {
        init_test("contract_rejects_foreign_front_ends");
        let cx = Cx::for_testing();
        let family_a = AltingBarrier::create(&cx, 2).expect("create failed");
        let mut family_b = AltingBarrier::create(&cx, 1).expect("create failed");
        let Some(stranger) = family_b.pop() else {
            unreachable!("create(1) returned no front-end");
        };
        let err = family_a[0]
            .contract(&cx, vec![stranger])
            .expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::ForeignFrontEnd);
        crate::test_complete!("contract_rejects_foreign_front_ends");
    }

    #[test]
    fn expand_and_contract_adjust_the_family() {
        init_test("expand_and_contract_adjust_the_family");
        let cx = Cx::for_testing();
        let mut family = AltingBarrier::create(&cx, 1).expect("create failed");
        let Some(mut keeper) = family.pop() else {
            unreachable!("create(1) returned no front-end");
        };
        let extras = keeper.expand(2).expect("expand failed");
        assert_eq!(extras.len(), 2);
        keeper.contract(&cx, extras).expect("contract failed");
        // Back to a single party: sync completes alone again.
        keeper.sync(&cx).expect("sync after contract failed");
        crate::test_complete!("expand_and_contract_adjust_the_family");
    }

    #[test]
    fn contracted_front_end_is_dead() {
        init_test("contracted_front_end_is_dead");
        let cx = Cx::for_testing();
        let mut family = AltingBarrier::create(&cx, 2).expect("create failed");
        let Some(victim) = family.pop() else {
            unreachable!("create(2) returned one front-end");
        };
        let Some(mut keeper) = family.pop() else {
            unreachable!("create(2) returned no front-end");
        };
        let victim_guard = victim.guard();
        keeper.contract(&cx, vec![victim]).expect("contract failed");

        let mut victim_guard = victim_guard;
        let waker = crate::alt::signal_for_testing();
        let err = victim_guard.enable(&waker).expect_err("expected misuse");
        assert_eq!(err.kind(), ErrorKind::FrontEndResigned);
        keeper.sync(&cx).expect("sync after contract failed");
        crate::test_complete!("contracted_front_end_is_dead");
    }
}
