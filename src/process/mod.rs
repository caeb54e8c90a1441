//! Fork-join composition of processes over a reusable worker pool.
//!
//! [`Parallel`] owns a set of processes and runs them all concurrently per
//! [`Parallel::run`] invocation: all but the last on pooled worker threads,
//! the last on the caller's thread. A private [`Barrier`] enrolling every
//! branch holds `run` until the whole invocation has finished.
//!
//! Workers are parked between invocations and re-targeted with new process
//! references, never respawned per run. Membership edits
//! ([`Parallel::add_process`], [`Parallel::remove_process`]) take effect on
//! the next invocation only — `run` borrows the composition exclusively.
//!
//! The first branch to fail (an error, or a caught panic) cancels the
//! invocation's shared scope, interrupting blocked siblings; `run` returns
//! that first fault once every branch has joined.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::barrier::Barrier;
use crate::cx::Cx;
use crate::error::{Error, Result};

/// How often a parked worker re-checks for work and shutdown.
const WORKER_PARK_TICK: Duration = Duration::from_millis(100);

/// A unit of sequential behavior composable under [`Parallel`].
pub trait Process: Send {
    /// Runs the process to completion under the given scope.
    fn run(&mut self, cx: &Cx) -> Result<()>;
}

impl<F> Process for F
where
    F: FnMut(&Cx) -> Result<()> + Send,
{
    fn run(&mut self, cx: &Cx) -> Result<()> {
        self(cx)
    }
}

/// A process parked in a slot so a worker can borrow it for one run.
struct ProcessSlot {
    cell: Mutex<Option<Box<dyn Process>>>,
}

/// Everything one branch needs: its process, the invocation's scopes, the
/// join barrier, and the shared first-fault cell.
struct ParTask {
    process: Arc<ProcessSlot>,
    run_cx: Cx,
    join_cx: Cx,
    barrier: Arc<Barrier>,
    fault: Arc<Mutex<Option<Error>>>,
}

/// Runs one branch to completion and joins the invocation barrier.
///
/// The barrier sync uses the invocation's separate join scope so a fault
/// cancelling `run_cx` cannot strand the join itself.
fn run_branch(task: &ParTask) {
    let result = {
        let mut cell = task.process.cell.lock().expect("process slot poisoned");
        match cell.as_mut() {
            Some(process) => {
                match catch_unwind(AssertUnwindSafe(|| process.run(&task.run_cx))) {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::internal("process panicked")),
                }
            }
            None => Err(Error::internal("process slot empty at dispatch")),
        }
    };
    if let Err(err) = result {
        let mut fault = task.fault.lock().expect("fault slot poisoned");
        if fault.is_none() {
            tracing::warn!(error = %err, "parallel branch failed; cancelling siblings");
            *fault = Some(err);
            task.run_cx.cancel();
        }
    }
    if let Err(err) = task.barrier.sync(&task.join_cx) {
        tracing::error!(error = %err, "parallel join barrier failed");
    }
}

struct PoolShared {
    queue: SegQueue<ParTask>,
    shutdown: AtomicBool,
    park: Mutex<()>,
    wake: Condvar,
}

fn worker_loop(shared: &PoolShared) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        if let Some(task) = shared.queue.pop() {
            run_branch(&task);
            continue;
        }
        let parked = shared.park.lock().expect("worker park lock poisoned");
        // Re-check under the lock so a submission between the failed pop
        // and parking is not slept through.
        if shared.shutdown.load(Ordering::Acquire) || !shared.queue.is_empty() {
            continue;
        }
        let (parked, _) = shared
            .wake
            .wait_timeout(parked, WORKER_PARK_TICK)
            .expect("worker park lock poisoned");
        drop(parked);
    }
}

struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    fn new() -> Self {
        Self {
            shared: Arc::new(PoolShared {
                queue: SegQueue::new(),
                shutdown: AtomicBool::new(false),
                park: Mutex::new(()),
                wake: Condvar::new(),
            }),
            handles: Vec::new(),
        }
    }

    /// Grows the pool to at least `needed` parked workers (never shrinks).
    fn ensure_workers(&mut self, needed: usize) -> Result<()> {
        self.shared.shutdown.store(false, Ordering::Release);
        while self.handles.len() < needed {
            let shared = Arc::clone(&self.shared);
            let handle = std::thread::Builder::new()
                .name(format!("cspkit-par-{}", self.handles.len()))
                .spawn(move || worker_loop(&shared))
                .map_err(|err| {
                    Error::internal(format!("failed to spawn worker thread: {err}"))
                })?;
            self.handles.push(handle);
        }
        Ok(())
    }

    fn submit(&self, task: ParTask) {
        self.shared.queue.push(task);
        let _parked = self.shared.park.lock().expect("worker park lock poisoned");
        self.shared.wake.notify_one();
    }

    fn shutdown(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _parked = self.shared.park.lock().expect("worker park lock poisoned");
            self.shared.wake.notify_all();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("parallel worker thread panicked");
            }
        }
    }
}

/// Concurrent composition of processes with a reusable worker pool.
pub struct Parallel {
    processes: Vec<Box<dyn Process>>,
    pool: WorkerPool,
}

impl core::fmt::Debug for Parallel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Parallel")
            .field("processes", &self.processes.len())
            .field("workers", &self.pool.handles.len())
            .finish_non_exhaustive()
    }
}

impl Default for Parallel {
    fn default() -> Self {
        Self::new()
    }
}

impl Parallel {
    /// Creates an empty composition.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: Vec::new(),
            pool: WorkerPool::new(),
        }
    }

    /// Appends a process; takes effect on the next [`Parallel::run`].
    pub fn add_process(&mut self, process: impl Process + 'static) {
        self.processes.push(Box::new(process));
    }

    /// Removes and returns the process at `index`; takes effect on the next
    /// [`Parallel::run`].
    pub fn remove_process(&mut self, index: usize) -> Option<Box<dyn Process>> {
        if index < self.processes.len() {
            Some(self.processes.remove(index))
        } else {
            None
        }
    }

    /// Number of composed processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// True when no processes are composed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Runs every composed process concurrently; returns once all have
    /// finished. The first fault cancels the invocation's scope and is
    /// returned after the join.
    pub fn run(&mut self, cx: &Cx) -> Result<()> {
        let count = self.processes.len();
        if count == 0 {
            return Ok(());
        }
        cx.checkpoint("parallel run")?;
        let run_cx = cx.child("parallel");
        let join_cx = Cx::new("parallel-join");
        let barrier = Arc::new(Barrier::new(count));
        let fault = Arc::new(Mutex::new(None));
        let slots: Vec<Arc<ProcessSlot>> = self
            .processes
            .drain(..)
            .map(|process| {
                Arc::new(ProcessSlot {
                    cell: Mutex::new(Some(process)),
                })
            })
            .collect();

        self.pool.ensure_workers(count - 1)?;
        for slot in slots.iter().take(count - 1) {
            self.pool.submit(ParTask {
                process: Arc::clone(slot),
                run_cx: run_cx.clone(),
                join_cx: join_cx.clone(),
                barrier: Arc::clone(&barrier),
                fault: Arc::clone(&fault),
            });
        }
        run_branch(&ParTask {
            process: Arc::clone(&slots[count - 1]),
            run_cx,
            join_cx,
            barrier,
            fault: Arc::clone(&fault),
        });

        // Every branch has synced; reclaim the processes for the next run.
        for slot in slots {
            let mut cell = slot.cell.lock().expect("process slot poisoned");
            match cell.take() {
                Some(process) => self.processes.push(process),
                None => return Err(Error::internal("process missing after join")),
            }
        }
        let mut fault = fault.lock().expect("fault slot poisoned");
        match fault.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Retires the pooled worker threads. The composition may be run again;
    /// workers respawn on demand.
    pub fn release_resources(&mut self) {
        self.pool.shutdown();
    }
}

impl Drop for Parallel {
    fn drop(&mut self) {
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;
    use std::sync::atomic::AtomicUsize;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn every_process_runs_once_per_invocation() {
        init_test("every_process_runs_once_per_invocation");
        let cx = Cx::for_testing();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut par = Parallel::new();
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            par.add_process(move |_cx: &Cx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        par.run(&cx).expect("run failed");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        par.run(&cx).expect("second run failed");
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        crate::test_complete!("every_process_runs_once_per_invocation");
    }

    #[test]
    fn membership_changes_apply_to_the_next_run() {
        init_test("membership_changes_apply_to_the_next_run");
        let cx = Cx::for_testing();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut par = Parallel::new();
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            par.add_process(move |_cx: &Cx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        par.run(&cx).expect("run failed");
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        assert!(par.remove_process(0).is_some());
        par.run(&cx).expect("second run failed");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(par.len(), 1);
        crate::test_complete!("membership_changes_apply_to_the_next_run");
    }

    #[test]
    fn first_fault_cancels_the_siblings() {
        init_test("first_fault_cancels_the_siblings");
        let cx = Cx::for_testing();
        let mut par = Parallel::new();
        let (mut tx, _rx) = crate::channel::one2one::<u32>();
        // This branch blocks forever unless the invocation scope is
        // cancelled from the failing sibling.
        par.add_process(move |cx: &Cx| match tx.write(cx, 1) {
            Ok(()) => Ok(()),
            Err(err) => Err(err),
        });
        par.add_process(|_cx: &Cx| {
            Err(Error::internal("deliberate fault"))
        });

        let err = par.run(&cx).expect_err("expected the branch fault");
        assert_eq!(
            err.kind(),
            crate::error::ErrorKind::InvariantViolation,
            "first fault must win: {err}"
        );
        // The caller's own scope is untouched.
        assert!(!cx.is_cancel_requested());
        crate::test_complete!("first_fault_cancels_the_siblings");
    }

    #[test]
    fn panicking_process_is_reported_not_propagated() {
        init_test("panicking_process_is_reported_not_propagated");
        let cx = Cx::for_testing();
        let mut par = Parallel::new();
        par.add_process(|_cx: &Cx| -> Result<()> { panic!("boom") });
        let err = par.run(&cx).expect_err("expected a fault");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvariantViolation);
        crate::test_complete!("panicking_process_is_reported_not_propagated");
    }

    #[test]
    fn release_resources_allows_reuse() {
        init_test("release_resources_allows_reuse");
        let cx = Cx::for_testing();
        let counter = Arc::new(AtomicUsize::new(0));
        let mut par = Parallel::new();
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            par.add_process(move |_cx: &Cx| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }
        par.run(&cx).expect("run failed");
        par.release_resources();
        par.run(&cx).expect("run after release failed");
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        crate::test_complete!("release_resources_allows_reuse");
    }
}
