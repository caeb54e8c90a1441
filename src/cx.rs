//! Process context: cancellation token and runtime-wide coordination handle.
//!
//! Every blocking operation in this crate takes a [`Cx`]. It serves two
//! purposes:
//!
//! - **Cancellation**: a process is cancelled by flagging its `Cx` (or any
//!   ancestor). Blocking primitives poll the flag inside their condition-wait
//!   loops and surface [`ErrorKind::Cancelled`](crate::error::ErrorKind) —
//!   a fatal abort, never retried internally.
//! - **Coordination scope**: the `Cx` root owns the
//!   [`AltingBarrierCoordinate`] shared by every alting barrier created under
//!   it, so each runtime (and each test) gets an isolated fence instead of a
//!   process-global static.
//!
//! `Cx` is a cheap cloneable handle. [`Cx::child`] derives a scope with its
//! own cancel flag that also observes the parent's, which is how
//! [`Parallel`](crate::process::Parallel) interrupts siblings on a fault
//! without cancelling the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::barrier::AltingBarrierCoordinate;
use crate::error::{Error, Result};

/// How often blocking waits re-check for cancellation.
pub(crate) const CANCEL_POLL_TICK: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct CxInner {
    name: String,
    cancel: AtomicBool,
    parent: Option<Arc<CxInner>>,
    coordinate: Arc<AltingBarrierCoordinate>,
}

impl CxInner {
    fn is_cancel_requested(&self) -> bool {
        if self.cancel.load(Ordering::Acquire) {
            return true;
        }
        let mut up = self.parent.as_deref();
        while let Some(inner) = up {
            if inner.cancel.load(Ordering::Acquire) {
                return true;
            }
            up = inner.parent.as_deref();
        }
        false
    }
}

/// Capability/cancellation token threaded through every blocking operation.
#[derive(Debug, Clone)]
pub struct Cx {
    inner: Arc<CxInner>,
}

impl Cx {
    /// Creates a root context with a fresh coordination scope.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                name: name.into(),
                cancel: AtomicBool::new(false),
                parent: None,
                coordinate: Arc::new(AltingBarrierCoordinate::new()),
            }),
        }
    }

    /// Creates a root context for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new("test")
    }

    /// Derives a child scope: own cancel flag, parent's flag still observed,
    /// same coordination scope.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(CxInner {
                name: name.into(),
                cancel: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.inner)),
                coordinate: Arc::clone(&self.inner.coordinate),
            }),
        }
    }

    /// Returns the context name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Requests cancellation of this scope (and every scope derived from it).
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::Release);
        tracing::debug!(cx = %self.inner.name, "cancellation requested");
    }

    /// Returns true once this scope or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.inner.is_cancel_requested()
    }

    /// Fails with [`Error::cancelled`] once cancellation has been requested.
    pub fn checkpoint(&self, operation: &str) -> Result<()> {
        if self.is_cancel_requested() {
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Emits a trace event tagged with this context's name.
    pub fn trace(&self, message: &str) {
        tracing::trace!(cx = %self.inner.name, "{message}");
    }

    /// The coordination fence shared by alting barriers created under this
    /// context's root.
    pub(crate) fn coordinate(&self) -> &Arc<AltingBarrierCoordinate> {
        &self.inner.coordinate
    }
}
