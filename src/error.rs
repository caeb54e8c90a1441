//! Error types and error handling strategy for cspkit.
//!
//! This module defines the core error types used throughout the crate.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Protocol misuse is reported to the offending caller, never ignored
//! - Engine invariant violations are a distinct, fatal kind
//! - Cancellation is surfaced at every blocking point, never swallowed
//! - Poison is the designed cooperative-teardown path, not a failure
//!
//! # Error Categories
//!
//! - **Misuse**: the caller broke a usage contract (resign without enroll,
//!   wrong-owner front-end, precondition length mismatch). Recoverable by
//!   correcting the call.
//! - **Internal**: the engine itself found a broken invariant (coordinate
//!   counter out of range, two barrier completions in one selection round).
//!   Unrecoverable; report upstream, do not retry.
//! - **Cancellation**: the process was cancelled while blocked. Fatal and
//!   non-retriable; in-flight protocol state is invalid.
//! - **Poison**: a strength-graded shutdown signal propagated through
//!   channels once immunity is exceeded.

use core::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Cancellation ===
    /// Operation was cancelled while blocked or about to block.
    Cancelled,

    // === Poison ===
    /// Channel was poisoned; the strength rides on the [`Error`].
    Poisoned,

    // === Protocol misuse ===
    /// Resign (or sync) without a matching enrollment.
    NotEnrolled,
    /// Enroll on a front-end that is already enrolled.
    AlreadyEnrolled,
    /// Enrollment count is invalid for the requested operation.
    BadEnrollment,
    /// A front-end was used by a process that does not own it.
    WrongOwner,
    /// A resigned or contracted front-end was offered to a selection.
    FrontEndResigned,
    /// A front-end belongs to a different barrier family.
    ForeignFrontEnd,
    /// The front-end has a selection offer in flight.
    OfferInFlight,
    /// `start_read` while an extended rendezvous is already in progress.
    ReadInProgress,
    /// `end_read` without a preceding `start_read`.
    NoReadInProgress,
    /// Precondition slice length does not match the guard count.
    PreconditionMismatch,
    /// An `Alternative` needs at least one guard.
    EmptyGuardSet,
    /// A timer guard was enabled with no alarm set.
    AlarmNotSet,
    /// An alting barrier was placed inside a nested alternative.
    NestedBarrier,

    // === Internal ===
    /// The engine found one of its own invariants broken.
    InvariantViolation,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Cancelled => ErrorCategory::Cancellation,
            Self::Poisoned => ErrorCategory::Poison,
            Self::NotEnrolled
            | Self::AlreadyEnrolled
            | Self::BadEnrollment
            | Self::WrongOwner
            | Self::FrontEndResigned
            | Self::ForeignFrontEnd
            | Self::OfferInFlight
            | Self::ReadInProgress
            | Self::NoReadInProgress
            | Self::PreconditionMismatch
            | Self::EmptyGuardSet
            | Self::AlarmNotSet
            | Self::NestedBarrier => ErrorCategory::Misuse,
            Self::InvariantViolation => ErrorCategory::Internal,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self.category() {
            ErrorCategory::Misuse => Recoverability::Recoverable,
            ErrorCategory::Poison => Recoverability::Teardown,
            ErrorCategory::Cancellation | ErrorCategory::Internal => Recoverability::Fatal,
        }
    }
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Cancellation-related failures.
    Cancellation,
    /// Graded cooperative-shutdown signals.
    Poison,
    /// Usage-contract violations by the caller.
    Misuse,
    /// Internal engine errors.
    Internal,
}

/// Classification of error recoverability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// The caller can recover by correcting its usage.
    Recoverable,
    /// Expected shutdown path; stop using the primitive and unwind.
    Teardown,
    /// Unrecoverable; report upstream, do not retry.
    Fatal,
}

/// The main error type for cspkit operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    strength: Option<u32>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            strength: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error is a poison signal.
    #[must_use]
    pub const fn is_poison(&self) -> bool {
        matches!(self.kind, ErrorKind::Poisoned)
    }

    /// Returns true if this error is a usage-contract violation.
    #[must_use]
    pub const fn is_misuse(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Misuse)
    }

    /// Returns the poison strength carried by a [`ErrorKind::Poisoned`] error.
    #[must_use]
    pub const fn poison_strength(&self) -> Option<u32> {
        self.strength
    }

    /// Creates a cancellation error naming the interrupted operation.
    #[must_use]
    pub fn cancelled(operation: &str) -> Self {
        Self::new(ErrorKind::Cancelled).with_message(format!("cancelled during {operation}"))
    }

    /// Creates a poison error carrying the observed strength.
    #[must_use]
    pub fn poison(strength: u32) -> Self {
        Self {
            kind: ErrorKind::Poisoned,
            message: Some(format!("channel poisoned with strength {strength}")),
            strength: Some(strength),
        }
    }

    /// Creates an internal error (engine bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation).with_message(detail)
    }

    /// Creates a wrong-owner misuse error.
    #[must_use]
    pub fn wrong_owner(what: &str) -> Self {
        Self::new(ErrorKind::WrongOwner)
            .with_message(format!("{what} used by a process that does not own it"))
    }

    /// Creates a precondition-length misuse error.
    #[must_use]
    pub fn precondition_mismatch(expected: usize, got: usize) -> Self {
        Self::new(ErrorKind::PreconditionMismatch).with_message(format!(
            "precondition slice has {got} entries, guard array has {expected}"
        ))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_partition_the_kinds() {
        assert_eq!(ErrorKind::Cancelled.category(), ErrorCategory::Cancellation);
        assert_eq!(ErrorKind::Poisoned.category(), ErrorCategory::Poison);
        assert_eq!(ErrorKind::WrongOwner.category(), ErrorCategory::Misuse);
        assert_eq!(
            ErrorKind::InvariantViolation.category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn misuse_is_recoverable_internal_is_fatal() {
        assert_eq!(
            ErrorKind::PreconditionMismatch.recoverability(),
            Recoverability::Recoverable
        );
        assert_eq!(
            ErrorKind::InvariantViolation.recoverability(),
            Recoverability::Fatal
        );
        assert_eq!(ErrorKind::Cancelled.recoverability(), Recoverability::Fatal);
        assert_eq!(
            ErrorKind::Poisoned.recoverability(),
            Recoverability::Teardown
        );
    }

    #[test]
    fn poison_error_carries_strength() {
        let err = Error::poison(7);
        assert!(err.is_poison());
        assert_eq!(err.poison_strength(), Some(7));
        let shown = err.to_string();
        assert!(shown.contains("strength 7"), "unexpected display: {shown}");
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::wrong_owner("front-end");
        let shown = err.to_string();
        assert!(shown.starts_with("WrongOwner"), "unexpected display: {shown}");
        assert!(shown.contains("front-end"), "unexpected display: {shown}");
    }
}
