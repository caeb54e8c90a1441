//! Cspkit: Communicating Sequential Processes primitives for Rust.
//!
//! # Overview
//!
//! Cspkit provides the CSP concurrency model over OS threads: synchronous
//! rendezvous channels, guarded choice over heterogeneous event sources
//! (the ALT), multi-party barriers — including barriers offerable as choice
//! guards — and fork-join composition of processes.
//!
//! # Core Guarantees
//!
//! - **Exactly-once rendezvous**: each write pairs with exactly one read;
//!   no value is lost or duplicated
//! - **Committed choice**: a selection enables a prefix of its guards and
//!   commits to exactly one, with a fixed, deterministic tie-break
//! - **Atomic barriers**: a barrier releases all enrolled parties together,
//!   and a barrier offered to selections completes for every party in the
//!   same round, fenced by a runtime-wide coordination protocol
//! - **Fatal cancellation**: a cancelled process aborts out of any blocking
//!   point; cancellation is never swallowed or retried internally
//! - **Graded poison**: channels tear a process network down cooperatively
//!   through strength-ranked poison, distinct from error and cancellation
//!
//! # Module Structure
//!
//! - [`error`]: error kinds, categories, and recoverability
//! - [`cx`]: process context (cancellation token + coordination scope)
//! - [`guard`]: the [`Guard`](guard::Guard) capability, skip and stop
//! - [`alt`]: the selection engine ([`Alternative`](alt::Alternative)) and
//!   nested selections
//! - [`timer`]: wall-clock timer guards and cancellable sleep
//! - [`channel`]: rendezvous channels, extended rendezvous, poison, shared
//!   ends
//! - [`barrier`]: plain and alting barriers plus their coordination fence
//! - [`process`]: [`Parallel`](process::Parallel) fork-join composition
//! - [`test_utils`]: logging and assertion helpers shared by the test
//!   suites

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]

pub mod alt;
pub mod barrier;
pub mod channel;
pub mod cx;
pub mod error;
pub mod guard;
pub mod process;
pub mod test_utils;
pub mod timer;

pub use alt::{AltWaker, Alternative, NestedAlternative};
pub use barrier::{AltingBarrier, AltingBarrierGuard, Barrier};
pub use channel::{
    any2any, any2one, any2one_poisonable, one2any, one2one, one2one_poisonable, ChanIn,
    ChanOut, InputGuard, SharedChanIn, SharedChanOut,
};
pub use cx::Cx;
pub use error::{Error, ErrorCategory, ErrorKind, Recoverability, Result};
pub use guard::{EnableResult, Guard, Skip, Stop};
pub use process::{Parallel, Process};
pub use timer::Timer;
