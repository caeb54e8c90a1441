//! Synchronous rendezvous channels.
//!
//! A rendezvous channel has no buffer: writer and reader block until they
//! meet, and exactly one reader accepts exactly one writer's value. The
//! input end is selectable, supports the extended rendezvous
//! (`start_read`/`end_read`), and carries strength-graded poison for
//! cooperative network teardown.
//!
//! # Constructors
//!
//! - [`one2one`] / [`one2one_poisonable`]: the two-party core
//! - [`any2one`] / [`any2one_poisonable`]: many writers, one (selecting)
//!   reader
//! - [`one2any`], [`any2any`]: shared readers, serialized per rendezvous

mod rendezvous;
mod shared;

pub use rendezvous::{one2one, one2one_poisonable, ChanIn, ChanOut, InputGuard};
pub use shared::{
    any2any, any2one, any2one_poisonable, one2any, SharedChanIn, SharedChanOut,
};
