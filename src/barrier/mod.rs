//! Multi-party synchronization: plain barriers, alting barriers, and the
//! runtime-wide coordination fence.
//!
//! - [`Barrier`]: N-party rendezvous with dynamic enrollment
//! - [`AltingBarrier`]: a barrier whose synchronization is itself a
//!   selection guard, with per-process front-ends and dynamic
//!   expand/contract
//! - [`AltingBarrierCoordinate`]: the per-context fence serializing
//!   barrier-involving enable sequences

mod alting;
mod coordinate;
mod plain;

pub use alting::{AltingBarrier, AltingBarrierGuard};
pub use coordinate::AltingBarrierCoordinate;
pub use plain::Barrier;
