//! Drag-and-drop placement checks for the reservation rack.
//!
//! Everything here is a pure function over a [`Snapshot`]: no I/O, no locks,
//! no mutation. Results are advisory; the rack engine re-checks every commit
//! under its own locks.

mod overlap;
mod policy;
mod snapshot;
mod suggest;

pub use overlap::{any_in_house, find_overlaps, occupants};
pub use policy::{validate_drop, DropDecision, DropReason};
pub use snapshot::Snapshot;
pub use suggest::suggest_alternatives;
