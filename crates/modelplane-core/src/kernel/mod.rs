//! Pure functional cores of each store: `apply_*(state, command) -> (state, events)`.
//!
//! No locks, IO, or clocks in here — every store wraps one of these behind
//! an `RwLock` and publishes the returned events after releasing it.

pub mod experiment;
pub mod model;
pub mod pipeline;
