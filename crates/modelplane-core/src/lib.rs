//! # modelplane-core: authoritative scheduler state
//!
//! Functional-core / imperative-shell: each `kernel::*` module is a pure
//! `apply(state, command) -> (state, events)` with no IO, no locks, no
//! clocks; the `*Store` types wrap a kernel module in a
//! `tokio::sync::RwLock` plus a shared [`modelplane_eventhub::EventHub`]
//! and are the only things callers touch.

pub mod dataflow;
pub mod experiment_relay;
pub mod experiment_store;
pub mod kernel;
pub mod model_store;
pub mod pipeline_store;
pub mod reschedule;
pub mod scheduler;

pub use dataflow::{register_noop_subscribers, Chainer, IncrementalProcessor};
pub use experiment_relay::ExperimentReadinessRelay;
pub use experiment_store::ExperimentStore;
pub use model_store::ModelStore;
pub use pipeline_store::PipelineStore;
pub use reschedule::Rescheduler;
pub use scheduler::{schedule, ScheduleOutcome};
