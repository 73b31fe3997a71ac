//! # modelplane-server: gRPC surfaces over the authoritative scheduler state
//!
//! Thin `tonic` service impls wrapping `modelplane-core`'s stores — no
//! business logic lives here beyond request validation and proto <-> domain
//! type conversion; everything else is delegated to the stores.

pub mod agent_server;
pub mod error;
pub mod scheduler_api;

pub use agent_server::AgentServer;
pub use scheduler_api::SchedulerApi;
