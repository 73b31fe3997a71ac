//! # modelplane-config: CLI flags and environment configuration
//!
//! Two independent surfaces, one per binary: the scheduler binary's CLI
//! flags (`clap`) and the agent binary's environment variables (`config`,
//! layered over struct defaults).

pub mod agent;
pub mod error;
pub mod scheduler;

pub use agent::{AgentConfig, RecordLevel};
pub use error::ConfigError;
pub use scheduler::SchedulerArgs;
