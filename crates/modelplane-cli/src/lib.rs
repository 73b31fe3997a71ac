//! Shared startup/shutdown plumbing for the `scheduler` and `agent`
//! binaries. Everything domain-specific lives in `modelplane-core`/
//! `modelplane-server`/`modelplane-agent`; this crate only wires those
//! pieces into two runnable processes.

pub mod shutdown;

pub fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
