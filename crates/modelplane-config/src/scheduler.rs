//! Scheduler binary CLI flags.
//!
//! A `clap::Parser` struct with one field per flag. No config-file
//! layering here: the scheduler binary's configuration surface is
//! CLI-flags-only, unlike the agent's env-var surface below.

use std::path::PathBuf;

use clap::Parser;

/// CLI flags for the `scheduler` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "scheduler", about = "Model-serving control plane scheduler")]
pub struct SchedulerArgs {
    /// Port the Envoy xDS snapshot server listens on.
    #[arg(long = "envoy-port", default_value_t = 9002)]
    pub envoy_port: u16,

    /// Port the `Scheduler` gRPC API listens on (plaintext).
    #[arg(long = "scheduler-port", default_value_t = 9004)]
    pub scheduler_port: u16,

    /// Port the `Scheduler` gRPC API listens on (mTLS).
    #[arg(long = "scheduler-mtls-port", default_value_t = 9044)]
    pub scheduler_mtls_port: u16,

    /// Port the `AgentServer` bidirectional stream listens on (plaintext).
    #[arg(long = "agent-port", default_value_t = 9005)]
    pub agent_port: u16,

    /// Port the `AgentServer` bidirectional stream listens on (mTLS).
    #[arg(long = "agent-mtls-port", default_value_t = 9055)]
    pub agent_mtls_port: u16,

    /// Port the chainer dataflow advisory RPC listens on.
    #[arg(long = "dataflow-port", default_value_t = 9008)]
    pub dataflow_port: u16,

    /// Identity of this scheduler node, reported to agents and the chainer.
    #[arg(long = "nodeID", default_value = "")]
    pub node_id: String,

    /// Kubernetes namespace this scheduler instance is scoped to.
    #[arg(long = "namespace", default_value = "")]
    pub namespace: String,

    /// Host the pipeline gateway (chainer control surface) is reachable on.
    #[arg(long = "pipeline-gateway-host", default_value = "")]
    pub pipeline_gateway_host: String,

    /// Pipeline gateway HTTP port.
    #[arg(long = "pipeline-gateway-http-port", default_value_t = 9010)]
    pub pipeline_gateway_http_port: u16,

    /// Pipeline gateway gRPC port.
    #[arg(long = "pipeline-gateway-grpc-port", default_value_t = 9011)]
    pub pipeline_gateway_grpc_port: u16,

    /// `tracing`/`tracing-subscriber` env-filter directive, e.g. `info`.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Path to an OpenTelemetry tracing config file (external collaborator;
    /// parsed by the tracing-exporter wiring this crate does not own).
    #[arg(long = "tracing-config-path")]
    pub tracing_config_path: Option<PathBuf>,

    /// Path to the opaque durable key/value store backing the pipeline and
    /// experiment stores. Absent means in-memory only.
    #[arg(long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Whether to accept plaintext (non-mTLS) connections on the
    /// `-scheduler-port`/`-agent-port` listeners.
    #[arg(long = "allow-plaintxt", default_value_t = true, action = clap::ArgAction::Set)]
    pub allow_plaintext: bool,
}

impl SchedulerArgs {
    /// Parses from `std::env::args()`. Thin wrapper so callers don't need
    /// to import `clap::Parser` themselves.
    pub fn parse_args() -> Self {
        <Self as Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec_exactly() {
        let args = SchedulerArgs::parse_from(["scheduler"]);
        assert_eq!(args.envoy_port, 9002);
        assert_eq!(args.scheduler_port, 9004);
        assert_eq!(args.scheduler_mtls_port, 9044);
        assert_eq!(args.agent_port, 9005);
        assert_eq!(args.agent_mtls_port, 9055);
        assert_eq!(args.dataflow_port, 9008);
        assert_eq!(args.pipeline_gateway_http_port, 9010);
        assert_eq!(args.pipeline_gateway_grpc_port, 9011);
        assert_eq!(args.log_level, "info");
        assert!(args.db_path.is_none());
        assert!(args.allow_plaintext);
    }

    #[test]
    fn flags_override_defaults() {
        let args = SchedulerArgs::parse_from([
            "scheduler",
            "--scheduler-port",
            "7000",
            "--db-path",
            "/var/lib/modelplane/scheduler.db",
            "--allow-plaintxt",
            "false",
        ]);
        assert_eq!(args.scheduler_port, 7000);
        assert_eq!(args.db_path, Some(PathBuf::from("/var/lib/modelplane/scheduler.db")));
        assert!(!args.allow_plaintext);
    }
}
