//! Agent binary configuration: `LISTEN_PORT`, `LOG_LEVEL`, `RECORD_LEVEL`.
//! Env-var only, layered over struct defaults via the `config` crate.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Payload-tap recording verbosity for the agent's data-plane tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordLevel {
    None,
    #[default]
    Summary,
    All,
}

impl std::str::FromStr for RecordLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "SUMMARY" => Ok(Self::Summary),
            "ALL" => Ok(Self::All),
            other => Err(ConfigError::InvalidRecordLevel(other.to_string())),
        }
    }
}

/// Agent binary configuration, loaded once at startup from the process
/// environment with struct defaults.
///
/// `listen_port`/`log_level`/`record_level` are the three externally-named
/// env vars for this binary. The remaining fields cover how the per-node
/// agent discovers the scheduler and its own backend — that wiring is
/// assumed-given infrastructure glue, so these follow the same
/// `config`-over-defaults env-var convention rather than inventing a
/// second configuration surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub listen_port: u16,
    pub log_level: String,
    pub record_level: RecordLevel,

    /// Name this agent registers under via `AgentSubscribe`.
    pub server_name: String,
    /// `AgentServer` bidirectional-stream endpoint on the scheduler.
    pub scheduler_endpoint: String,
    /// Local inference backend's gRPC endpoint, fronted by the reverse proxy.
    pub backend_endpoint: String,
    /// Fixed connection-pool size to the backend.
    pub connection_pool_size: usize,
    /// Number of replica slots this agent advertises.
    pub replica_count: u32,
    /// Per-replica total memory, in bytes.
    pub replica_memory_bytes: u64,
    /// Comma-separated capability set shared by every replica slot.
    pub capabilities: String,
    /// Total memory budget `LocalStateManager` evicts against.
    pub capacity_bytes: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_port: 8001,
            log_level: "info".to_string(),
            record_level: RecordLevel::Summary,
            server_name: "agent".to_string(),
            scheduler_endpoint: "http://127.0.0.1:9005".to_string(),
            backend_endpoint: "http://127.0.0.1:8081".to_string(),
            connection_pool_size: 10, // default pool size
            replica_count: 1,
            replica_memory_bytes: 0,
            capabilities: String::new(),
            capacity_bytes: 0,
        }
    }
}

impl AgentConfig {
    /// The capability set as a parsed list, empty entries dropped.
    pub fn capability_set(&self) -> Vec<String> {
        self.capabilities.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
    }
}

impl AgentConfig {
    /// Loads from `LISTEN_PORT`/`LOG_LEVEL`/`RECORD_LEVEL`, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&defaults)?)
            .add_source(config::Environment::default().try_parsing(true));
        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec() {
        let config = AgentConfig::default();
        assert_eq!(config.listen_port, 8001);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.record_level, RecordLevel::Summary);
    }

    #[test]
    fn capability_set_splits_and_trims() {
        let mut config = AgentConfig::default();
        config.capabilities = " gpu, tpu ,,large-memory".to_string();
        assert_eq!(config.capability_set(), vec!["gpu", "tpu", "large-memory"]);
    }

    #[test]
    fn record_level_parses_case_insensitively() {
        assert_eq!("all".parse::<RecordLevel>().unwrap(), RecordLevel::All);
        assert_eq!("NONE".parse::<RecordLevel>().unwrap(), RecordLevel::None);
        assert!("bogus".parse::<RecordLevel>().is_err());
    }

    #[test]
    fn from_env_overrides_defaults() {
        // SAFETY: test runs single-threaded within this process's env
        // mutation; no other test in this crate reads LISTEN_PORT.
        unsafe {
            std::env::set_var("LISTEN_PORT", "9100");
        }
        let config = AgentConfig::from_env().unwrap();
        assert_eq!(config.listen_port, 9100);
        unsafe {
            std::env::remove_var("LISTEN_PORT");
        }
    }
}
