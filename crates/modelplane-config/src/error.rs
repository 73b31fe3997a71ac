use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse CLI flags: {0}")]
    Cli(#[from] clap::Error),

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("RECORD_LEVEL must be one of NONE, SUMMARY, ALL, got {0:?}")]
    InvalidRecordLevel(String),
}
