//! Event payloads published on the `EventHub`'s four topics.

use serde::{Deserialize, Serialize};

use crate::experiment::ExperimentEventKind;
use crate::ids::{ExperimentName, ModelName, PipelineName, ServerName};
use crate::model::ModelState;
use crate::pipeline::PipelineState;

/// Emitted whenever a `ModelVersion`'s aggregate state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEventMsg {
    pub source: String,
    pub model: ModelName,
    pub version: u64,
    pub state: ModelState,
}

/// Emitted whenever a server's subscription or capability set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEventKind {
    Subscribed,
    Disconnected,
    CapabilitiesUpdated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEventMsg {
    pub source: String,
    pub server: ServerName,
    pub kind: ServerEventKind,
}

/// Emitted on every experiment create/update/readiness-change/terminate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentEventMsg {
    pub source: String,
    pub experiment: ExperimentName,
    pub kind: ExperimentEventKind,
    /// Set when a baseline resource was replaced or removed, so the
    /// previously-default resource can be notified.
    pub previous_baseline: Option<String>,
}

/// Emitted on every pipeline version transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEventMsg {
    pub source: String,
    pub pipeline: PipelineName,
    pub version: u64,
    pub state: PipelineState,
}
