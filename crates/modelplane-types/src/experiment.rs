//! Experiments: traffic-split declarations over candidate models or
//! pipelines.

use serde::{Deserialize, Serialize};

use crate::ids::ExperimentName;

/// Which kind of resource an `Experiment`'s candidates/mirror/baseline
/// reference. Represented as a tagged variant with
/// dispatch methods rather than two parallel inline switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Model,
    Pipeline,
}

/// A traffic-split candidate: a referenced model or pipeline name, its
/// traffic share, and whether it is currently ready to serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub traffic_weight: u32,
    pub ready: bool,
}

impl Candidate {
    pub fn new(name: impl Into<String>, traffic_weight: u32) -> Self {
        Self { name: name.into(), traffic_weight, ready: false }
    }
}

/// An optional mirror endpoint that receives a copy of inbound traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mirror {
    pub name: String,
    pub ready: bool,
}

/// A traffic-split declaration over candidate models or pipelines, with an
/// optional mirror and an optional baseline (default-traffic target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: ExperimentName,
    pub resource_type: ResourceType,
    pub default: Option<String>,
    pub candidates: Vec<Candidate>,
    pub mirror: Option<Mirror>,
}

impl Experiment {
    /// Globally ready iff baseline exists (or none required), all
    /// candidates are ready, and the mirror (if any) is ready.
    pub fn is_ready(&self) -> bool {
        self.candidates.iter().all(|c| c.ready) && self.mirror.as_ref().is_none_or(|m| m.ready)
    }
}

/// Discriminator carried on an `ExperimentEvent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentEventKind {
    Updated,
    BecameReady,
    BecameNotReady,
    Terminated,
}
