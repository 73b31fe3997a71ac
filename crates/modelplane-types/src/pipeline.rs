//! Pipelines: named compositions with versioned lifecycle states.

use serde::{Deserialize, Serialize};

use crate::ids::PipelineName;

/// Lifecycle state of one `PipelineVersion`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    PipelineCreate,
    PipelineCreating,
    PipelineReady,
    PipelineFailed,
    PipelineTerminate,
    PipelineTerminating,
    PipelineTerminated,
}

impl PipelineState {
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::{
            PipelineCreate, PipelineCreating, PipelineFailed, PipelineReady, PipelineTerminate,
            PipelineTerminated, PipelineTerminating,
        };
        matches!(
            (self, next),
            (PipelineCreate, PipelineCreating)
                | (PipelineCreating, PipelineReady)
                | (PipelineCreating, PipelineFailed)
                | (PipelineReady, PipelineTerminate)
                | (PipelineFailed, PipelineTerminate)
                | (PipelineTerminate, PipelineTerminating)
                | (PipelineTerminating, PipelineTerminated)
        )
    }
}

/// One versioned state of a named pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineVersion {
    pub version: u64,
    pub state: PipelineState,
}

/// A named composition of models handled by an external dataflow runtime;
/// the scheduler only tracks its lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    pub name: PipelineName,
    pub versions: Vec<PipelineVersion>,
}

impl Pipeline {
    pub fn new(name: PipelineName) -> Self {
        Self { name, versions: Vec::new() }
    }

    pub fn latest(&self) -> Option<&PipelineVersion> {
        self.versions.last()
    }

    pub fn is_ready(&self) -> bool {
        self.latest().is_some_and(|v| v.state == PipelineState::PipelineReady)
    }
}
