//! Models, model versions, and the per-replica / aggregate state machines.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::ids::{ModelName, ReplicaRef, ServerName};

/// Per-replica status reported by an agent, authoritative only via
/// `ModelStore::update_model_state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ReplicaStatus {
    LoadRequested,
    Loading,
    Loaded,
    LoadFailed,
    UnloadRequested,
    Unloading,
    Unloaded,
    Available,
    Unavailable,
    Draining,
}

impl ReplicaStatus {
    /// Allowed edges. `Unloaded` is both the initial state and
    /// one of the terminal states; `LoadFailed` is the other terminal state.
    /// `Unavailable` is reachable from any state (agent/stream disconnect)
    /// and can be rescheduled back into `LoadRequested`.
    pub fn can_transition_to(self, next: ReplicaStatus) -> bool {
        use ReplicaStatus::{
            Available, Draining, LoadFailed, LoadRequested, Loaded, Loading, Unavailable,
            UnloadRequested, Unloaded, Unloading,
        };

        if next == Unavailable {
            return true;
        }

        matches!(
            (self, next),
            (Unloaded, LoadRequested)
                | (LoadRequested, Loading)
                | (Loading, Loaded)
                | (Loading, Available)
                | (Loading, LoadFailed)
                | (Loaded, Available)
                | (Available, UnloadRequested)
                | (UnloadRequested, Unloading)
                | (Unloading, Unloaded)
                | (_, Draining)
                | (Draining, Unloading)
                | (Unavailable, LoadRequested)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ReplicaStatus::Unloaded | ReplicaStatus::LoadFailed)
    }

    pub fn is_ready(self) -> bool {
        matches!(self, ReplicaStatus::Loaded | ReplicaStatus::Available)
    }
}

/// Aggregate model state, recomputed after every per-replica update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelState {
    ModelProgressing,
    ModelAvailable,
    ModelFailed,
    ScheduleFailed,
    ModelTerminating,
    ModelTerminated,
}

/// Deployment spec carried by a `ModelVersion` — the scheduler's input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub memory_bytes: u64,
    pub required_capabilities: BTreeSet<String>,
    pub desired_replicas: u32,
    pub min_replicas: u32,
    pub max_replicas: u32,
}

/// Per-replica bookkeeping carried on a `ModelVersion`: current status plus
/// the last reason string reported by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaState {
    pub status: ReplicaStatus,
    pub reason: Option<String>,
}

impl ReplicaState {
    pub fn new(status: ReplicaStatus) -> Self {
        Self { status, reason: None }
    }
}

/// An immutable deployment spec snapshot plus live assignment/state.
///
/// Successive versions of a `Model` may differ in memory/capabilities/
/// replica count; only the latest version is ever a scheduling target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub version: u64,
    pub spec: DeploymentSpec,
    pub assigned_server: Option<ServerName>,
    pub assigned_replicas: BTreeMap<ReplicaRef, ReplicaState>,
    pub state: ModelState,
    pub schedule_failure_reason: Option<String>,
    /// Detects stale agent acknowledgements.
    pub generation: u64,
}

impl ModelVersion {
    pub fn new(version: u64, spec: DeploymentSpec, generation: u64) -> Self {
        Self {
            version,
            spec,
            assigned_server: None,
            assigned_replicas: BTreeMap::new(),
            state: ModelState::ModelProgressing,
            schedule_failure_reason: None,
            generation,
        }
    }

    /// Two specs are equal for `UpdateModel` no-op purposes when every
    /// scheduling-relevant field matches.
    pub fn spec_unchanged(&self, other: &DeploymentSpec) -> bool {
        &self.spec == other
    }

    /// Derives the aggregate `ModelState` from per-replica states.
    /// `tolerance` is `desired_replicas - min_replicas`.
    ///
    /// A replica gone `Unavailable` (agent disconnect) falls through to the
    /// `ModelProgressing` branch exactly like `Loading`/`LoadRequested`: it
    /// is neither ready nor failed, so it reads as "needs a reschedule"
    /// rather than silently freezing the prior aggregate.
    pub fn recompute_state(&mut self) {
        if self.assigned_replicas.is_empty() {
            if self.schedule_failure_reason.is_some() {
                self.state = ModelState::ScheduleFailed;
            }
            return;
        }

        if matches!(self.state, ModelState::ModelTerminating | ModelState::ModelTerminated) {
            let all_unloaded = self.assigned_replicas.values().all(|s| s.status == ReplicaStatus::Unloaded);
            self.state = if all_unloaded { ModelState::ModelTerminated } else { ModelState::ModelTerminating };
            return;
        }

        let desired = self.spec.desired_replicas;
        let min_replicas = self.spec.min_replicas;
        let tolerance = desired.saturating_sub(min_replicas);

        let total = self.assigned_replicas.len() as u32;
        let available = self
            .assigned_replicas
            .values()
            .filter(|s| s.status.is_ready())
            .count() as u32;
        let failed = self
            .assigned_replicas
            .values()
            .filter(|s| s.status == ReplicaStatus::LoadFailed)
            .count() as u32;

        self.state = if total == available && available >= min_replicas {
            ModelState::ModelAvailable
        } else if failed > tolerance {
            ModelState::ModelFailed
        } else {
            ModelState::ModelProgressing
        };
    }
}

/// A named entity carrying an ordered sequence of `ModelVersion`s, the
/// latest being mutable (the active scheduling target).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Model {
    pub name: ModelName,
    pub versions: Vec<ModelVersion>,
}

impl Model {
    pub fn new(name: ModelName) -> Self {
        Self { name, versions: Vec::new() }
    }

    pub fn latest(&self) -> Option<&ModelVersion> {
        self.versions.last()
    }

    pub fn latest_mut(&mut self) -> Option<&mut ModelVersion> {
        self.versions.last_mut()
    }
}
