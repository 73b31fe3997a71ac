//! # modelplane-types: shared data model for the model-serving control plane
//!
//! Carries the entities defined in the system spec: [`Server`]/[`Replica`],
//! [`Model`]/[`ModelVersion`] with their per-replica and aggregate state
//! machines, [`Experiment`], and [`Pipeline`]. Kept dependency-light (no
//! tokio, no IO) so it can sit underneath both the scheduler and the agent.

pub mod error;
pub mod event;
pub mod experiment;
pub mod ids;
pub mod model;
pub mod pipeline;
pub mod server;

pub use error::{ControlPlaneError, ControlPlaneResult};
pub use event::{
    ExperimentEventMsg, ModelEventMsg, PipelineEventMsg, ServerEventKind, ServerEventMsg,
};
pub use experiment::{Candidate, Experiment, ExperimentEventKind, Mirror, ResourceType};
pub use ids::{ExperimentName, ModelName, PipelineName, ReplicaIndex, ReplicaRef, ServerName};
pub use model::{DeploymentSpec, Model, ModelState, ModelVersion, ReplicaState, ReplicaStatus};
pub use pipeline::{Pipeline, PipelineState, PipelineVersion};
pub use server::{Replica, Server};

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn replica_memory_invariant_after_reserve_and_commit() {
        let mut replica = Replica::new(ReplicaIndex(0), 1000, BTreeSet::new());
        replica.reserve(400);
        assert!(replica.memory_invariant_holds());
        replica.commit_reservation(ModelName::from("m1"), 400);
        assert!(replica.memory_invariant_holds());
        assert_eq!(replica.available_memory_bytes, 600);
        assert_eq!(replica.reserved_memory_bytes, 0);
    }

    #[test]
    fn replica_status_transition_table() {
        assert!(ReplicaStatus::Unloaded.can_transition_to(ReplicaStatus::LoadRequested));
        assert!(ReplicaStatus::LoadRequested.can_transition_to(ReplicaStatus::Loading));
        assert!(ReplicaStatus::Loading.can_transition_to(ReplicaStatus::Loaded));
        assert!(ReplicaStatus::Loading.can_transition_to(ReplicaStatus::LoadFailed));
        assert!(!ReplicaStatus::Unloaded.can_transition_to(ReplicaStatus::Loaded));
        assert!(ReplicaStatus::Available.can_transition_to(ReplicaStatus::UnloadRequested));
        assert!(ReplicaStatus::Loaded.can_transition_to(ReplicaStatus::Draining));
    }

    #[test]
    fn experiment_readiness_requires_all_candidates_and_mirror() {
        let mut exp = Experiment {
            name: ExperimentName::from("e1"),
            resource_type: ResourceType::Model,
            default: None,
            candidates: vec![Candidate::new("m1", 50), Candidate::new("m2", 50)],
            mirror: None,
        };
        assert!(!exp.is_ready());
        exp.candidates[0].ready = true;
        exp.candidates[1].ready = true;
        assert!(exp.is_ready());
        exp.mirror = Some(Mirror { name: "m3".into(), ready: false });
        assert!(!exp.is_ready());
        exp.mirror.as_mut().unwrap().ready = true;
        assert!(exp.is_ready());
    }
}
