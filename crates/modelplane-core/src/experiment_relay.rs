//! `ExperimentReadinessRelay`: event-driven recompute of candidate/mirror
//! readiness when a referenced model or pipeline transitions. Subscribes to
//! the model and pipeline topics exactly like
//! [`crate::reschedule::Rescheduler`] subscribes to the model topic: no
//! privileged channel into `ExperimentStore`, just another hub subscriber.

use std::sync::Arc;

use modelplane_types::{ModelEventMsg, ModelState, PipelineEventMsg, PipelineState, ResourceType};

use crate::experiment_store::ExperimentStore;

pub struct ExperimentReadinessRelay {
    experiments: Arc<ExperimentStore>,
}

impl ExperimentReadinessRelay {
    pub fn new(experiments: Arc<ExperimentStore>) -> Self {
        Self { experiments }
    }

    /// A model's aggregate state changed; any experiment referencing it by
    /// name recomputes whether that candidate/mirror is ready.
    pub async fn handle_model_event(&self, msg: ModelEventMsg) {
        if !matches!(
            msg.state,
            ModelState::ModelAvailable | ModelState::ModelFailed | ModelState::ScheduleFailed | ModelState::ModelTerminated
        ) {
            return;
        }
        if let Err(err) = self.experiments.recompute_readiness(ResourceType::Model, msg.model.to_string()).await {
            tracing::warn!(model = %msg.model, %err, "failed to recompute experiment readiness after model event");
        }
    }

    /// A pipeline's state changed; same recompute, keyed by pipeline name.
    pub async fn handle_pipeline_event(&self, msg: PipelineEventMsg) {
        if !matches!(msg.state, PipelineState::PipelineReady | PipelineState::PipelineFailed | PipelineState::PipelineTerminated) {
            return;
        }
        if let Err(err) = self.experiments.recompute_readiness(ResourceType::Pipeline, msg.pipeline.to_string()).await {
            tracing::warn!(pipeline = %msg.pipeline, %err, "failed to recompute experiment readiness after pipeline event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelplane_eventhub::EventHub;
    use modelplane_types::{Candidate, Experiment, ExperimentName, ExperimentEventKind};

    use crate::model_store::ModelStore;
    use crate::pipeline_store::PipelineStore;

    #[tokio::test]
    async fn model_becoming_available_makes_the_referencing_experiment_ready() {
        let hub = EventHub::new();
        let models = ModelStore::new(hub.clone());
        let pipelines = PipelineStore::new(hub.clone());
        let experiments = ExperimentStore::new(hub.clone(), models.clone(), pipelines.clone());

        experiments
            .start_experiment(Experiment {
                name: ExperimentName::from("e1"),
                resource_type: ResourceType::Model,
                default: None,
                candidates: vec![Candidate::new("m1", 100)],
                mirror: None,
            })
            .await
            .unwrap();
        assert!(!experiments.get_experiment(&ExperimentName::from("e1")).await.unwrap().is_ready());

        models
            .register_server(
                modelplane_types::ServerName::from("s1"),
                vec![modelplane_types::Replica::new(modelplane_types::ReplicaIndex(0), 1000, Default::default())],
            )
            .await
            .unwrap();
        models
            .update_model(
                modelplane_types::ModelName::from("m1"),
                modelplane_types::DeploymentSpec {
                    memory_bytes: 100,
                    required_capabilities: Default::default(),
                    desired_replicas: 1,
                    min_replicas: 1,
                    max_replicas: 1,
                },
            )
            .await
            .unwrap();
        models
            .assign_replicas(
                modelplane_types::ModelName::from("m1"),
                0,
                modelplane_types::ServerName::from("s1"),
                vec![modelplane_types::ReplicaIndex(0)],
            )
            .await
            .unwrap();
        models
            .update_model_state(
                modelplane_types::ModelName::from("m1"),
                0,
                modelplane_types::ReplicaRef::new(modelplane_types::ServerName::from("s1"), modelplane_types::ReplicaIndex(0)),
                modelplane_types::ReplicaStatus::LoadRequested,
                None,
                1,
            )
            .await
            .unwrap();
        models
            .update_model_state(
                modelplane_types::ModelName::from("m1"),
                0,
                modelplane_types::ReplicaRef::new(modelplane_types::ServerName::from("s1"), modelplane_types::ReplicaIndex(0)),
                modelplane_types::ReplicaStatus::Loading,
                None,
                1,
            )
            .await
            .unwrap();
        models
            .update_model_state(
                modelplane_types::ModelName::from("m1"),
                0,
                modelplane_types::ReplicaRef::new(modelplane_types::ServerName::from("s1"), modelplane_types::ReplicaIndex(0)),
                modelplane_types::ReplicaStatus::Available,
                None,
                1,
            )
            .await
            .unwrap();
        let model = models.get_model(&modelplane_types::ModelName::from("m1")).await.unwrap();
        assert_eq!(model.latest().unwrap().state, ModelState::ModelAvailable);

        let relay = ExperimentReadinessRelay::new(experiments.clone());
        relay
            .handle_model_event(ModelEventMsg {
                source: "test".into(),
                model: modelplane_types::ModelName::from("m1"),
                version: 0,
                state: ModelState::ModelAvailable,
            })
            .await;

        let experiment = experiments.get_experiment(&ExperimentName::from("e1")).await.unwrap();
        assert!(experiment.is_ready());
        let _ = ExperimentEventKind::Updated;
    }
}
