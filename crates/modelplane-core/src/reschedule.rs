//! `Rescheduler`: the event-driven loop that turns a `ModelProgressing`
//! signal with no healthy assignment into a call to
//! [`crate::scheduler::schedule`], then writes the decision back through
//! `ModelStore`.
//!
//! Subscribes to the model topic on the shared `EventHub` exactly like any
//! other consumer (the xDS processor, `AgentServer`'s fan-out) — the
//! scheduler has no privileged channel into its own store.

use std::sync::Arc;

use modelplane_types::{ModelEventMsg, ModelState};

use crate::model_store::ModelStore;
use crate::scheduler::{self, ScheduleOutcome};

/// Registers a handler on `hub`'s model topic that reschedules whenever a
/// version goes `ModelProgressing` with no replica currently ready — a new
/// `UpdateModel`, an agent disconnect, or a prior `ScheduleFailed` that a
/// newly-registered server might now satisfy.
pub struct Rescheduler {
    models: Arc<ModelStore>,
}

impl Rescheduler {
    pub fn new(models: Arc<ModelStore>) -> Self {
        Self { models }
    }

    /// Handles one `ModelEventMsg`. Public (rather than buried in a closure)
    /// so it can be unit-tested without spinning up the hub's async dispatch.
    pub async fn handle(&self, msg: ModelEventMsg) {
        if !matches!(msg.state, ModelState::ModelProgressing | ModelState::ScheduleFailed) {
            return;
        }

        let Some(model) = self.models.get_model(&msg.model).await else { return };
        let Some(version) = model.versions.iter().find(|v| v.version == msg.version) else { return };

        // Already has a fully ready assignment (mid-load progress, not a
        // placement problem) — nothing for the scheduler to do.
        let has_healthy_assignment = !version.assigned_replicas.is_empty()
            && version.assigned_replicas.values().any(|r| !matches!(r.status, modelplane_types::ReplicaStatus::Unavailable | modelplane_types::ReplicaStatus::LoadFailed));
        if has_healthy_assignment {
            return;
        }

        let servers = self.models.get_servers().await;
        match scheduler::schedule(&servers, &msg.model, &version.spec) {
            ScheduleOutcome::Assigned { server, replicas } => {
                if let Err(err) =
                    self.models.assign_replicas(msg.model.clone(), msg.version, server, replicas).await
                {
                    tracing::error!(model = %msg.model, version = msg.version, %err, "failed to write back schedule decision");
                }
            }
            ScheduleOutcome::Failed { reason } => {
                if let Err(err) = self.models.schedule_failed(msg.model.clone(), msg.version, reason).await {
                    tracing::error!(model = %msg.model, version = msg.version, %err, "failed to record schedule failure");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelplane_eventhub::EventHub;
    use modelplane_types::{DeploymentSpec, ModelName, Replica, ReplicaIndex, Server, ServerName};
    use std::collections::BTreeSet;

    fn spec() -> DeploymentSpec {
        DeploymentSpec {
            memory_bytes: 400,
            required_capabilities: BTreeSet::new(),
            desired_replicas: 1,
            min_replicas: 1,
            max_replicas: 1,
        }
    }

    #[tokio::test]
    async fn new_model_with_no_assignment_gets_scheduled() {
        let hub = EventHub::new();
        let models = ModelStore::new(hub);
        models
            .register_server(
                ServerName::from("s1"),
                vec![Replica::new(ReplicaIndex(0), 1000, BTreeSet::new())],
            )
            .await
            .unwrap();
        models.update_model(ModelName::from("m1"), spec()).await.unwrap();

        let rescheduler = Rescheduler::new(models.clone());
        rescheduler
            .handle(ModelEventMsg {
                source: "test".into(),
                model: ModelName::from("m1"),
                version: 0,
                state: ModelState::ModelProgressing,
            })
            .await;

        let model = models.get_model(&ModelName::from("m1")).await.unwrap();
        let version = model.latest().unwrap();
        assert_eq!(version.assigned_server, Some(ServerName::from("s1")));
        assert_eq!(version.assigned_replicas.len(), 1);
    }

    #[tokio::test]
    async fn unschedulable_model_is_recorded_as_schedule_failed() {
        let hub = EventHub::new();
        let models = ModelStore::new(hub);
        models.update_model(ModelName::from("m1"), spec()).await.unwrap();

        let rescheduler = Rescheduler::new(models.clone());
        rescheduler
            .handle(ModelEventMsg {
                source: "test".into(),
                model: ModelName::from("m1"),
                version: 0,
                state: ModelState::ModelProgressing,
            })
            .await;

        let model = models.get_model(&ModelName::from("m1")).await.unwrap();
        assert_eq!(model.latest().unwrap().state, ModelState::ScheduleFailed);
    }

    #[tokio::test]
    async fn mid_load_progress_is_left_alone() {
        let hub = EventHub::new();
        let models = ModelStore::new(hub);
        models
            .register_server(
                ServerName::from("s1"),
                vec![Replica::new(ReplicaIndex(0), 1000, BTreeSet::new())],
            )
            .await
            .unwrap();
        models.update_model(ModelName::from("m1"), spec()).await.unwrap();
        let rescheduler = Rescheduler::new(models.clone());
        rescheduler
            .handle(ModelEventMsg { source: "test".into(), model: ModelName::from("m1"), version: 0, state: ModelState::ModelProgressing })
            .await;
        let assigned_server_first = models.get_model(&ModelName::from("m1")).await.unwrap().latest().unwrap().assigned_server.clone();

        // A second Progressing event for the same still-loading version
        // (no replica ready yet, but one is assigned and not failed/unavailable)
        // must not trigger a second schedule pass.
        models
            .update_model_state(
                ModelName::from("m1"),
                0,
                modelplane_types::ReplicaRef::new(ServerName::from("s1"), ReplicaIndex(0)),
                modelplane_types::ReplicaStatus::Loading,
                None,
                1,
            )
            .await
            .unwrap();
        rescheduler
            .handle(ModelEventMsg { source: "test".into(), model: ModelName::from("m1"), version: 0, state: ModelState::ModelProgressing })
            .await;
        let assigned_server_second = models.get_model(&ModelName::from("m1")).await.unwrap().latest().unwrap().assigned_server.clone();
        assert_eq!(assigned_server_first, assigned_server_second);
    }
}
