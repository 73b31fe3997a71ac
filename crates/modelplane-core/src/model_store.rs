//! Authoritative state of servers, replicas, and models — the single-writer,
//! reader-many store the scheduler and `AgentServer` mutate through.

use std::sync::Arc;

use modelplane_eventhub::EventHub;
use modelplane_types::{
    ControlPlaneError, ControlPlaneResult, DeploymentSpec, Model, ModelName, Replica, ReplicaIndex, ReplicaRef,
    ReplicaStatus, Server, ServerName,
};
use tokio::sync::RwLock;

use crate::kernel::model::{self, Command, Event};

pub struct ModelStore {
    state: RwLock<model::State>,
    hub: Arc<EventHub>,
}

impl ModelStore {
    pub fn new(hub: Arc<EventHub>) -> Arc<Self> {
        Arc::new(Self { state: RwLock::new(model::State::new()), hub })
    }

    async fn apply(&self, cmd: Command) -> ControlPlaneResult<()> {
        let mut guard = self.state.write().await;
        let state = std::mem::take(&mut *guard);
        let (new_state, events) = model::apply(state, cmd).map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
        *guard = new_state;
        drop(guard);
        for event in events {
            match event {
                Event::Model(msg) => self.hub.publish_model_event(msg).await,
                Event::Server(msg) => self.hub.publish_server_event(msg).await,
            }
        }
        Ok(())
    }

    /// Agent subscription: registers or refreshes a server's replica set.
    pub async fn register_server(&self, server: ServerName, replicas: Vec<Replica>) -> ControlPlaneResult<()> {
        self.apply(Command::RegisterServer { server, replicas }).await
    }

    /// Agent stream ended: mark every replica on this server unavailable.
    pub async fn disconnect_server(&self, server: ServerName) -> ControlPlaneResult<()> {
        self.apply(Command::DisconnectServer { server })
            .await
            .map_err(|_| ControlPlaneError::NotFound("server not found".to_string()))
    }

    /// `UpdateModel(spec)`: upserts the latest version, no-op if unchanged.
    pub async fn update_model(&self, name: ModelName, spec: DeploymentSpec) -> ControlPlaneResult<()> {
        self.apply(Command::UpdateModel { name, spec }).await
    }

    /// `UnloadModel(name)`.
    pub async fn unload_model(&self, name: ModelName) -> ControlPlaneResult<()> {
        self.apply(Command::UnloadModel { name: name.clone() })
            .await
            .map_err(|_| ControlPlaneError::NotFound(format!("model {name} not found")))
    }

    /// Writes back the scheduler's assignment atomically.
    pub async fn assign_replicas(
        &self,
        name: ModelName,
        version: u64,
        server: ServerName,
        replicas: Vec<ReplicaIndex>,
    ) -> ControlPlaneResult<()> {
        self.apply(Command::AssignReplicas { name, version, server, replicas }).await
    }

    pub async fn schedule_failed(&self, name: ModelName, version: u64, reason: String) -> ControlPlaneResult<()> {
        self.apply(Command::ScheduleFailed { name, version, reason }).await
    }

    /// `UpdateModelState(name, version, replicaIdx, newState, reason)`:
    /// authoritative update from agent feedback.
    pub async fn update_model_state(
        &self,
        name: ModelName,
        version: u64,
        replica: ReplicaRef,
        status: ReplicaStatus,
        reason: Option<String>,
        generation: u64,
    ) -> ControlPlaneResult<()> {
        self.apply(Command::UpdateModelState { name, version, replica, status, reason, generation }).await
    }

    pub async fn get_model(&self, name: &ModelName) -> Option<Model> {
        self.state.read().await.get_model(name).cloned()
    }

    pub async fn get_servers(&self) -> Vec<Server> {
        self.state.read().await.servers.values().cloned().collect()
    }

    pub async fn get_server(&self, name: &ServerName) -> Option<Server> {
        self.state.read().await.get_server(name).cloned()
    }

    pub async fn models(&self) -> Vec<Model> {
        self.state.read().await.models.values().cloned().collect()
    }
}
