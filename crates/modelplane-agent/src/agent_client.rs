//! `AgentClient`: the agent's outbound half of the `AgentServer`
//! bidirectional stream. Dials the scheduler, announces this server's
//! replica capacities, and turns `ModelOperationMessage` load/unload
//! commands into `LocalStateManager` calls, reporting outcomes back as
//! `AgentEvent`s.

use std::sync::Arc;

use modelplane_proto::agent::agent_server_client::AgentServerClient;
use modelplane_proto::agent::agent_stream_message::Payload;
use modelplane_proto::agent::{AgentEvent, AgentStreamMessage, AgentSubscribe, ModelOperation, ModelOperationMessage, ReplicaCapacity};
use modelplane_types::{ControlPlaneResult, ModelName, ServerName};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Request;
use tonic::transport::Endpoint;

use crate::local_state::LocalStateManager;

pub struct AgentClient {
    local_state: Arc<LocalStateManager>,
}

impl AgentClient {
    pub fn new(local_state: Arc<LocalStateManager>) -> Self {
        Self { local_state }
    }

    /// Connects to the scheduler's `AgentServer.AgentStream` RPC and drives
    /// it to completion. Returns once the scheduler closes the stream; the
    /// caller is expected to reconnect with backoff ("the agent
    /// reconnects with backoff on stream loss").
    pub async fn run(
        &self,
        endpoint: impl Into<String>,
        server_name: ServerName,
        replicas: Vec<ReplicaCapacity>,
    ) -> ControlPlaneResult<()> {
        let channel = Endpoint::from_shared(endpoint.into())
            .map_err(|err| modelplane_types::ControlPlaneError::Unavailable(err.to_string()))?
            .connect()
            .await
            .map_err(|err| modelplane_types::ControlPlaneError::Unavailable(err.to_string()))?;
        let mut client = AgentServerClient::new(channel);

        let (tx, rx) = mpsc::channel(64);
        tx.send(AgentStreamMessage {
            payload: Some(Payload::Subscribe(AgentSubscribe { server_name: server_name.to_string(), replicas })),
        })
        .await
        .map_err(|err| modelplane_types::ControlPlaneError::Internal(err.to_string()))?;

        let response = client
            .agent_stream(Request::new(ReceiverStream::new(rx)))
            .await
            .map_err(|err| modelplane_types::ControlPlaneError::Unavailable(err.to_string()))?;
        let mut inbound = response.into_inner();

        loop {
            match inbound.message().await {
                Ok(Some(op)) => self.handle_operation(op, &tx).await,
                Ok(None) => return Ok(()),
                Err(status) => return Err(modelplane_types::ControlPlaneError::Unavailable(status.to_string())),
            }
        }
    }

    async fn handle_operation(&self, op: ModelOperationMessage, tx: &mpsc::Sender<AgentStreamMessage>) {
        let model_name = ModelName::from(op.model_name.as_str());
        match ModelOperation::try_from(op.operation) {
            Ok(ModelOperation::Load) => {
                if let Some(spec) = &op.spec {
                    self.local_state.declare_model(model_name.clone(), spec.memory_bytes);
                }
                // Walk the replica through Loading before reporting Loaded: the
                // state machine has no LoadRequested -> Loaded edge, only
                // LoadRequested -> Loading -> Loaded -> Available.
                self.send_event(tx, status_event(&op, "Loading", None)).await;
                match self.local_state.ensure_load_model(&model_name).await {
                    Ok(()) => {
                        self.send_event(tx, status_event(&op, "Loaded", None)).await;
                        self.send_event(tx, status_event(&op, "Available", None)).await;
                    }
                    Err(err) => {
                        self.send_event(tx, status_event(&op, "LoadFailed", Some(err.to_string()))).await;
                    }
                }
            }
            Ok(ModelOperation::Unload) => {
                let event = match self.local_state.unload_model(&model_name).await {
                    Ok(()) => status_event(&op, "Unloaded", None),
                    Err(err) => status_event(&op, "LoadFailed", Some(err.to_string())),
                };
                self.send_event(tx, event).await;
            }
            Err(_) => {
                tracing::warn!(operation = op.operation, "unrecognized model operation, ignored");
            }
        }
    }

    async fn send_event(&self, tx: &mpsc::Sender<AgentStreamMessage>, event: AgentEvent) {
        if tx.send(AgentStreamMessage { payload: Some(Payload::Event(event)) }).await.is_err() {
            tracing::warn!("agent stream closed while reporting event");
        }
    }
}

fn status_event(op: &ModelOperationMessage, status: &str, reason: Option<String>) -> AgentEvent {
    AgentEvent {
        model_name: op.model_name.clone(),
        version: op.version,
        replica_index: op.replica_index,
        status: status.to_string(),
        reason,
        generation: op.generation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_event_carries_the_operation_identity_forward() {
        let op = ModelOperationMessage {
            model_name: "m1".to_string(),
            version: 2,
            replica_index: 3,
            operation: ModelOperation::Load as i32,
            generation: 7,
            spec: None,
        };
        let event = status_event(&op, "Loaded", None);
        assert_eq!(event.model_name, "m1");
        assert_eq!(event.version, 2);
        assert_eq!(event.replica_index, 3);
        assert_eq!(event.generation, 7);
        assert_eq!(event.status, "Loaded");
    }
}
