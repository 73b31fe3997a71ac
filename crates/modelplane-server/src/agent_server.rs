//! `AgentServer` (scheduler side): bidirectional stream accepting one
//! agent subscription per call.

use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use modelplane_core::ModelStore;
use modelplane_eventhub::EventHub;
use modelplane_proto::agent::agent_server_server::AgentServer as AgentServerTrait;
use modelplane_proto::agent::{
    agent_stream_message::Payload, AgentStreamMessage, DeploymentSpecProto, ModelOperation,
    ModelOperationMessage,
};
use modelplane_types::{ModelName, Replica, ReplicaIndex, ReplicaRef, ReplicaStatus, ServerName};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};

pub struct AgentServer {
    models: Arc<ModelStore>,
    hub: Arc<EventHub>,
}

impl AgentServer {
    pub fn new(models: Arc<ModelStore>, hub: Arc<EventHub>) -> Self {
        Self { models, hub }
    }
}

#[tonic::async_trait]
impl AgentServerTrait for AgentServer {
    type AgentStreamStream = Pin<Box<dyn futures::Stream<Item = Result<ModelOperationMessage, Status>> + Send + 'static>>;

    async fn agent_stream(
        &self,
        request: Request<Streaming<AgentStreamMessage>>,
    ) -> Result<Response<Self::AgentStreamStream>, Status> {
        let mut inbound = request.into_inner();

        let Some(first) = inbound.next().await else {
            return Err(Status::invalid_argument("stream closed before AgentSubscribe"));
        };
        let first = first?;
        let Some(Payload::Subscribe(subscribe)) = first.payload else {
            return Err(Status::invalid_argument("first message must be AgentSubscribe"));
        };

        let server = ServerName::from(subscribe.server_name);
        let replicas = subscribe
            .replicas
            .into_iter()
            .map(|r| Replica::new(ReplicaIndex(r.replica_index), r.total_memory_bytes, r.capabilities.into_iter().collect()))
            .collect();
        self.models
            .register_server(server.clone(), replicas)
            .await
            .map_err(crate::error::to_status)?;

        let (tx, rx) = mpsc::channel(64);

        let relay_server = server.clone();
        let relay_tx = tx.clone();
        let relay_models = self.models.clone();
        self.hub
            .register_model_event_handler(
                &format!("agent_relay:{server}"),
                64,
                Arc::new(move |msg: modelplane_types::ModelEventMsg| {
                    let relay_server = relay_server.clone();
                    let relay_tx = relay_tx.clone();
                    let relay_models = relay_models.clone();
                    Box::pin(async move {
                        let Some(model) = relay_models.get_model(&msg.model).await else { return };
                        let Some(version) = model.versions.iter().find(|v| v.version == msg.version) else { return };
                        if version.assigned_server.as_ref() != Some(&relay_server) {
                            return;
                        }
                        let terminating = matches!(
                            version.state,
                            modelplane_types::ModelState::ModelTerminating | modelplane_types::ModelState::ModelTerminated
                        );
                        for (reference, state) in &version.assigned_replicas {
                            if reference.server != relay_server {
                                continue;
                            }
                            let operation = if terminating {
                                if state.status == ReplicaStatus::Unloaded {
                                    continue;
                                }
                                ModelOperation::Unload
                            } else {
                                if state.status != ReplicaStatus::LoadRequested {
                                    continue;
                                }
                                ModelOperation::Load
                            };
                            let op_msg = ModelOperationMessage {
                                model_name: model.name.to_string(),
                                version: version.version,
                                replica_index: reference.replica.0,
                                operation: operation as i32,
                                generation: version.generation,
                                spec: Some(DeploymentSpecProto {
                                    memory_bytes: version.spec.memory_bytes,
                                    required_capabilities: version.spec.required_capabilities.iter().cloned().collect(),
                                }),
                            };
                            let _ = relay_tx.send(Ok(op_msg)).await;
                        }
                    })
                }),
            )
            .await;

        let forward_models = self.models.clone();
        let forward_server = server.clone();
        tokio::spawn(async move {
            while let Some(next) = inbound.next().await {
                let Ok(msg) = next else { break };
                let Some(Payload::Event(event)) = msg.payload else { continue };
                let Some(status) = parse_replica_status(&event.status) else {
                    tracing::warn!(status = %event.status, "unrecognized replica status from agent, ignored");
                    continue;
                };
                let reference = ReplicaRef::new(forward_server.clone(), ReplicaIndex(event.replica_index));
                if let Err(err) = forward_models
                    .update_model_state(
                        ModelName::from(event.model_name),
                        event.version,
                        reference,
                        status,
                        event.reason,
                        event.generation,
                    )
                    .await
                {
                    tracing::warn!(%err, "failed to apply agent event");
                }
            }

            // Stream ended: mark every replica on this server Unavailable;
            // ModelStore's DisconnectServer kernel command recomputes and
            // emits the ModelEvents the Rescheduler needs.
            if let Err(err) = forward_models.disconnect_server(forward_server.clone()).await {
                tracing::warn!(%err, server = %forward_server, "failed to mark server disconnected");
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

fn parse_replica_status(s: &str) -> Option<ReplicaStatus> {
    Some(match s {
        "LoadRequested" => ReplicaStatus::LoadRequested,
        "Loading" => ReplicaStatus::Loading,
        "Loaded" => ReplicaStatus::Loaded,
        "LoadFailed" => ReplicaStatus::LoadFailed,
        "UnloadRequested" => ReplicaStatus::UnloadRequested,
        "Unloading" => ReplicaStatus::Unloading,
        "Unloaded" => ReplicaStatus::Unloaded,
        "Available" => ReplicaStatus::Available,
        "Unavailable" => ReplicaStatus::Unavailable,
        "Draining" => ReplicaStatus::Draining,
        _ => return None,
    })
}

