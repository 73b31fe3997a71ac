//! `SchedulerAPI`: the scheduler's external gRPC surface — `ServerStatus`,
//! `LoadModel`, `UnloadModel`, `ModelStatus`, `SubscribeModelEvents`.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;

use modelplane_core::ModelStore;
use modelplane_eventhub::EventHub;
use modelplane_proto::scheduler::scheduler_server::Scheduler;
use modelplane_proto::scheduler::{
    DeploymentSpecProto, LoadModelRequest, LoadModelResponse, ModelEventMessage, ModelReference,
    ModelStatusResponse, ModelSubscriptionRequest, ReplicaStatusProto, ServerReference,
    ServerStatusResponse, UnloadModelResponse,
};
use modelplane_types::{DeploymentSpec, ModelName, ModelState, ServerName};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};

use crate::error::to_status;

pub struct SchedulerApi {
    models: Arc<ModelStore>,
    hub: Arc<EventHub>,
}

impl SchedulerApi {
    pub fn new(models: Arc<ModelStore>, hub: Arc<EventHub>) -> Self {
        Self { models, hub }
    }
}

#[tonic::async_trait]
impl Scheduler for SchedulerApi {
    async fn server_status(
        &self,
        request: Request<ServerReference>,
    ) -> Result<Response<ServerStatusResponse>, Status> {
        let name = ServerName::from(request.into_inner().server_name);
        let server = self
            .models
            .get_server(&name)
            .await
            .ok_or_else(|| Status::not_found(format!("server {name} not found")))?;
        let replicas = server
            .replicas
            .iter()
            .map(|r| ReplicaStatusProto {
                replica_index: r.index.0,
                status: if r.available { "Available".to_string() } else { "Unavailable".to_string() },
                reason: None,
            })
            .collect();
        Ok(Response::new(ServerStatusResponse { server_name: name.to_string(), replicas }))
    }

    async fn load_model(
        &self,
        request: Request<LoadModelRequest>,
    ) -> Result<Response<LoadModelResponse>, Status> {
        let req = request.into_inner();
        if req.model_name.is_empty() {
            return Err(Status::invalid_argument("model_name is required"));
        }
        let spec_proto = req.spec.ok_or_else(|| Status::invalid_argument("spec is required"))?;
        let spec = deployment_spec_from_proto(spec_proto);
        self.models
            .update_model(ModelName::from(req.model_name), spec)
            .await
            .map_err(to_status)?;
        Ok(Response::new(LoadModelResponse {}))
    }

    async fn unload_model(
        &self,
        request: Request<ModelReference>,
    ) -> Result<Response<UnloadModelResponse>, Status> {
        let name = ModelName::from(request.into_inner().model_name);
        self.models.unload_model(name).await.map_err(to_status)?;
        Ok(Response::new(UnloadModelResponse {}))
    }

    async fn model_status(
        &self,
        request: Request<ModelReference>,
    ) -> Result<Response<ModelStatusResponse>, Status> {
        let name = ModelName::from(request.into_inner().model_name);
        let model = self
            .models
            .get_model(&name)
            .await
            .ok_or_else(|| Status::not_found(format!("model {name} not found")))?;
        let version = model.latest().ok_or_else(|| Status::not_found(format!("model {name} has no versions")))?;
        let replicas = version
            .assigned_replicas
            .iter()
            .map(|(reference, state)| ReplicaStatusProto {
                replica_index: reference.replica.0,
                status: format!("{:?}", state.status),
                reason: state.reason.clone(),
            })
            .collect();
        Ok(Response::new(ModelStatusResponse {
            model_name: name.to_string(),
            version: version.version,
            state: model_state_label(version.state).to_string(),
            schedule_failure_reason: version.schedule_failure_reason.clone(),
            replicas,
        }))
    }

    type SubscribeModelEventsStream =
        Pin<Box<dyn futures::Stream<Item = Result<ModelEventMessage, Status>> + Send + 'static>>;

    /// Emits a synthetic event per existing model on subscribe, then
    /// streams deltas.
    async fn subscribe_model_events(
        &self,
        _request: Request<ModelSubscriptionRequest>,
    ) -> Result<Response<Self::SubscribeModelEventsStream>, Status> {
        let (tx, rx) = mpsc::channel(64);

        for model in self.models.models().await {
            if let Some(version) = model.latest() {
                let msg = ModelEventMessage {
                    model_name: model.name.to_string(),
                    version: version.version,
                    state: model_state_label(version.state).to_string(),
                };
                if tx.send(Ok(msg)).await.is_err() {
                    break;
                }
            }
        }

        self.hub
            .register_model_event_handler(
                "subscribe_model_events",
                64,
                Arc::new(move |msg: modelplane_types::ModelEventMsg| {
                    let tx = tx.clone();
                    Box::pin(async move {
                        let proto = ModelEventMessage {
                            model_name: msg.model.to_string(),
                            version: msg.version,
                            state: model_state_label(msg.state).to_string(),
                        };
                        let _ = tx.send(Ok(proto)).await;
                    })
                }),
            )
            .await;

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}

fn deployment_spec_from_proto(proto: DeploymentSpecProto) -> DeploymentSpec {
    DeploymentSpec {
        memory_bytes: proto.memory_bytes,
        required_capabilities: proto.required_capabilities.into_iter().collect::<BTreeSet<_>>(),
        desired_replicas: proto.desired_replicas,
        min_replicas: proto.min_replicas,
        max_replicas: proto.max_replicas,
    }
}

fn model_state_label(state: ModelState) -> &'static str {
    match state {
        ModelState::ModelProgressing => "ModelProgressing",
        ModelState::ModelAvailable => "ModelAvailable",
        ModelState::ModelFailed => "ModelFailed",
        ModelState::ScheduleFailed => "ScheduleFailed",
        ModelState::ModelTerminating => "ModelTerminating",
        ModelState::ModelTerminated => "ModelTerminated",
    }
}
