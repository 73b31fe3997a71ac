//! The `scheduler` binary: the control-plane process — EventHub,
//! ModelStore, ExperimentStore, PipelineStore, SimpleScheduler, SchedulerAPI,
//! AgentServer. The xDS snapshot server, chainer dataflow advisory RPC, and
//! pipeline gateway are external collaborators out of scope for this
//! process; their CLI flags are parsed and otherwise unused, accepted as
//! unimplemented externalities.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use modelplane_config::SchedulerArgs;
use modelplane_core::{register_noop_subscribers, ExperimentReadinessRelay, ExperimentStore, ModelStore, PipelineStore, Rescheduler};
use modelplane_eventhub::EventHub;
use modelplane_persist::Db;
use modelplane_proto::agent::agent_server_server::AgentServerServer;
use modelplane_proto::scheduler::scheduler_server::SchedulerServer;
use modelplane_server::{AgentServer, SchedulerApi};
use tonic::transport::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SchedulerArgs::parse_args();
    modelplane_cli::init_tracing(&args.log_level);

    if !args.allow_plaintext {
        tracing::warn!("-allow-plaintxt=false requested but mTLS issuance is out of scope; serving plaintext anyway");
    }

    let hub = EventHub::new();
    let models = ModelStore::new(hub.clone());

    let (pipelines, experiments) = match &args.db_path {
        Some(path) => {
            let db = Db::open(path).with_context(|| format!("opening durable store at {}", path.display()))?;
            let pipelines = PipelineStore::with_persistence(hub.clone(), db.namespace("pipeline")?)
                .await
                .context("reloading persisted pipelines")?;
            let experiments = ExperimentStore::with_persistence(
                hub.clone(),
                models.clone(),
                pipelines.clone(),
                db.namespace("experiment")?,
            )
            .await
            .context("reloading persisted experiments")?;
            (pipelines, experiments)
        }
        None => {
            let pipelines = PipelineStore::new(hub.clone());
            let experiments = ExperimentStore::new(hub.clone(), models.clone(), pipelines.clone());
            (pipelines, experiments)
        }
    };

    let rescheduler = Arc::new(Rescheduler::new(models.clone()));
    let relay = Arc::new(ExperimentReadinessRelay::new(experiments.clone()));

    {
        let rescheduler = rescheduler.clone();
        hub.register_model_event_handler(
            "rescheduler",
            64,
            Arc::new(move |msg: modelplane_types::ModelEventMsg| {
                let rescheduler = rescheduler.clone();
                Box::pin(async move { rescheduler.handle(msg).await })
            }),
        )
        .await;
    }
    {
        let relay = relay.clone();
        hub.register_model_event_handler(
            "experiment-readiness/model",
            64,
            Arc::new(move |msg: modelplane_types::ModelEventMsg| {
                let relay = relay.clone();
                Box::pin(async move { relay.handle_model_event(msg).await })
            }),
        )
        .await;
    }
    {
        let relay = relay.clone();
        hub.register_pipeline_event_handler(
            "experiment-readiness/pipeline",
            64,
            Arc::new(move |msg: modelplane_types::PipelineEventMsg| {
                let relay = relay.clone();
                Box::pin(async move { relay.handle_pipeline_event(msg).await })
            }),
        )
        .await;
    }

    register_noop_subscribers(&hub).await;

    let shutdown = modelplane_cli::shutdown::Shutdown::install();

    let scheduler_api = SchedulerApi::new(models.clone(), hub.clone());
    let scheduler_addr: SocketAddr = ([0, 0, 0, 0], args.scheduler_port).into();
    tracing::info!(%scheduler_addr, "SchedulerAPI listening");
    let scheduler_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            Server::builder()
                .add_service(SchedulerServer::new(scheduler_api))
                .serve_with_shutdown(scheduler_addr, shutdown.signaled())
                .await
        }
    });

    let agent_server = AgentServer::new(models.clone(), hub.clone());
    let agent_addr: SocketAddr = ([0, 0, 0, 0], args.agent_port).into();
    tracing::info!(%agent_addr, "AgentServer listening");
    let agent_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            Server::builder()
                .add_service(AgentServerServer::new(agent_server))
                .serve_with_shutdown(agent_addr, shutdown.signaled())
                .await
        }
    });

    let (scheduler_result, agent_result) = tokio::try_join!(scheduler_task, agent_task)?;
    scheduler_result.context("SchedulerAPI server exited with an error")?;
    agent_result.context("AgentServer exited with an error")?;

    hub.close().await;
    tracing::info!("scheduler shut down cleanly");
    Ok(())
}
