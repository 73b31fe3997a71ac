//! The `agent` binary: the per-node process running `ReverseProxy`
//! (gRPC + HTTP) and `LocalStateManager`. Subscribes to the scheduler's
//! `AgentServer` stream, reconnecting with backoff on stream loss, and
//! fronts the local inference backend on both listeners concurrently.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use modelplane_agent::{AgentClient, ConnectionPool, LocalStateManager, NullBackend, ProxyMetrics, ReverseProxy};
use modelplane_config::AgentConfig;
use modelplane_proto::agent::ReplicaCapacity;
use modelplane_proto::inference::inference_service_server::InferenceServiceServer;
use tonic::transport::Server;

/// Backoff schedule for reconnecting to a dropped `AgentServer` stream.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env().map_err(|err| anyhow::anyhow!(err))?;
    modelplane_cli::init_tracing(&config.log_level);

    let pool = Arc::new(
        ConnectionPool::connect(config.backend_endpoint.clone(), config.connection_pool_size)
            .await
            .map_err(|err| anyhow::anyhow!("connecting to backend {}: {err}", config.backend_endpoint))?,
    );
    let local_state = Arc::new(LocalStateManager::new(config.capacity_bytes, Arc::new(NullBackend)));
    let metrics = Arc::new(ProxyMetrics::new());
    let proxy = ReverseProxy::new(local_state.clone(), pool, metrics);

    let shutdown = modelplane_cli::shutdown::Shutdown::install();

    let http_addr: SocketAddr = ([0, 0, 0, 0], config.listen_port).into();
    let http_router = modelplane_agent::inference_http_router(Arc::new(proxy.clone()));
    tracing::info!(%http_addr, "reverse proxy HTTP listener starting");
    let http_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            let listener = tokio::net::TcpListener::bind(http_addr).await?;
            axum::serve(listener, http_router).with_graceful_shutdown(shutdown.signaled()).await
        }
    });

    // The gRPC inference surface binds the port adjacent to the HTTP one:
    // no separate flag for it, so it is derived rather than invented as a
    // third configuration surface.
    let grpc_addr: SocketAddr = ([0, 0, 0, 0], config.listen_port + 1).into();
    tracing::info!(%grpc_addr, "reverse proxy gRPC listener starting");
    let grpc_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            Server::builder()
                .add_service(InferenceServiceServer::new(proxy))
                .serve_with_shutdown(grpc_addr, shutdown.signaled())
                .await
        }
    });

    let client_task = tokio::spawn(run_agent_client(config, local_state, shutdown.clone()));

    let (http_result, grpc_result, client_result) = tokio::join!(http_task, grpc_task, client_task);
    http_result?.map_err(|err| anyhow::anyhow!("reverse proxy HTTP listener exited with an error: {err}"))?;
    grpc_result?.map_err(|err| anyhow::anyhow!("reverse proxy gRPC listener exited with an error: {err}"))?;
    client_result?;

    tracing::info!("agent shut down cleanly");
    Ok(())
}

/// Drives [`AgentClient::run`] in a reconnect-with-backoff loop until the
/// shutdown signal fires.
async fn run_agent_client(config: AgentConfig, local_state: Arc<LocalStateManager>, shutdown: modelplane_cli::shutdown::Shutdown) {
    let client = AgentClient::new(local_state);
    let server_name = modelplane_types::ServerName::from(config.server_name.as_str());
    let replicas: Vec<ReplicaCapacity> = (0..config.replica_count)
        .map(|idx| ReplicaCapacity {
            replica_index: idx,
            total_memory_bytes: config.replica_memory_bytes,
            capabilities: config.capability_set(),
        })
        .collect();

    let mut backoff = RECONNECT_BACKOFF;
    loop {
        let run = client.run(config.scheduler_endpoint.clone(), server_name.clone(), replicas.clone());
        tokio::select! {
            result = run => {
                match result {
                    Ok(()) => tracing::info!("agent stream closed by scheduler, reconnecting"),
                    Err(err) => tracing::warn!(%err, "agent stream failed, reconnecting"),
                }
            }
            () = shutdown.clone().signaled() => {
                tracing::info!("shutdown signaled, not reconnecting");
                return;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = shutdown.clone().signaled() => return,
        }
        backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
    }
}
