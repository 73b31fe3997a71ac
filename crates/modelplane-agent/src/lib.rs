//! Per-node agent: `LocalStateManager`, the gRPC/HTTP reverse proxy, and
//! the outbound `AgentClient` that subscribes to the scheduler's
//! `AgentServer` stream.

pub mod agent_client;
pub mod backend;
pub mod connection_pool;
pub mod local_state;
pub mod metrics;
pub mod reverse_proxy_grpc;
pub mod reverse_proxy_http;

pub use agent_client::AgentClient;
pub use backend::{AlwaysFailingBackend, ModelBackend, NullBackend};
pub use connection_pool::{ConnectionPool, DEFAULT_POOL_SIZE};
pub use local_state::LocalStateManager;
pub use metrics::ProxyMetrics;
pub use reverse_proxy_grpc::ReverseProxy;
pub use reverse_proxy_http::router as inference_http_router;
