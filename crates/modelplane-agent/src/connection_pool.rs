//! Fixed-size backend connection pool: "Connection pool is
//! fixed-size; no per-call dialing."

use modelplane_proto::inference::inference_service_client::InferenceServiceClient;
use rand::Rng;
use tonic::transport::{Channel, Endpoint};

/// Default pool size.
pub const DEFAULT_POOL_SIZE: usize = 10;

pub struct ConnectionPool {
    clients: Vec<InferenceServiceClient<Channel>>,
}

impl ConnectionPool {
    pub async fn connect(endpoint: impl Into<String>, size: usize) -> Result<Self, tonic::transport::Error> {
        let endpoint = Endpoint::from_shared(endpoint.into())?;
        let mut clients = Vec::with_capacity(size);
        for _ in 0..size {
            let channel = endpoint.connect().await?;
            clients.push(InferenceServiceClient::new(channel));
        }
        Ok(Self { clients })
    }

    /// A randomly chosen client from the pool.
    pub fn pick(&self) -> InferenceServiceClient<Channel> {
        let idx = rand::thread_rng().gen_range(0..self.clients.len());
        self.clients[idx].clone()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
