//! Agent `ReverseProxy`, gRPC surface.
//!
//! Fronts the local inference backend's `ModelInfer`/`ModelMetadata`/
//! `ModelReady` with header-driven model rewriting, lazy loading, and a
//! single bounded retry on transient backend failure.

use std::sync::Arc;
use std::time::Instant;

use modelplane_proto::inference::inference_service_client::InferenceServiceClient;
use modelplane_proto::inference::{
    ModelInferRequest, ModelInferResponse, ModelMetadataRequest, ModelMetadataResponse, ModelReadyRequest,
    ModelReadyResponse,
};
use modelplane_types::ModelName;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;
use tonic::{Code, Request, Response, Status};

use crate::connection_pool::ConnectionPool;
use crate::local_state::LocalStateManager;
use crate::metrics::ProxyMetrics;

pub const INTERNAL_MODEL_HEADER: &str = "seldon-internal-model";
pub const EXTERNAL_MODEL_HEADER: &str = "seldon-model";

#[derive(Clone)]
pub struct ReverseProxy {
    local_state: Arc<LocalStateManager>,
    pool: Arc<ConnectionPool>,
    metrics: Arc<ProxyMetrics>,
}

impl ReverseProxy {
    pub fn new(local_state: Arc<LocalStateManager>, pool: Arc<ConnectionPool>, metrics: Arc<ProxyMetrics>) -> Self {
        Self { local_state, pool, metrics }
    }

    /// Missing headers is the one request-shape error this surface
    /// returns — everything past it speaks in terms of model availability,
    /// not malformed input.
    pub fn extract_model_names(metadata: &MetadataMap) -> Result<(ModelName, ModelName), Status> {
        let internal = metadata
            .get(INTERNAL_MODEL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::failed_precondition(format!("missing {INTERNAL_MODEL_HEADER} header")))?;
        let external = metadata
            .get(EXTERNAL_MODEL_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Status::failed_precondition(format!("missing {EXTERNAL_MODEL_HEADER} header")))?;
        Ok((ModelName::from(internal), ModelName::from(external)))
    }

    /// Fires the Inc latch and pins the model against eviction for the
    /// duration of `work`, then unwinds so Dec only happens after the
    /// paired Inc is observably complete.
    async fn instrumented<T>(
        &self,
        internal: &ModelName,
        work: impl std::future::Future<Output = Result<T, Status>>,
    ) -> Result<T, Status> {
        let latch = self.metrics.inc(internal);
        self.local_state.begin_request(internal);
        let result = work.await;
        self.local_state.end_request(internal);
        latch.wait().await;
        self.metrics.dec(internal);
        result
    }

    pub async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        let (internal, external) = Self::extract_model_names(request.metadata())?;
        let mut payload = request.into_inner();
        payload.model_name = internal.to_string();
        payload.model_version.clear();

        self.instrumented(&internal, async {
            self.ensure_loaded(&internal).await?;
            self.call_with_retry(&internal, &external, payload, |mut c, p| async move { c.model_infer(p).await })
                .await
        })
        .await
    }

    pub async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        let (internal, external) = Self::extract_model_names(request.metadata())?;
        let mut payload = request.into_inner();
        payload.model_name = internal.to_string();
        payload.model_version.clear();

        self.instrumented(&internal, async {
            self.ensure_loaded(&internal).await?;
            self.call_with_retry(&internal, &external, payload, |mut c, p| async move { c.model_metadata(p).await })
                .await
        })
        .await
    }

    pub async fn model_ready(
        &self,
        request: Request<ModelReadyRequest>,
    ) -> Result<Response<ModelReadyResponse>, Status> {
        let (internal, external) = Self::extract_model_names(request.metadata())?;
        let mut payload = request.into_inner();
        payload.model_name = internal.to_string();
        payload.model_version.clear();

        self.instrumented(&internal, async {
            self.ensure_loaded(&internal).await?;
            self.call_with_retry(&internal, &external, payload, |mut c, p| async move { c.model_ready(p).await })
                .await
        })
        .await
    }

    /// The authoritative user-visible "model not found".
    async fn ensure_loaded(&self, internal: &ModelName) -> Result<(), Status> {
        self.local_state
            .ensure_load_model(internal)
            .await
            .map_err(|_| Status::not_found(format!("model {internal} not found")))
    }

    /// Calls the backend once; on `NotFound`/`Unavailable` reloads
    /// synchronously and retries exactly once. Shared by all three
    /// inference-surface methods so they can never drift on retry/metrics
    /// behavior.
    async fn call_with_retry<Req, Resp, F, Fut>(
        &self,
        internal: &ModelName,
        external: &ModelName,
        payload: Req,
        call: F,
    ) -> Result<Response<Resp>, Status>
    where
        Req: Clone,
        F: Fn(InferenceServiceClient<Channel>, Req) -> Fut,
        Fut: std::future::Future<Output = Result<Response<Resp>, Status>>,
    {
        let start = Instant::now();
        let first = call(self.pool.pick(), payload.clone()).await;
        let outcome = match first {
            Ok(resp) => Ok(resp),
            Err(status) if is_lazy_reload_signal(&status) => {
                self.local_state
                    .load_model(internal)
                    .await
                    .map_err(|_| Status::not_found(format!("model {internal} not found after reload")))?;
                call(self.pool.pick(), payload).await
            }
            Err(status) => Err(status),
        };
        let label = match &outcome {
            Ok(_) => "ok".to_string(),
            Err(status) => status.code().to_string(),
        };
        self.metrics.record_backend_call(external, &label, start.elapsed().as_secs_f64());
        outcome
    }
}

/// Backend `NotFound`/`Unavailable` is a lazy-reload signal, not a
/// terminal failure — retried exactly once.
fn is_lazy_reload_signal(status: &Status) -> bool {
    matches!(status.code(), Code::NotFound | Code::Unavailable)
}

#[tonic::async_trait]
impl modelplane_proto::inference::inference_service_server::InferenceService for ReverseProxy {
    async fn model_infer(
        &self,
        request: Request<ModelInferRequest>,
    ) -> Result<Response<ModelInferResponse>, Status> {
        ReverseProxy::model_infer(self, request).await
    }

    async fn model_metadata(
        &self,
        request: Request<ModelMetadataRequest>,
    ) -> Result<Response<ModelMetadataResponse>, Status> {
        ReverseProxy::model_metadata(self, request).await
    }

    async fn model_ready(
        &self,
        request: Request<ModelReadyRequest>,
    ) -> Result<Response<ModelReadyResponse>, Status> {
        ReverseProxy::model_ready(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn missing_internal_header_is_failed_precondition() {
        let mut metadata = MetadataMap::new();
        metadata.insert(EXTERNAL_MODEL_HEADER, MetadataValue::from_static("m1"));
        let err = ReverseProxy::extract_model_names(&metadata).unwrap_err();
        assert_eq!(err.code(), Code::FailedPrecondition);
    }

    #[test]
    fn both_headers_present_extracts_both_names() {
        let mut metadata = MetadataMap::new();
        metadata.insert(INTERNAL_MODEL_HEADER, MetadataValue::from_static("m1_v2"));
        metadata.insert(EXTERNAL_MODEL_HEADER, MetadataValue::from_static("m1"));
        let (internal, external) = ReverseProxy::extract_model_names(&metadata).unwrap();
        assert_eq!(internal, ModelName::from("m1_v2"));
        assert_eq!(external, ModelName::from("m1"));
    }

    #[test]
    fn not_found_and_unavailable_are_lazy_reload_signals() {
        assert!(is_lazy_reload_signal(&Status::not_found("x")));
        assert!(is_lazy_reload_signal(&Status::unavailable("x")));
        assert!(!is_lazy_reload_signal(&Status::internal("x")));
    }
}
