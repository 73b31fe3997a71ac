//! Agent `ReverseProxy`, HTTP/1.1 mirror: the same header-driven
//! rewrite/retry behavior for clients that speak the HTTP inference API
//! instead of gRPC. Delegates to [`ReverseProxy`] so the two surfaces can
//! never drift on lazy-load or retry semantics.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use modelplane_proto::inference::{ModelInferRequest, ModelMetadataRequest, ModelReadyRequest};
use tonic::{Code, Request, Status};

use crate::reverse_proxy_grpc::{EXTERNAL_MODEL_HEADER, INTERNAL_MODEL_HEADER, ReverseProxy};

pub fn router(proxy: Arc<ReverseProxy>) -> Router {
    Router::new()
        .route("/v2/models/{model}/infer", post(infer))
        .route("/v2/models/{model}", get(metadata))
        .route("/v2/models/{model}/ready", get(ready))
        .with_state(proxy)
}

fn build_request<T>(headers: &HeaderMap, body: T) -> Request<T> {
    let mut request = Request::new(body);
    for name in [INTERNAL_MODEL_HEADER, EXTERNAL_MODEL_HEADER] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            if let Ok(parsed) = value.parse() {
                request.metadata_mut().insert(name, parsed);
            }
        }
    }
    request
}

fn status_to_response(status: Status) -> Response {
    let code = match status.code() {
        Code::FailedPrecondition | Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::ResourceExhausted => StatusCode::INSUFFICIENT_STORAGE,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, status.message().to_string()).into_response()
}

async fn infer(
    State(proxy): State<Arc<ReverseProxy>>,
    Path(model): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload = ModelInferRequest { model_name: model, model_version: String::new(), payload: body.to_vec() };
    match proxy.model_infer(build_request(&headers, payload)).await {
        Ok(resp) => (StatusCode::OK, resp.into_inner().payload).into_response(),
        Err(status) => status_to_response(status),
    }
}

async fn metadata(State(proxy): State<Arc<ReverseProxy>>, Path(model): Path<String>, headers: HeaderMap) -> Response {
    let payload = ModelMetadataRequest { model_name: model, model_version: String::new() };
    match proxy.model_metadata(build_request(&headers, payload)).await {
        Ok(resp) => (StatusCode::OK, resp.into_inner().payload).into_response(),
        Err(status) => status_to_response(status),
    }
}

async fn ready(State(proxy): State<Arc<ReverseProxy>>, Path(model): Path<String>, headers: HeaderMap) -> Response {
    let payload = ModelReadyRequest { model_name: model, model_version: String::new() };
    match proxy.model_ready(build_request(&headers, payload)).await {
        Ok(resp) => {
            if resp.into_inner().ready {
                StatusCode::OK.into_response()
            } else {
                StatusCode::SERVICE_UNAVAILABLE.into_response()
            }
        }
        Err(status) => status_to_response(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn build_request_copies_both_model_headers_into_grpc_metadata() {
        let mut headers = HeaderMap::new();
        headers.insert(INTERNAL_MODEL_HEADER, HeaderValue::from_static("m1_v2"));
        headers.insert(EXTERNAL_MODEL_HEADER, HeaderValue::from_static("m1"));
        let request = build_request(&headers, ());
        assert_eq!(request.metadata().get(INTERNAL_MODEL_HEADER).unwrap().to_str().unwrap(), "m1_v2");
        assert_eq!(request.metadata().get(EXTERNAL_MODEL_HEADER).unwrap().to_str().unwrap(), "m1");
    }

    #[test]
    fn not_found_status_maps_to_http_404() {
        let response = status_to_response(Status::not_found("x"));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
