//! Reverse-proxy metrics.
//!
//! `modelLagStats`/`modelLastUsedStats` are incremented on a spawned task
//! (mirroring the original's asynchronous stats emission); the caller gets
//! back a one-shot [`IncLatch`] and must wait on it before issuing the
//! paired decrement on exit, so Inc is always observable before Dec even
//! though they run on different tasks.

use std::sync::Arc;

use modelplane_types::ModelName;
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec};
use tokio::sync::Notify;

pub struct ProxyMetrics {
    model_lag: IntGaugeVec,
    model_last_used: IntGaugeVec,
    backend_latency: HistogramVec,
    backend_status: IntCounterVec,
}

impl ProxyMetrics {
    pub fn new() -> Self {
        Self {
            model_lag: IntGaugeVec::new(
                prometheus::Opts::new("modelplane_agent_model_lag", "In-flight requests per model"),
                &["model"],
            )
            .expect("metric registration"),
            model_last_used: IntGaugeVec::new(
                prometheus::Opts::new("modelplane_agent_model_last_used", "Last-used marker per model"),
                &["model"],
            )
            .expect("metric registration"),
            backend_latency: HistogramVec::new(
                prometheus::HistogramOpts::new("modelplane_agent_backend_latency_seconds", "Backend call latency"),
                &["model"],
            )
            .expect("metric registration"),
            backend_status: IntCounterVec::new(
                prometheus::Opts::new("modelplane_agent_backend_status_total", "Backend call status codes"),
                &["model", "code"],
            )
            .expect("metric registration"),
        }
    }

    /// Spawns the Inc off the calling task, returning a latch the caller
    /// must `.wait()` on before calling [`dec`](Self::dec) for the same
    /// in-flight call.
    pub fn inc(&self, model: &ModelName) -> IncLatch {
        let lag = self.model_lag.clone();
        let last_used = self.model_last_used.clone();
        let label = model.to_string();
        let notify = Arc::new(Notify::new());
        let notify_task = notify.clone();
        tokio::spawn(async move {
            lag.with_label_values(&[&label]).inc();
            last_used.with_label_values(&[&label]).inc();
            notify_task.notify_one();
        });
        IncLatch { notify }
    }

    pub fn dec(&self, model: &ModelName) {
        self.model_lag.with_label_values(&[model.as_str()]).dec();
        self.model_last_used.with_label_values(&[model.as_str()]).dec();
    }

    /// Records latency and backend status asynchronously, labeled by the
    /// *external* model name.
    pub fn record_backend_call(&self, external_model: &ModelName, status_code: &str, elapsed_secs: f64) {
        let latency = self.backend_latency.clone();
        let status = self.backend_status.clone();
        let model = external_model.to_string();
        let code = status_code.to_string();
        tokio::spawn(async move {
            latency.with_label_values(&[&model]).observe(elapsed_secs);
            status.with_label_values(&[&model, &code]).inc();
        });
    }
}

impl Default for ProxyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot completion signal for an asynchronously-spawned Inc.
pub struct IncLatch {
    notify: Arc<Notify>,
}

impl IncLatch {
    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn inc_latch_resolves_after_spawned_increment_runs() {
        let metrics = ProxyMetrics::new();
        let latch = metrics.inc(&ModelName::from("m1"));
        latch.wait().await;
        metrics.dec(&ModelName::from("m1"));
    }
}
