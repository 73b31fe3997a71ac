//! # modelplane-eventhub: process-wide typed pub/sub bus
//!
//! Fans state transitions from the scheduler's stores out to subscribers
//! (the xDS processor, the agent server, the chainer relay, the external
//! API stream).
//!
//! Each `RegisterXEventHandler` call gets its own bounded queue; `Publish`
//! blocks on a full subscriber queue rather than drop a live event.
//! `Close` is safe to race against `Publish`: `Publish` holds the hub's
//! closed-flag read lock for the duration of the dispatch, and `Close`
//! cannot acquire the write lock until every in-flight `Publish` call has
//! returned, so no subscriber ever observes a send racing a drop of its
//! channel.

mod topic;

use std::sync::Arc;

use modelplane_types::{ExperimentEventMsg, ModelEventMsg, PipelineEventMsg, ServerEventMsg};
use tokio::sync::RwLock;

pub use topic::Handler;
use topic::Topic;

/// The process-wide event bus. Constructed once at startup and passed in
/// (never a global), closed once at shutdown.
pub struct EventHub {
    closed: RwLock<bool>,
    model: Topic<ModelEventMsg>,
    server: Topic<ServerEventMsg>,
    experiment: Topic<ExperimentEventMsg>,
    pipeline: Topic<PipelineEventMsg>,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: RwLock::new(false),
            model: Topic::new("model"),
            server: Topic::new("server"),
            experiment: Topic::new("experiment"),
            pipeline: Topic::new("pipeline"),
        })
    }

    pub async fn register_model_event_handler(
        &self,
        name: &str,
        queue_size: usize,
        handle: Handler<ModelEventMsg>,
    ) {
        self.model.register(name, queue_size, handle).await;
    }

    pub async fn register_server_event_handler(
        &self,
        name: &str,
        queue_size: usize,
        handle: Handler<ServerEventMsg>,
    ) {
        self.server.register(name, queue_size, handle).await;
    }

    pub async fn register_experiment_event_handler(
        &self,
        name: &str,
        queue_size: usize,
        handle: Handler<ExperimentEventMsg>,
    ) {
        self.experiment.register(name, queue_size, handle).await;
    }

    pub async fn register_pipeline_event_handler(
        &self,
        name: &str,
        queue_size: usize,
        handle: Handler<PipelineEventMsg>,
    ) {
        self.pipeline.register(name, queue_size, handle).await;
    }

    pub async fn publish_model_event(&self, msg: ModelEventMsg) {
        let closed = self.closed.read().await;
        if *closed {
            return;
        }
        self.model.publish(msg).await;
    }

    pub async fn publish_server_event(&self, msg: ServerEventMsg) {
        let closed = self.closed.read().await;
        if *closed {
            return;
        }
        self.server.publish(msg).await;
    }

    pub async fn publish_experiment_event(&self, msg: ExperimentEventMsg) {
        let closed = self.closed.read().await;
        if *closed {
            return;
        }
        self.experiment.publish(msg).await;
    }

    pub async fn publish_pipeline_event(&self, msg: PipelineEventMsg) {
        let closed = self.closed.read().await;
        if *closed {
            return;
        }
        self.pipeline.publish(msg).await;
    }

    /// Sets `closed`, then drains and closes every subscriber queue exactly
    /// once. Safe to call more than once; the second call is a no-op aside
    /// from re-clearing already-empty subscriber lists.
    pub async fn close(&self) {
        let mut closed = self.closed.write().await;
        *closed = true;
        self.model.close().await;
        self.server.close().await;
        self.experiment.close().await;
        self.pipeline.close().await;
    }

    pub async fn is_closed(&self) -> bool {
        *self.closed.read().await
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self {
            closed: RwLock::new(false),
            model: Topic::new("model"),
            server: Topic::new("server"),
            experiment: Topic::new("experiment"),
            pipeline: Topic::new("pipeline"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelplane_types::{ExperimentEventKind, ExperimentName};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn subscriber_receives_events_in_fifo_order() {
        let hub = EventHub::new();
        let received = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();
        hub.register_experiment_event_handler(
            "test",
            8,
            Arc::new(move |msg: ExperimentEventMsg| {
                let received = received_clone.clone();
                Box::pin(async move {
                    received.lock().await.push(msg.experiment.to_string());
                })
            }),
        )
        .await;

        for i in 0..5 {
            hub.publish_experiment_event(ExperimentEventMsg {
                source: "test".into(),
                experiment: ExperimentName::from(format!("e{i}")),
                kind: ExperimentEventKind::Updated,
                previous_baseline: None,
            })
            .await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let got = received.lock().await.clone();
        assert_eq!(got, vec!["e0", "e1", "e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn publish_after_close_is_silently_dropped() {
        let hub = EventHub::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        hub.register_experiment_event_handler(
            "test",
            8,
            Arc::new(move |_msg: ExperimentEventMsg| {
                let count = count_clone.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

        hub.close().await;
        hub.publish_experiment_event(ExperimentEventMsg {
            source: "test".into(),
            experiment: ExperimentName::from("e"),
            kind: ExperimentEventKind::Updated,
            previous_baseline: None,
        })
        .await;

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_observe_every_event() {
        let hub = EventHub::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));
        let a = count_a.clone();
        let b = count_b.clone();
        hub.register_experiment_event_handler(
            "a",
            4,
            Arc::new(move |_| {
                let a = a.clone();
                Box::pin(async move {
                    a.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;
        hub.register_experiment_event_handler(
            "b",
            4,
            Arc::new(move |_| {
                let b = b.clone();
                Box::pin(async move {
                    b.fetch_add(1, Ordering::SeqCst);
                })
            }),
        )
        .await;

        hub.publish_experiment_event(ExperimentEventMsg {
            source: "test".into(),
            experiment: ExperimentName::from("e"),
            kind: ExperimentEventKind::Updated,
            previous_baseline: None,
        })
        .await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }
}
