//! Trait seams for the two external fan-out targets this workspace does not
//! implement: an xDS-style incremental snapshot processor, and a Kafka-style
//! chainer dataflow. Both are out of scope as concrete integrations, but the
//! `EventHub` still needs somewhere to fan model events to for them, so each
//! gets a trait plus a no-op subscriber that can be swapped for a real
//! client without touching `ModelStore` or the event bus.

use std::sync::Arc;

use modelplane_types::ModelEventMsg;

use modelplane_eventhub::EventHub;

/// Turns model state transitions into xDS-style incremental snapshot
/// updates. A real implementation would diff the event against its last
/// pushed snapshot and call out to an `envoy-control-plane`-style cache.
pub trait IncrementalProcessor: Send + Sync {
    fn process(&self, event: &ModelEventMsg);
}

/// Turns model state transitions into chainer dataflow records. A real
/// implementation would publish onto a Kafka-backed pipeline topic keyed by
/// model name.
pub trait Chainer: Send + Sync {
    fn process(&self, event: &ModelEventMsg);
}

/// Discards every event. The default wiring until a real xDS client exists.
pub struct NoOpIncrementalProcessor;

impl IncrementalProcessor for NoOpIncrementalProcessor {
    fn process(&self, event: &ModelEventMsg) {
        tracing::trace!(model = %event.model, version = event.version, "incremental processor: no-op");
    }
}

/// Discards every event. The default wiring until a real chainer client
/// exists.
pub struct NoOpChainer;

impl Chainer for NoOpChainer {
    fn process(&self, event: &ModelEventMsg) {
        tracing::trace!(model = %event.model, version = event.version, "chainer: no-op");
    }
}

/// Registers the no-op incremental processor and chainer on `hub`'s model
/// topic, so the fan-out targets these traits model are actually present on
/// the bus rather than merely named in a doc comment.
pub async fn register_noop_subscribers(hub: &Arc<EventHub>) {
    let processor: Arc<dyn IncrementalProcessor> = Arc::new(NoOpIncrementalProcessor);
    hub.register_model_event_handler(
        "incremental-processor",
        64,
        Arc::new(move |msg: ModelEventMsg| {
            let processor = processor.clone();
            Box::pin(async move { processor.process(&msg) })
        }),
    )
    .await;

    let chainer: Arc<dyn Chainer> = Arc::new(NoOpChainer);
    hub.register_model_event_handler(
        "chainer",
        64,
        Arc::new(move |msg: ModelEventMsg| {
            let chainer = chainer.clone();
            Box::pin(async move { chainer.process(&msg) })
        }),
    )
    .await;
}
