//! A single topic: a set of bounded, per-subscriber queues plus the worker
//! tasks draining them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

/// An async handler invoked once per delivered event. Boxed so a topic can
/// hold a heterogeneous set of subscriber callbacks.
pub type Handler<T> = Arc<dyn Fn(T) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// One topic's subscriber set: each subscriber owns a bounded `mpsc`
/// channel and a worker task that drains it in FIFO order until the
/// sender half is dropped by `Close`.
pub struct Topic<T> {
    name: &'static str,
    senders: Mutex<Vec<mpsc::Sender<T>>>,
}

impl<T: Send + 'static> Topic<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, senders: Mutex::new(Vec::new()) }
    }

    /// Registers a new subscriber: creates its bounded queue, spawns the
    /// worker task that drains it via `handle`, and records the sender.
    pub async fn register(&self, subscriber: &str, queue_size: usize, handle: Handler<T>) {
        let (tx, mut rx) = mpsc::channel(queue_size.max(1));
        {
            let mut senders = self.senders.lock().await;
            senders.push(tx);
        }
        let topic = self.name;
        let subscriber = subscriber.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handle(event).await;
            }
            tracing::debug!(topic, subscriber, "subscriber queue closed");
        });
    }

    /// Dispatches `msg` to every subscriber in registration order. Each
    /// send is awaited: a full queue backpressures this call on that
    /// subscriber only, never drops a live event, and never races with a
    /// concurrent `close` because the caller holds the hub's closed-flag
    /// read lock for the duration of this call.
    pub async fn publish(&self, msg: T)
    where
        T: Clone,
    {
        let senders = self.senders.lock().await;
        for sender in senders.iter() {
            if sender.send(msg.clone()).await.is_err() {
                warn!(topic = self.name, "subscriber channel closed unexpectedly, dropping event");
            }
        }
    }

    /// Drops every subscriber's sender half exactly once, which closes
    /// their receivers and lets the worker tasks drain and exit.
    pub async fn close(&self) {
        let mut senders = self.senders.lock().await;
        senders.clear();
    }
}
