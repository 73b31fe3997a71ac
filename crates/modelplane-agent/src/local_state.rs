//! `LocalStateManager`: per-agent lazy loader with an LRU eviction queue
//! and single-flight `EnsureLoadModel`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use modelplane_types::{ControlPlaneError, ControlPlaneResult, ModelName};
use tokio::sync::watch;

use crate::backend::ModelBackend;

type LoadOutcome = Result<(), String>;

enum EntryStatus {
    Loaded,
    /// A load is in flight; waiters clone the receiver and block on
    /// `changed()` until the outcome is published — the one-shot "latch".
    Loading(watch::Receiver<Option<LoadOutcome>>),
    /// Either never loaded, evicted, or the last load attempt failed.
    NotLoaded(Option<String>),
}

struct Entry {
    declared_memory_bytes: u64,
    status: EntryStatus,
    refcount: u32,
    last_used: Instant,
}

/// Per-agent model residency tracker fronting one `ModelBackend`.
pub struct LocalStateManager {
    capacity_bytes: u64,
    backend: Arc<dyn ModelBackend>,
    entries: Mutex<BTreeMap<ModelName, Entry>>,
}

impl LocalStateManager {
    pub fn new(capacity_bytes: u64, backend: Arc<dyn ModelBackend>) -> Self {
        Self { capacity_bytes, backend, entries: Mutex::new(BTreeMap::new()) }
    }

    /// Registers (or refreshes) a model's declared memory footprint ahead
    /// of any `EnsureLoadModel` call — populated from the scheduler's Load
    /// command.
    pub fn declare_model(&self, name: ModelName, memory_bytes: u64) {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(name)
            .and_modify(|e| e.declared_memory_bytes = memory_bytes)
            .or_insert(Entry {
                declared_memory_bytes: memory_bytes,
                status: EntryStatus::NotLoaded(None),
                refcount: 0,
                last_used: Instant::now(),
            });
    }

    pub fn is_loaded(&self, name: &ModelName) -> bool {
        matches!(self.entries.lock().unwrap().get(name).map(|e| &e.status), Some(EntryStatus::Loaded))
    }

    pub fn begin_request(&self, name: &ModelName) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.refcount += 1;
        }
    }

    pub fn end_request(&self, name: &ModelName) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.refcount = entry.refcount.saturating_sub(1);
        }
    }

    /// If loaded, returns immediately. If a load is already in flight, waits
    /// on its latch. Otherwise starts a new load: evicts LRU zero-refcount
    /// models until there is room, then calls the backend.
    pub async fn ensure_load_model(&self, name: &ModelName) -> ControlPlaneResult<()> {
        let rx = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| ControlPlaneError::NotFound(format!("model {name} not declared")))?;
            match &entry.status {
                EntryStatus::Loaded => {
                    entry.last_used = Instant::now();
                    return Ok(());
                }
                EntryStatus::Loading(rx) => rx.clone(),
                EntryStatus::NotLoaded(_) => {
                    let (tx, rx) = watch::channel(None);
                    entry.status = EntryStatus::Loading(rx.clone());
                    drop(entries);
                    return self.run_load(name, tx).await;
                }
            }
        };
        Self::wait_for_load(rx).await
    }

    /// Idempotent reload: forces a fresh `EnsureLoadModel` even if the
    /// model currently reads as loaded.
    pub async fn load_model(&self, name: &ModelName) -> ControlPlaneResult<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(entry) = entries.get_mut(name) {
                if matches!(entry.status, EntryStatus::Loaded) {
                    entry.status = EntryStatus::NotLoaded(None);
                }
            }
        }
        self.ensure_load_model(name).await
    }

    /// Unloads `name` from the backend and marks it not-loaded — the
    /// agent's response to a scheduler `Unload` operation message.
    pub async fn unload_model(&self, name: &ModelName) -> ControlPlaneResult<()> {
        self.backend.unload(name).await?;
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.status = EntryStatus::NotLoaded(None);
        }
        Ok(())
    }

    async fn wait_for_load(mut rx: watch::Receiver<Option<LoadOutcome>>) -> ControlPlaneResult<()> {
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome.map_err(ControlPlaneError::NotFound);
            }
            if rx.changed().await.is_err() {
                return Err(ControlPlaneError::Internal("load latch dropped without a result".to_string()));
            }
        }
    }

    async fn run_load(&self, name: &ModelName, tx: watch::Sender<Option<LoadOutcome>>) -> ControlPlaneResult<()> {
        let memory_bytes = self.entries.lock().unwrap().get(name).map_or(0, |e| e.declared_memory_bytes);

        let victims = match self.reserve_capacity(name, memory_bytes) {
            Ok(victims) => victims,
            Err(reason) => {
                self.fail(name, &tx, reason.to_string());
                return Err(reason);
            }
        };
        for victim in victims {
            if let Err(err) = self.backend.unload(&victim).await {
                tracing::warn!(model = %victim, %err, "eviction unload failed");
            }
        }

        match self.backend.load(name).await {
            Ok(resident_bytes) => {
                let mut entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.get_mut(name) {
                    entry.status = EntryStatus::Loaded;
                    entry.last_used = Instant::now();
                    if resident_bytes > 0 {
                        entry.declared_memory_bytes = resident_bytes;
                    }
                }
                let _ = tx.send(Some(Ok(())));
                Ok(())
            }
            Err(err) => {
                self.fail(name, &tx, err.to_string());
                Err(err)
            }
        }
    }

    fn fail(&self, name: &ModelName, tx: &watch::Sender<Option<LoadOutcome>>, reason: String) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(name) {
            entry.status = EntryStatus::NotLoaded(Some(reason.clone()));
        }
        let _ = tx.send(Some(Err(reason)));
    }

    /// Evicts least-recently-used zero-refcount loaded models until
    /// `requesting` would fit, returning the names to unload on the
    /// backend. Never touches a model with a nonzero refcount (an
    /// in-flight request keeps it pinned).
    fn reserve_capacity(&self, requesting: &ModelName, memory_bytes: u64) -> Result<Vec<ModelName>, ControlPlaneError> {
        let mut entries = self.entries.lock().unwrap();
        let used = |entries: &BTreeMap<ModelName, Entry>| -> u64 {
            entries
                .iter()
                .filter(|(n, e)| *n != requesting && matches!(e.status, EntryStatus::Loaded))
                .map(|(_, e)| e.declared_memory_bytes)
                .sum()
        };

        if used(&entries) + memory_bytes <= self.capacity_bytes {
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(ModelName, Instant)> = entries
            .iter()
            .filter(|(n, e)| *n != requesting && matches!(e.status, EntryStatus::Loaded) && e.refcount == 0)
            .map(|(n, e)| (n.clone(), e.last_used))
            .collect();
        candidates.sort_by_key(|(_, last_used)| *last_used);

        let mut evicted = Vec::new();
        for (victim, _) in candidates {
            if used(&entries) + memory_bytes <= self.capacity_bytes {
                break;
            }
            if let Some(entry) = entries.get_mut(&victim) {
                entry.status = EntryStatus::NotLoaded(Some("evicted".to_string()));
                evicted.push(victim);
            }
        }

        if used(&entries) + memory_bytes <= self.capacity_bytes {
            Ok(evicted)
        } else {
            Err(ControlPlaneError::ResourceExhausted(format!(
                "insufficient memory for {requesting} even after evicting {} model(s)",
                evicted.len()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AlwaysFailingBackend, NullBackend};

    #[tokio::test]
    async fn ensure_load_model_succeeds_for_declared_model() {
        let manager = LocalStateManager::new(1000, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("m1"), 400);
        manager.ensure_load_model(&ModelName::from("m1")).await.unwrap();
        assert!(manager.is_loaded(&ModelName::from("m1")));
    }

    #[tokio::test]
    async fn undeclared_model_is_not_found() {
        let manager = LocalStateManager::new(1000, Arc::new(NullBackend));
        let err = manager.ensure_load_model(&ModelName::from("missing")).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::NotFound(_)));
    }

    #[tokio::test]
    async fn second_ensure_on_loaded_model_is_a_cheap_no_op() {
        let manager = LocalStateManager::new(1000, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("m1"), 400);
        manager.ensure_load_model(&ModelName::from("m1")).await.unwrap();
        manager.ensure_load_model(&ModelName::from("m1")).await.unwrap();
        assert!(manager.is_loaded(&ModelName::from("m1")));
    }

    #[tokio::test]
    async fn load_failure_propagates_as_not_found() {
        let manager = LocalStateManager::new(1000, Arc::new(AlwaysFailingBackend));
        manager.declare_model(ModelName::from("m1"), 400);
        let err = manager.ensure_load_model(&ModelName::from("m1")).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::NotFound(_)));
    }

    #[tokio::test]
    async fn eviction_makes_room_for_a_new_model() {
        let manager = LocalStateManager::new(500, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("old"), 400);
        manager.ensure_load_model(&ModelName::from("old")).await.unwrap();
        manager.declare_model(ModelName::from("new"), 400);
        manager.ensure_load_model(&ModelName::from("new")).await.unwrap();
        assert!(manager.is_loaded(&ModelName::from("new")));
        assert!(!manager.is_loaded(&ModelName::from("old")));
    }

    #[tokio::test]
    async fn pinned_model_is_never_evicted() {
        let manager = LocalStateManager::new(500, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("old"), 400);
        manager.ensure_load_model(&ModelName::from("old")).await.unwrap();
        manager.begin_request(&ModelName::from("old"));

        manager.declare_model(ModelName::from("new"), 400);
        let err = manager.ensure_load_model(&ModelName::from("new")).await.unwrap_err();
        assert!(matches!(err, ControlPlaneError::ResourceExhausted(_)));
        assert!(manager.is_loaded(&ModelName::from("old")));
    }

    #[tokio::test]
    async fn load_model_forces_a_fresh_load_even_if_already_loaded() {
        let manager = LocalStateManager::new(1000, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("m1"), 400);
        manager.ensure_load_model(&ModelName::from("m1")).await.unwrap();
        manager.load_model(&ModelName::from("m1")).await.unwrap();
        assert!(manager.is_loaded(&ModelName::from("m1")));
    }

    #[tokio::test]
    async fn unload_model_clears_loaded_status() {
        let manager = LocalStateManager::new(1000, Arc::new(NullBackend));
        manager.declare_model(ModelName::from("m1"), 400);
        manager.ensure_load_model(&ModelName::from("m1")).await.unwrap();
        manager.unload_model(&ModelName::from("m1")).await.unwrap();
        assert!(!manager.is_loaded(&ModelName::from("m1")));
    }

    #[tokio::test]
    async fn concurrent_ensure_calls_share_one_in_flight_load() {
        let manager = Arc::new(LocalStateManager::new(1000, Arc::new(NullBackend)));
        manager.declare_model(ModelName::from("m1"), 400);
        let a = manager.clone();
        let b = manager.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.ensure_load_model(&ModelName::from("m1")).await }),
            tokio::spawn(async move { b.ensure_load_model(&ModelName::from("m1")).await }),
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();
        assert!(manager.is_loaded(&ModelName::from("m1")));
    }
}
