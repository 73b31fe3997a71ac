//! Named pipelines with versioned states, optionally persisted under
//! `dbPath`.

use std::sync::Arc;

use modelplane_eventhub::EventHub;
use modelplane_persist::Namespace;
use modelplane_types::{ControlPlaneError, ControlPlaneResult, Pipeline, PipelineName, PipelineState, PipelineVersion};
use tokio::sync::RwLock;

use crate::kernel::pipeline::{self, Command};

const SCHEMA_VERSION: u16 = 1;

pub struct PipelineStore {
    state: RwLock<pipeline::State>,
    hub: Arc<EventHub>,
    namespace: Option<Namespace>,
}

impl PipelineStore {
    pub fn new(hub: Arc<EventHub>) -> Arc<Self> {
        Arc::new(Self { state: RwLock::new(pipeline::State::new()), hub, namespace: None })
    }

    /// Reloads every persisted pipeline and replays it to its last recorded
    /// state, publishing a synthetic event per pipeline so subscribers can
    /// reconcile, then keeps writing through on every subsequent mutation.
    pub async fn with_persistence(hub: Arc<EventHub>, namespace: Namespace) -> ControlPlaneResult<Arc<Self>> {
        let mut state = pipeline::State::new();
        let mut events = Vec::new();
        for record in namespace.iter::<Pipeline>(SCHEMA_VERSION) {
            let (_, stored) = record.map_err(|e| ControlPlaneError::Fatal(e.to_string()))?;
            for version in stored.versions {
                let (new_state, new_events) =
                    pipeline::apply(state, Command::ReplayPersisted { name: stored.name.clone(), version })
                        .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
                state = new_state;
                events.extend(new_events);
            }
        }
        let store = Arc::new(Self { state: RwLock::new(state), hub, namespace: Some(namespace) });
        for event in events {
            store.hub.publish_pipeline_event(event).await;
        }
        Ok(store)
    }

    async fn apply(&self, cmd: Command) -> ControlPlaneResult<()> {
        let mut guard = self.state.write().await;
        let state = std::mem::take(&mut *guard);
        let name = command_pipeline_name(&cmd);
        let (new_state, events) = pipeline::apply(state, cmd).map_err(|e| ControlPlaneError::NotFound(e.to_string()))?;
        if let Some(namespace) = &self.namespace {
            if let Some(pipeline) = new_state.pipelines.get(&name) {
                namespace
                    .put(name.as_str(), SCHEMA_VERSION, pipeline)
                    .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
            }
        }
        *guard = new_state;
        drop(guard);
        for event in events {
            self.hub.publish_pipeline_event(event).await;
        }
        Ok(())
    }

    pub async fn create_pipeline(&self, name: PipelineName) -> ControlPlaneResult<()> {
        self.apply(Command::Create { name }).await
    }

    pub async fn report_transition(&self, name: PipelineName, version: u64, next: PipelineState) -> ControlPlaneResult<()> {
        self.apply(Command::Transition { name, version, next }).await
    }

    pub async fn terminate_pipeline(&self, name: PipelineName) -> ControlPlaneResult<()> {
        self.apply(Command::Terminate { name }).await
    }

    pub async fn get_pipeline(&self, name: &PipelineName) -> Option<Pipeline> {
        self.state.read().await.pipelines.get(name).cloned()
    }

    pub async fn pipelines(&self) -> Vec<Pipeline> {
        self.state.read().await.pipelines.values().cloned().collect()
    }
}

fn command_pipeline_name(cmd: &Command) -> PipelineName {
    match cmd {
        Command::Create { name } | Command::Transition { name, .. } | Command::Terminate { name } => name.clone(),
        Command::ReplayPersisted { name, .. } => name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pipeline_emits_creating_event() {
        let hub = EventHub::new();
        let store = PipelineStore::new(hub);
        store.create_pipeline(PipelineName::from("p1")).await.unwrap();
        let p = store.get_pipeline(&PipelineName::from("p1")).await.unwrap();
        assert_eq!(p.latest().unwrap().state, PipelineState::PipelineCreating);
    }

    #[tokio::test]
    async fn persisted_pipeline_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let db = modelplane_persist::Db::open(dir.path()).unwrap();

        let hub = EventHub::new();
        let ns = db.namespace("pipeline").unwrap();
        let store = PipelineStore::with_persistence(hub.clone(), ns).await.unwrap();
        store.create_pipeline(PipelineName::from("p1")).await.unwrap();
        store
            .report_transition(PipelineName::from("p1"), 0, PipelineState::PipelineReady)
            .await
            .unwrap();
        drop(store);

        let hub2 = EventHub::new();
        let ns2 = db.namespace("pipeline").unwrap();
        let reloaded = PipelineStore::with_persistence(hub2, ns2).await.unwrap();
        let p = reloaded.get_pipeline(&PipelineName::from("p1")).await.unwrap();
        assert_eq!(p.latest().unwrap().state, PipelineState::PipelineReady);
    }
}
