//! Experiments referencing models or pipelines; baseline and candidate
//! readiness.

use std::sync::Arc;

use modelplane_eventhub::EventHub;
use modelplane_persist::Namespace;
use modelplane_types::{ControlPlaneError, ControlPlaneResult, Experiment, ExperimentName, ModelState, ResourceType};
use tokio::sync::RwLock;

use crate::kernel::experiment::{self, Command, ReadinessSnapshot};
use crate::model_store::ModelStore;
use crate::pipeline_store::PipelineStore;

const SCHEMA_VERSION: u16 = 1;

/// A plain-data readiness snapshot: every resource name this experiment set
/// references, with its current readiness bit, captured under the other
/// store's read lock and released before the kernel runs.
struct PrecomputedSnapshot {
    ready: std::collections::BTreeSet<String>,
}

impl ReadinessSnapshot for PrecomputedSnapshot {
    fn is_ready(&self, _resource_type: ResourceType, name: &str) -> bool {
        self.ready.contains(name)
    }
}

pub struct ExperimentStore {
    state: RwLock<experiment::State>,
    hub: Arc<EventHub>,
    models: Arc<ModelStore>,
    pipelines: Arc<PipelineStore>,
    namespace: Option<Namespace>,
}

impl ExperimentStore {
    pub fn new(hub: Arc<EventHub>, models: Arc<ModelStore>, pipelines: Arc<PipelineStore>) -> Arc<Self> {
        Arc::new(Self { state: RwLock::new(experiment::State::new()), hub, models, pipelines, namespace: None })
    }

    /// Reloads every persisted experiment under `namespace`, replaying each
    /// through `StartExperiment` against a snapshot taken from the already-
    /// populated `models`/`pipelines` stores, then keeps writing through on
    /// every subsequent mutation — mirrors `PipelineStore::with_persistence`.
    pub async fn with_persistence(
        hub: Arc<EventHub>,
        models: Arc<ModelStore>,
        pipelines: Arc<PipelineStore>,
        namespace: Namespace,
    ) -> ControlPlaneResult<Arc<Self>> {
        let store = Arc::new(Self {
            state: RwLock::new(experiment::State::new()),
            hub,
            models,
            pipelines,
            namespace: Some(namespace),
        });
        let persisted: Vec<Experiment> = {
            let ns = store.namespace.as_ref().expect("just set above");
            ns.iter::<Experiment>(SCHEMA_VERSION)
                .map(|record| record.map(|(_, experiment)| experiment))
                .collect::<Result<_, _>>()
                .map_err(|e| ControlPlaneError::Fatal(e.to_string()))?
        };
        for experiment in persisted {
            store.start_experiment(experiment).await?;
        }
        Ok(store)
    }

    /// Collects the readiness of every name an experiment (or a named
    /// resource's existing referrers) could ask about, taking only the
    /// other store's read lock for the duration of each lookup.
    async fn snapshot_for(&self, resource_type: ResourceType, names: &[String]) -> PrecomputedSnapshot {
        let mut ready = std::collections::BTreeSet::new();
        for name in names {
            let is_ready = match resource_type {
                ResourceType::Model => {
                    let model_name = modelplane_types::ModelName::from(name.as_str());
                    self.models.get_model(&model_name).await.is_some_and(|m| {
                        m.latest().is_some_and(|v| v.state == ModelState::ModelAvailable)
                    })
                }
                ResourceType::Pipeline => {
                    let pipeline_name = modelplane_types::PipelineName::from(name.as_str());
                    self.pipelines.get_pipeline(&pipeline_name).await.is_some_and(|p| p.is_ready())
                }
            };
            if is_ready {
                ready.insert(name.clone());
            }
        }
        PrecomputedSnapshot { ready }
    }

    async fn apply(&self, cmd: Command, names: Vec<(ResourceType, String)>) -> ControlPlaneResult<()> {
        let mut by_type: std::collections::BTreeMap<ResourceType, Vec<String>> = std::collections::BTreeMap::new();
        for (t, n) in names {
            by_type.entry(t).or_default().push(n);
        }

        // The kernel is called once per distinct resource type present in
        // this command's candidate/mirror set, each time with a freshly
        // captured, already-released snapshot for just that type.
        let model_names = by_type.remove(&ResourceType::Model).unwrap_or_default();
        let pipeline_names = by_type.remove(&ResourceType::Pipeline).unwrap_or_default();
        let model_snapshot = self.snapshot_for(ResourceType::Model, &model_names).await;
        let pipeline_snapshot = self.snapshot_for(ResourceType::Pipeline, &pipeline_names).await;
        let mut merged = model_snapshot.ready;
        merged.extend(pipeline_snapshot.ready);
        let snapshot = PrecomputedSnapshot { ready: merged };

        let is_stop = matches!(cmd, Command::StopExperiment { .. });

        let mut guard = self.state.write().await;
        let state = std::mem::take(&mut *guard);
        let (new_state, events) =
            experiment::apply(state, cmd, &snapshot).map_err(|e| ControlPlaneError::NotFound(e.to_string()))?;
        if let Some(namespace) = &self.namespace {
            // Every event names the experiment it was emitted for; that set
            // is exactly the experiments StartExperiment/StopExperiment/
            // RecomputeReadiness touched this call, whether one (the common
            // case) or several (RecomputeReadiness fanning out to every
            // referencing experiment).
            for touched in events.iter().map(|e| &e.experiment) {
                if is_stop {
                    namespace.remove(touched.as_str()).map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
                } else if let Some(experiment) = new_state.experiments.get(touched) {
                    namespace
                        .put(touched.as_str(), SCHEMA_VERSION, experiment)
                        .map_err(|e| ControlPlaneError::Internal(e.to_string()))?;
                }
            }
        }
        *guard = new_state;
        drop(guard);
        for event in events {
            self.hub.publish_experiment_event(event).await;
        }
        Ok(())
    }

    pub async fn start_experiment(&self, experiment: Experiment) -> ControlPlaneResult<()> {
        let resource_type = experiment.resource_type;
        let mut names: Vec<(ResourceType, String)> =
            experiment.candidates.iter().map(|c| (resource_type, c.name.clone())).collect();
        if let Some(mirror) = &experiment.mirror {
            names.push((resource_type, mirror.name.clone()));
        }
        self.apply(Command::StartExperiment { experiment }, names).await
    }

    pub async fn stop_experiment(&self, name: ExperimentName) -> ControlPlaneResult<()> {
        self.apply(Command::StopExperiment { name }, vec![]).await
    }

    /// Called by the reschedule loop whenever a model or pipeline
    /// transitions, so referencing experiments recompute readiness.
    pub async fn recompute_readiness(&self, resource_type: ResourceType, resource: String) -> ControlPlaneResult<()> {
        let names = vec![(resource_type, resource.clone())];
        self.apply(Command::RecomputeReadiness { resource_type, resource }, names).await
    }

    pub async fn get_experiment(&self, name: &ExperimentName) -> Option<Experiment> {
        self.state.read().await.experiments.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelplane_types::Candidate;

    fn experiment(name: &str, candidates: Vec<&str>) -> Experiment {
        Experiment {
            name: ExperimentName::from(name),
            resource_type: ResourceType::Model,
            default: None,
            candidates: candidates.into_iter().map(|c| Candidate::new(c, 50)).collect(),
            mirror: None,
        }
    }

    #[tokio::test]
    async fn persisted_experiment_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let db = modelplane_persist::Db::open(dir.path()).unwrap();

        let hub = EventHub::new();
        let models = ModelStore::new(hub.clone());
        let pipelines = PipelineStore::new(hub.clone());
        let ns = db.namespace("experiment").unwrap();
        let store = ExperimentStore::with_persistence(hub, models.clone(), pipelines.clone(), ns).await.unwrap();
        store.start_experiment(experiment("e1", vec!["m1"])).await.unwrap();
        drop(store);

        let hub2 = EventHub::new();
        let models2 = ModelStore::new(hub2.clone());
        let pipelines2 = PipelineStore::new(hub2.clone());
        let ns2 = db.namespace("experiment").unwrap();
        let reloaded = ExperimentStore::with_persistence(hub2, models2, pipelines2, ns2).await.unwrap();
        let e = reloaded.get_experiment(&ExperimentName::from("e1")).await.unwrap();
        assert_eq!(e.candidates[0].name, "m1");
    }

    #[tokio::test]
    async fn stopping_an_experiment_removes_its_persisted_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = modelplane_persist::Db::open(dir.path()).unwrap();

        let hub = EventHub::new();
        let models = ModelStore::new(hub.clone());
        let pipelines = PipelineStore::new(hub.clone());
        let ns = db.namespace("experiment").unwrap();
        let store = ExperimentStore::with_persistence(hub, models, pipelines, ns).await.unwrap();
        store.start_experiment(experiment("e1", vec!["m1"])).await.unwrap();
        store.stop_experiment(ExperimentName::from("e1")).await.unwrap();
        drop(store);

        let hub2 = EventHub::new();
        let models2 = ModelStore::new(hub2.clone());
        let pipelines2 = PipelineStore::new(hub2.clone());
        let ns2 = db.namespace("experiment").unwrap();
        let reloaded = ExperimentStore::with_persistence(hub2, models2, pipelines2, ns2).await.unwrap();
        assert!(reloaded.get_experiment(&ExperimentName::from("e1")).await.is_none());
    }
}
