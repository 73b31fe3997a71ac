//! Pure core of `ExperimentStore`: inverted-index reference bookkeeping and
//! readiness recompute, grounded directly on the original scheduler's
//! `addReference`/`removeReference`/`cleanExperimentState`/
//! `updateExperimentState`/`setCandidateAndMirrorReadiness`.

use std::collections::{BTreeMap, BTreeSet};

use modelplane_types::{Experiment, ExperimentEventKind, ExperimentEventMsg, ExperimentName, ResourceType};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("experiment {0} not found")]
    NotFound(ExperimentName),
}

/// Supplies per-resource readiness without the kernel ever holding a
/// handle back into `ModelStore`/`PipelineStore`: the owning
/// `ExperimentStore` takes the other store's read lock, builds this
/// snapshot, and releases the lock before calling `apply`.
pub trait ReadinessSnapshot {
    fn is_ready(&self, resource_type: ResourceType, name: &str) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub experiments: BTreeMap<ExperimentName, Experiment>,
    model_references: BTreeMap<String, BTreeSet<ExperimentName>>,
    pipeline_references: BTreeMap<String, BTreeSet<ExperimentName>>,
    model_baselines: BTreeMap<String, ExperimentName>,
    pipeline_baselines: BTreeMap<String, ExperimentName>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    fn references_mut(&mut self, resource_type: ResourceType) -> &mut BTreeMap<String, BTreeSet<ExperimentName>> {
        match resource_type {
            ResourceType::Model => &mut self.model_references,
            ResourceType::Pipeline => &mut self.pipeline_references,
        }
    }

    fn baselines_mut(&mut self, resource_type: ResourceType) -> &mut BTreeMap<String, ExperimentName> {
        match resource_type {
            ResourceType::Model => &mut self.model_baselines,
            ResourceType::Pipeline => &mut self.pipeline_baselines,
        }
    }

    fn add_reference(&mut self, resource_type: ResourceType, resource: &str, experiment: ExperimentName) {
        self.references_mut(resource_type).entry(resource.to_string()).or_default().insert(experiment);
    }

    fn remove_reference(&mut self, resource_type: ResourceType, resource: &str, experiment: &ExperimentName) {
        if let Some(set) = self.references_mut(resource_type).get_mut(resource) {
            set.remove(experiment);
        }
    }

    fn add_references(&mut self, experiment: &Experiment) {
        for candidate in &experiment.candidates {
            self.add_reference(experiment.resource_type, &candidate.name, experiment.name.clone());
        }
        if let Some(mirror) = &experiment.mirror {
            self.add_reference(experiment.resource_type, &mirror.name, experiment.name.clone());
        }
    }

    fn remove_references(&mut self, experiment: &Experiment) {
        for candidate in &experiment.candidates {
            self.remove_reference(experiment.resource_type, &candidate.name, &experiment.name);
        }
        if let Some(mirror) = &experiment.mirror {
            self.remove_reference(experiment.resource_type, &mirror.name, &experiment.name);
        }
    }

    /// Removes `name`'s prior reference entries and baseline registration
    /// (if it existed), returning the resource name whose default changed
    /// or was removed, so the caller can notify it.
    fn clean_experiment_state(&mut self, incoming: &Experiment) -> Option<String> {
        let Some(existing) = self.experiments.get(&incoming.name).cloned() else {
            return None;
        };

        let mut changed_resource = None;
        if let Some(existing_default) = &existing.default {
            self.baselines_mut(existing.resource_type).remove(existing_default);
            let default_changed_or_removed = match &incoming.default {
                Some(incoming_default) => incoming_default != existing_default,
                None => true,
            };
            if default_changed_or_removed {
                changed_resource = Some(existing_default.clone());
            }
        }
        self.remove_references(&existing);
        changed_resource
    }

    fn update_experiment_state(&mut self, experiment: &mut Experiment, snapshot: &dyn ReadinessSnapshot) {
        if let Some(default) = &experiment.default {
            self.baselines_mut(experiment.resource_type).insert(default.clone(), experiment.name.clone());
        }
        self.add_references(experiment);
        set_candidate_and_mirror_readiness(experiment, snapshot);
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    StartExperiment { experiment: Experiment },
    StopExperiment { name: ExperimentName },
    /// A referenced model or pipeline transitioned; recompute readiness for
    /// every experiment that references it.
    RecomputeReadiness { resource_type: ResourceType, resource: String },
}

fn set_candidate_and_mirror_readiness(experiment: &mut Experiment, snapshot: &dyn ReadinessSnapshot) {
    for candidate in &mut experiment.candidates {
        candidate.ready = snapshot.is_ready(experiment.resource_type, &candidate.name);
    }
    if let Some(mirror) = &mut experiment.mirror {
        mirror.ready = snapshot.is_ready(experiment.resource_type, &mirror.name);
    }
}

fn event(experiment: &Experiment, kind: ExperimentEventKind, previous_baseline: Option<String>) -> ExperimentEventMsg {
    ExperimentEventMsg {
        source: "experiment_store".into(),
        experiment: experiment.name.clone(),
        kind,
        previous_baseline,
    }
}

pub fn apply(
    mut state: State,
    cmd: Command,
    snapshot: &dyn ReadinessSnapshot,
) -> Result<(State, Vec<ExperimentEventMsg>), KernelError> {
    match cmd {
        Command::StartExperiment { experiment: mut incoming } => {
            let previous_baseline = state.clean_experiment_state(&incoming);
            let was_ready_before = state.experiments.get(&incoming.name).is_some_and(Experiment::is_ready);
            state.update_experiment_state(&mut incoming, snapshot);
            let is_ready_now = incoming.is_ready();
            state.experiments.insert(incoming.name.clone(), incoming.clone());

            let kind = if is_ready_now && !was_ready_before {
                ExperimentEventKind::BecameReady
            } else if !is_ready_now && was_ready_before {
                ExperimentEventKind::BecameNotReady
            } else {
                ExperimentEventKind::Updated
            };
            Ok((state, vec![event(&incoming, kind, previous_baseline)]))
        }

        Command::StopExperiment { name } => {
            let Some(experiment) = state.experiments.remove(&name) else {
                return Err(KernelError::NotFound(name));
            };
            state.remove_references(&experiment);
            if let Some(default) = &experiment.default {
                state.baselines_mut(experiment.resource_type).remove(default);
            }
            Ok((state, vec![event(&experiment, ExperimentEventKind::Terminated, None)]))
        }

        Command::RecomputeReadiness { resource_type, resource } => {
            let Some(referencing) = state.references_mut(resource_type).get(&resource).cloned() else {
                return Ok((state, vec![]));
            };
            let mut events = Vec::new();
            for name in referencing {
                let Some(mut experiment) = state.experiments.get(&name).cloned() else { continue };
                let was_ready = experiment.is_ready();
                set_candidate_and_mirror_readiness(&mut experiment, snapshot);
                let is_ready = experiment.is_ready();
                state.experiments.insert(name, experiment.clone());
                let kind = if is_ready && !was_ready {
                    ExperimentEventKind::BecameReady
                } else if !is_ready && was_ready {
                    ExperimentEventKind::BecameNotReady
                } else {
                    ExperimentEventKind::Updated
                };
                events.push(event(&experiment, kind, None));
            }
            Ok((state, events))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelplane_types::Candidate;

    struct AllReady;
    impl ReadinessSnapshot for AllReady {
        fn is_ready(&self, _resource_type: ResourceType, _name: &str) -> bool {
            true
        }
    }

    struct OnlyReady(Vec<String>);
    impl ReadinessSnapshot for OnlyReady {
        fn is_ready(&self, _resource_type: ResourceType, name: &str) -> bool {
            self.0.iter().any(|n| n == name)
        }
    }

    fn experiment(name: &str, candidates: Vec<&str>) -> Experiment {
        Experiment {
            name: ExperimentName::from(name),
            resource_type: ResourceType::Model,
            default: None,
            candidates: candidates.into_iter().map(|c| Candidate::new(c, 50)).collect(),
            mirror: None,
        }
    }

    #[test]
    fn start_experiment_with_all_candidates_ready_is_reported_ready() {
        let state = State::new();
        let (state, events) =
            apply(state, Command::StartExperiment { experiment: experiment("e1", vec!["m1", "m2"]) }, &AllReady).unwrap();
        assert_eq!(events.len(), 1);
        assert!(state.experiments[&ExperimentName::from("e1")].is_ready());
        assert_eq!(events[0].kind, ExperimentEventKind::BecameReady);
    }

    #[test]
    fn recompute_readiness_emits_became_ready_only_on_transition() {
        let state = State::new();
        let (state, _) = apply(
            state,
            Command::StartExperiment { experiment: experiment("e1", vec!["m1", "m2"]) },
            &OnlyReady(vec!["m1".into()]),
        )
        .unwrap();
        assert!(!state.experiments[&ExperimentName::from("e1")].is_ready());

        let (state, events) = apply(
            state,
            Command::RecomputeReadiness { resource_type: ResourceType::Model, resource: "m2".into() },
            &AllReady,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ExperimentEventKind::BecameReady);
        assert!(state.experiments[&ExperimentName::from("e1")].is_ready());
    }

    #[test]
    fn restarting_an_experiment_with_changed_baseline_reports_previous() {
        let mut first = experiment("e1", vec!["m1"]);
        first.default = Some("m_old".into());
        let state = State::new();
        let (state, _) = apply(state, Command::StartExperiment { experiment: first }, &AllReady).unwrap();

        let mut second = experiment("e1", vec!["m1"]);
        second.default = Some("m_new".into());
        let (_, events) = apply(state, Command::StartExperiment { experiment: second }, &AllReady).unwrap();
        assert_eq!(events[0].previous_baseline.as_deref(), Some("m_old"));
    }

    #[test]
    fn stop_experiment_clears_references() {
        let state = State::new();
        let (state, _) =
            apply(state, Command::StartExperiment { experiment: experiment("e1", vec!["m1"]) }, &AllReady).unwrap();
        let (state, events) = apply(state, Command::StopExperiment { name: ExperimentName::from("e1") }, &AllReady).unwrap();
        assert_eq!(events[0].kind, ExperimentEventKind::Terminated);
        assert!(state.experiments.is_empty());
        assert!(state.model_references.get("m1").is_none_or(BTreeSet::is_empty));
    }
}
