//! Pure core of `PipelineStore`: named pipelines with versioned lifecycle
//! states.

use std::collections::BTreeMap;

use modelplane_types::{Pipeline, PipelineEventMsg, PipelineName, PipelineState, PipelineVersion};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("pipeline {0} not found")]
    NotFound(PipelineName),
    #[error("illegal pipeline transition for {name}: {from:?} -> {to:?}")]
    IllegalTransition { name: PipelineName, from: PipelineState, to: PipelineState },
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub pipelines: BTreeMap<PipelineName, Pipeline>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    /// `PipelineCreate`: creates or advances a pipeline to a new version.
    Create { name: PipelineName },
    /// A transition reported by the chainer/dataflow runtime.
    Transition { name: PipelineName, version: u64, next: PipelineState },
    /// `PipelineTerminate`.
    Terminate { name: PipelineName },
    /// Replays a persisted version at startup without re-running the
    /// transition table (the record is already known-good), so subscribers
    /// can reconcile from a synthetic event.
    ReplayPersisted { name: PipelineName, version: PipelineVersion },
}

fn event(name: &PipelineName, version: &PipelineVersion) -> PipelineEventMsg {
    PipelineEventMsg {
        source: "pipeline_store".into(),
        pipeline: name.clone(),
        version: version.version,
        state: version.state,
    }
}

pub fn apply(mut state: State, cmd: Command) -> Result<(State, Vec<PipelineEventMsg>), KernelError> {
    match cmd {
        Command::Create { name } => {
            let pipeline = state.pipelines.entry(name.clone()).or_insert_with(|| Pipeline::new(name.clone()));
            let version = pipeline.versions.len() as u64;
            pipeline.versions.push(PipelineVersion { version, state: PipelineState::PipelineCreate });
            let v = pipeline.latest().expect("just pushed");
            let ev = event(&name, v);
            advance_transition_locked(&mut state, &name, PipelineState::PipelineCreating)?;
            let v = state.pipelines[&name].latest().expect("exists");
            Ok((state, vec![ev, event(&name, v)]))
        }

        Command::Transition { name, version, next } => {
            let pipeline = state.pipelines.get_mut(&name).ok_or_else(|| KernelError::NotFound(name.clone()))?;
            let Some(v) = pipeline.versions.iter_mut().find(|v| v.version == version) else {
                return Err(KernelError::NotFound(name));
            };
            if !v.state.can_transition_to(next) {
                return Err(KernelError::IllegalTransition { name, from: v.state, to: next });
            }
            v.state = next;
            let ev = event(&name, v);
            Ok((state, vec![ev]))
        }

        Command::Terminate { name } => {
            let pipeline = state.pipelines.get_mut(&name).ok_or_else(|| KernelError::NotFound(name.clone()))?;
            let Some(v) = pipeline.latest_mut() else {
                return Err(KernelError::NotFound(name));
            };
            if !v.state.can_transition_to(PipelineState::PipelineTerminate) {
                return Err(KernelError::IllegalTransition { name, from: v.state, to: PipelineState::PipelineTerminate });
            }
            v.state = PipelineState::PipelineTerminate;
            let ev = event(&name, v);
            Ok((state, vec![ev]))
        }

        Command::ReplayPersisted { name, version } => {
            let pipeline = state.pipelines.entry(name.clone()).or_insert_with(|| Pipeline::new(name.clone()));
            pipeline.versions.push(version);
            let v = pipeline.latest().expect("just pushed");
            Ok((state, vec![event(&name, v)]))
        }
    }
}

fn advance_transition_locked(state: &mut State, name: &PipelineName, next: PipelineState) -> Result<(), KernelError> {
    let pipeline = state.pipelines.get_mut(name).ok_or_else(|| KernelError::NotFound(name.clone()))?;
    let Some(v) = pipeline.latest_mut() else {
        return Err(KernelError::NotFound(name.clone()));
    };
    if !v.state.can_transition_to(next) {
        return Err(KernelError::IllegalTransition { name: name.clone(), from: v.state, to: next });
    }
    v.state = next;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_moves_straight_to_creating_and_emits_both_events() {
        let state = State::new();
        let (state, events) = apply(state, Command::Create { name: PipelineName::from("p1") }).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(state.pipelines[&PipelineName::from("p1")].latest().unwrap().state, PipelineState::PipelineCreating);
    }

    #[test]
    fn ready_then_terminate_then_terminating_then_terminated() {
        let state = State::new();
        let (state, _) = apply(state, Command::Create { name: PipelineName::from("p1") }).unwrap();
        let (state, _) =
            apply(state, Command::Transition { name: PipelineName::from("p1"), version: 0, next: PipelineState::PipelineReady })
                .unwrap();
        let (state, _) = apply(state, Command::Terminate { name: PipelineName::from("p1") }).unwrap();
        let (state, _) = apply(
            state,
            Command::Transition { name: PipelineName::from("p1"), version: 0, next: PipelineState::PipelineTerminating },
        )
        .unwrap();
        let (state, _) = apply(
            state,
            Command::Transition { name: PipelineName::from("p1"), version: 0, next: PipelineState::PipelineTerminated },
        )
        .unwrap();
        assert_eq!(state.pipelines[&PipelineName::from("p1")].latest().unwrap().state, PipelineState::PipelineTerminated);
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let state = State::new();
        let (state, _) = apply(state, Command::Create { name: PipelineName::from("p1") }).unwrap();
        let err = apply(
            state,
            Command::Transition { name: PipelineName::from("p1"), version: 0, next: PipelineState::PipelineTerminated },
        )
        .unwrap_err();
        assert!(matches!(err, KernelError::IllegalTransition { .. }));
    }
}
