//! Pure core of `ModelStore`: servers, replicas, models and their per-replica
//! and aggregate state machines.

use std::collections::BTreeMap;

use modelplane_types::{
    DeploymentSpec, Model, ModelEventMsg, ModelName, ModelState, ModelVersion, Replica,
    ReplicaIndex, ReplicaRef, ReplicaState, ReplicaStatus, Server, ServerEventKind,
    ServerEventMsg, ServerName,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("model {0} not found")]
    ModelNotFound(ModelName),
    #[error("server {0} not found")]
    ServerNotFound(ServerName),
}

/// In-memory state of every known server and model. Builder-style
/// `with_*` methods consume `self`; finer-grained per-replica mutation
/// goes through `&mut self` helpers since a replica update touches a
/// deeply nested map entry rather than a single top-level key.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub servers: BTreeMap<ServerName, Server>,
    pub models: BTreeMap<ModelName, Model>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, server: Server) -> Self {
        self.servers.insert(server.name.clone(), server);
        self
    }

    pub fn get_model(&self, name: &ModelName) -> Option<&Model> {
        self.models.get(name)
    }

    pub fn get_server(&self, name: &ServerName) -> Option<&Server> {
        self.servers.get(name)
    }
}

/// Events produced by [`apply`], published by the owning `ModelStore` after
/// it releases its write lock.
#[derive(Debug, Clone)]
pub enum Event {
    Model(ModelEventMsg),
    Server(ServerEventMsg),
}

#[derive(Debug, Clone)]
pub enum Command {
    /// Agent subscription: creates or refreshes a server's replica set.
    RegisterServer { server: ServerName, replicas: Vec<Replica> },
    /// Agent stream dropped: mark every replica unavailable.
    DisconnectServer { server: ServerName },
    /// `UpdateModel(spec)`.
    UpdateModel { name: ModelName, spec: DeploymentSpec },
    /// `UnloadModel(name)`.
    UnloadModel { name: ModelName },
    /// Scheduler's assignment, written back atomically once computed.
    AssignReplicas { name: ModelName, version: u64, server: ServerName, replicas: Vec<ReplicaIndex> },
    /// Scheduler could not place a model version.
    ScheduleFailed { name: ModelName, version: u64, reason: String },
    /// Authoritative per-replica update from agent feedback.
    UpdateModelState {
        name: ModelName,
        version: u64,
        replica: ReplicaRef,
        status: ReplicaStatus,
        reason: Option<String>,
        generation: u64,
    },
}

/// Applies one command to `state`, producing the new state and the events
/// to publish. No IO, no locks, no clocks.
pub fn apply(mut state: State, cmd: Command) -> Result<(State, Vec<Event>), KernelError> {
    match cmd {
        Command::RegisterServer { server, replicas } => {
            let kind = if state.servers.contains_key(&server) {
                ServerEventKind::CapabilitiesUpdated
            } else {
                ServerEventKind::Subscribed
            };
            state = state.with_server(Server::new(server.clone(), replicas));
            Ok((state, vec![Event::Server(ServerEventMsg { source: "model_store".into(), server, kind })]))
        }

        Command::DisconnectServer { server } => {
            let Some(s) = state.servers.get_mut(&server) else {
                return Err(KernelError::ServerNotFound(server));
            };
            s.mark_all_unavailable();
            let mut events = vec![Event::Server(ServerEventMsg {
                source: "model_store".into(),
                server: server.clone(),
                kind: ServerEventKind::Disconnected,
            })];

            // Trigger reschedule for every ModelVersion that had assignments
            // on this server: drive that off the aggregate transition, not a
            // separate side channel — flip every assigned replica on this
            // server to Unavailable and recompute.
            for model in state.models.values_mut() {
                let Some(v) = model.latest_mut() else { continue };
                let mut touched = false;
                for (reference, rstate) in &mut v.assigned_replicas {
                    if reference.server == server && rstate.status != ReplicaStatus::Unavailable {
                        rstate.status = ReplicaStatus::Unavailable;
                        rstate.reason = Some("agent disconnected".to_string());
                        touched = true;
                    }
                }
                if touched {
                    let previous_state = v.state;
                    v.recompute_state();
                    if v.state != previous_state {
                        events.push(model_event(&model.name, v));
                    }
                }
            }

            Ok((state, events))
        }

        Command::UpdateModel { name, spec } => {
            let model = state.models.entry(name.clone()).or_insert_with(|| Model::new(name.clone()));
            if let Some(latest) = model.latest() {
                if latest.spec_unchanged(&spec) {
                    return Ok((state, vec![]));
                }
            }
            let next_version = model.versions.len() as u64;
            let generation = model.latest().map_or(0, |v| v.generation + 1);
            let mut version = ModelVersion::new(next_version, spec, generation);
            version.state = ModelState::ModelProgressing;
            model.versions.push(version);
            let event = model_event(&name, model.latest().expect("just pushed"));
            Ok((state, vec![event]))
        }

        Command::UnloadModel { name } => {
            let model = state.models.get_mut(&name).ok_or_else(|| KernelError::ModelNotFound(name.clone()))?;
            let Some(version) = model.latest_mut() else {
                return Err(KernelError::ModelNotFound(name));
            };
            version.state = ModelState::ModelTerminating;
            let event = model_event(&name, version);
            Ok((state, vec![event]))
        }

        Command::AssignReplicas { name, version, server, replicas } => {
            let server_state = state.servers.get(&server).ok_or_else(|| KernelError::ServerNotFound(server.clone()))?.clone();
            let model = state.models.get_mut(&name).ok_or_else(|| KernelError::ModelNotFound(name.clone()))?;
            let Some(v) = model.versions.iter_mut().find(|v| v.version == version) else {
                return Err(KernelError::ModelNotFound(name));
            };
            // A fresh scheduler decision always supersedes whatever this
            // version was previously assigned to (e.g. rescheduled off a
            // disconnected server): drop the stale assignment map first so
            // it doesn't linger alongside the new one.
            v.assigned_replicas.clear();
            v.assigned_server = Some(server.clone());
            v.generation += 1;
            for idx in &replicas {
                let reference = ReplicaRef::new(server.clone(), *idx);
                v.assigned_replicas.insert(reference, ReplicaState::new(ReplicaStatus::LoadRequested));
            }
            let memory = v.spec.memory_bytes;
            if let Some(server_mut) = state.servers.get_mut(&server) {
                for idx in &replicas {
                    if let Some(replica) = server_mut.replica_mut(*idx) {
                        replica.reserve(memory);
                    }
                }
            }
            let _ = server_state;
            let model = state.models.get_mut(&name).expect("checked above");
            let v = model.versions.iter_mut().find(|v| v.version == version).expect("checked above");
            v.recompute_state();
            let event = model_event(&name, v);
            Ok((state, vec![event]))
        }

        Command::ScheduleFailed { name, version, reason } => {
            let model = state.models.get_mut(&name).ok_or_else(|| KernelError::ModelNotFound(name.clone()))?;
            let Some(v) = model.versions.iter_mut().find(|v| v.version == version) else {
                return Err(KernelError::ModelNotFound(name));
            };
            v.schedule_failure_reason = Some(reason);
            v.state = ModelState::ScheduleFailed;
            let event = model_event(&name, v);
            Ok((state, vec![event]))
        }

        Command::UpdateModelState { name, version, replica, status, reason, generation } => {
            let model = state.models.get_mut(&name).ok_or_else(|| KernelError::ModelNotFound(name.clone()))?;
            let Some(v) = model.versions.iter_mut().find(|v| v.version == version) else {
                return Err(KernelError::ModelNotFound(name));
            };

            if generation < v.generation {
                tracing::warn!(%name, version, generation, current_generation = v.generation, "stale agent acknowledgement, ignored");
                return Ok((state, vec![]));
            }

            let Some(current) = v.assigned_replicas.get(&replica) else {
                tracing::warn!(%name, version, %replica, "state update for unassigned replica, ignored");
                return Ok((state, vec![]));
            };

            if !current.status.can_transition_to(status) {
                tracing::warn!(%name, version, %replica, from = ?current.status, to = ?status, "illegal replica transition, ignored");
                return Ok((state, vec![]));
            }

            let previous_status = current.status;
            v.assigned_replicas.insert(replica.clone(), ReplicaState { status, reason });

            apply_memory_accounting(&mut state, &replica, &name, previous_status, status, version);

            let model = state.models.get_mut(&name).expect("checked above");
            let v = model.versions.iter_mut().find(|v| v.version == version).expect("checked above");
            let previous_state = v.state;
            v.recompute_state();
            if v.state == previous_state {
                return Ok((state, vec![]));
            }
            let event = model_event(&name, v);
            Ok((state, vec![event]))
        }
    }
}

fn apply_memory_accounting(
    state: &mut State,
    replica: &ReplicaRef,
    name: &ModelName,
    previous: ReplicaStatus,
    next: ReplicaStatus,
    version: u64,
) {
    let Some(model) = state.models.get(name) else { return };
    let Some(v) = model.versions.iter().find(|v| v.version == version) else { return };
    let memory_bytes = v.spec.memory_bytes;
    let Some(server) = state.servers.get_mut(&replica.server) else { return };
    let Some(r) = server.replica_mut(replica.replica) else { return };

    match (previous, next) {
        (_, ReplicaStatus::Loaded) | (_, ReplicaStatus::Available) => {
            r.commit_reservation(name.clone(), memory_bytes);
        }
        (_, ReplicaStatus::Unloaded) => {
            r.release(name, memory_bytes);
        }
        _ => {}
    }
}

fn model_event(name: &ModelName, version: &ModelVersion) -> Event {
    Event::Model(ModelEventMsg {
        source: "model_store".into(),
        model: name.clone(),
        version: version.version,
        state: version.state,
    })
}
