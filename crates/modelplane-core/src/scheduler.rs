//! `SimpleScheduler`: a pure function over `ModelStore` snapshots plus
//! explicit policy. No IO, no locks: callers (the `Rescheduler`) take their
//! snapshots from `ModelStore`, call [`schedule`], then write the result
//! back atomically.

use modelplane_types::{DeploymentSpec, ModelName, Replica, ReplicaIndex, Server, ServerName};

/// Either a placement, or a failure carrying a reason enumerating every
/// rejected server's cause (capability, memory, availability).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Assigned { server: ServerName, replicas: Vec<ReplicaIndex> },
    Failed { reason: String },
}

/// Selects a server and a set of replicas for `model`'s `spec`.
///
/// Deterministic: identical `(servers, model, spec)` yield identical
/// outcomes. Servers are filtered to those with at least `desired_replicas`
/// replicas satisfying capability/memory/availability, scored by `(replicas
/// already holding an older version of this model, free replica count)`
/// descending, ties broken by server name ascending (chosen for
/// determinism; no other ordering was specified). Within the chosen
/// server, replicas are picked preferring ones already holding an older
/// version of this model, then by descending available memory, ties
/// broken by replica index ascending.
pub fn schedule(servers: &[Server], model: &ModelName, spec: &DeploymentSpec) -> ScheduleOutcome {
    let mut rejections = Vec::new();
    let mut candidates: Vec<(&Server, usize, usize)> = Vec::new();

    for server in servers {
        let eligible = eligible_replicas(server, spec);
        if eligible.len() as u32 >= spec.desired_replicas {
            let holds_older_version = eligible.iter().filter(|r| r.loaded_models.contains(model)).count();
            let free_replicas = eligible.iter().filter(|r| r.loaded_models.is_empty()).count();
            candidates.push((server, holds_older_version, free_replicas));
        } else {
            rejections.push(rejection_reason(server, spec, eligible.len()));
        }
    }

    candidates.sort_by(|(server_a, older_a, free_a), (server_b, older_b, free_b)| {
        older_b.cmp(older_a).then(free_b.cmp(free_a)).then(server_a.name.cmp(&server_b.name))
    });

    let Some((server, ..)) = candidates.into_iter().next() else {
        let reason = if rejections.is_empty() {
            "insufficient memory on all servers: no servers registered".to_string()
        } else {
            format!("insufficient memory on all servers: {}", rejections.join("; "))
        };
        return ScheduleOutcome::Failed { reason };
    };

    let mut eligible = eligible_replicas(server, spec);
    eligible.sort_by(|a, b| {
        let a_holds_older = a.loaded_models.contains(model);
        let b_holds_older = b.loaded_models.contains(model);
        b_holds_older
            .cmp(&a_holds_older)
            .then(b.available_memory_bytes.cmp(&a.available_memory_bytes))
            .then(a.index.cmp(&b.index))
    });

    let chosen = eligible.into_iter().take(spec.desired_replicas as usize).map(|r| r.index).collect();
    ScheduleOutcome::Assigned { server: server.name.clone(), replicas: chosen }
}

fn eligible_replicas<'a>(server: &'a Server, spec: &DeploymentSpec) -> Vec<&'a Replica> {
    server
        .replicas
        .iter()
        .filter(|r| r.available && r.has_capabilities(&spec.required_capabilities) && r.has_capacity(spec.memory_bytes))
        .collect()
}

fn rejection_reason(server: &Server, spec: &DeploymentSpec, eligible_count: usize) -> String {
    let unavailable = server.replicas.iter().filter(|r| !r.available).count();
    let missing_capability =
        server.replicas.iter().filter(|r| r.available && !r.has_capabilities(&spec.required_capabilities)).count();
    let insufficient_memory = server
        .replicas
        .iter()
        .filter(|r| r.available && r.has_capabilities(&spec.required_capabilities) && !r.has_capacity(spec.memory_bytes))
        .count();
    format!(
        "{}: {eligible_count} of {} required replicas eligible (unavailable={unavailable}, missing_capability={missing_capability}, insufficient_memory={insufficient_memory})",
        server.name, spec.desired_replicas
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn spec(memory_bytes: u64, desired_replicas: u32) -> DeploymentSpec {
        DeploymentSpec {
            memory_bytes,
            required_capabilities: BTreeSet::new(),
            desired_replicas,
            min_replicas: desired_replicas,
            max_replicas: desired_replicas,
        }
    }

    fn server_with_replicas(name: &str, memories: &[u64]) -> Server {
        let replicas = memories
            .iter()
            .enumerate()
            .map(|(i, m)| Replica::new(ReplicaIndex(i as u32), *m, BTreeSet::new()))
            .collect();
        Server::new(ServerName::from(name), replicas)
    }

    #[test]
    fn schedule_success_picks_enough_replicas() {
        let server = server_with_replicas("s1", &[1000, 1000]);
        let outcome = schedule(&[server], &ModelName::from("m1"), &spec(400, 2));
        assert_eq!(
            outcome,
            ScheduleOutcome::Assigned {
                server: ServerName::from("s1"),
                replicas: vec![ReplicaIndex(0), ReplicaIndex(1)]
            }
        );
    }

    #[test]
    fn schedule_failure_reports_insufficient_memory() {
        let server = server_with_replicas("s1", &[1000, 1000]);
        let outcome = schedule(&[server], &ModelName::from("m1"), &spec(1500, 1));
        match outcome {
            ScheduleOutcome::Failed { reason } => assert!(reason.contains("insufficient memory on all servers")),
            ScheduleOutcome::Assigned { .. } => panic!("expected failure"),
        }
    }

    #[test]
    fn scheduler_is_deterministic_across_repeated_calls() {
        let servers = vec![server_with_replicas("s2", &[1000, 1000]), server_with_replicas("s1", &[1000, 1000])];
        let spec = spec(400, 2);
        let first = schedule(&servers, &ModelName::from("m1"), &spec);
        let second = schedule(&servers, &ModelName::from("m1"), &spec);
        assert_eq!(first, second);
        // Tie-broken by server name ascending: "s1" beats "s2".
        assert_eq!(first, ScheduleOutcome::Assigned { server: ServerName::from("s1"), replicas: vec![ReplicaIndex(0), ReplicaIndex(1)] });
    }

    #[test]
    fn prefers_server_already_holding_an_older_version() {
        let mut warm = server_with_replicas("s1", &[1000, 1000]);
        warm.replicas[0].loaded_models.insert(ModelName::from("m1"));
        let cold = server_with_replicas("s2", &[1000, 1000]);
        let outcome = schedule(&[cold, warm], &ModelName::from("m1"), &spec(400, 1));
        assert_eq!(outcome, ScheduleOutcome::Assigned { server: ServerName::from("s1"), replicas: vec![ReplicaIndex(0)] });
    }

    #[test]
    fn rejects_servers_missing_required_capability() {
        let mut server = server_with_replicas("s1", &[1000]);
        server.replicas[0].capabilities.insert("gpu".to_string());
        let mut spec = spec(400, 1);
        spec.required_capabilities.insert("tpu".to_string());
        let outcome = schedule(&[server], &ModelName::from("m1"), &spec);
        match outcome {
            ScheduleOutcome::Failed { reason } => assert!(reason.contains("missing_capability=1")),
            ScheduleOutcome::Assigned { .. } => panic!("expected failure"),
        }
    }
}
