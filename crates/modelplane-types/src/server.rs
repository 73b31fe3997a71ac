//! Servers and replicas.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::{ModelName, ReplicaIndex, ServerName};

/// One slot on an inference server that can host one or more model versions,
/// subject to its memory budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    pub index: ReplicaIndex,
    pub available: bool,
    pub total_memory_bytes: u64,
    pub available_memory_bytes: u64,
    /// Memory set aside for models currently being loaded (LoadRequested..Loaded).
    pub reserved_memory_bytes: u64,
    pub loaded_models: BTreeSet<ModelName>,
    pub capabilities: BTreeSet<String>,
}

impl Replica {
    pub fn new(index: ReplicaIndex, total_memory_bytes: u64, capabilities: BTreeSet<String>) -> Self {
        Self {
            index,
            available: true,
            total_memory_bytes,
            available_memory_bytes: total_memory_bytes,
            reserved_memory_bytes: 0,
            loaded_models: BTreeSet::new(),
            capabilities,
        }
    }

    /// Invariant: loaded + reserved memory never exceeds total.
    pub fn memory_invariant_holds(&self) -> bool {
        let loaded_memory = self.total_memory_bytes.saturating_sub(self.available_memory_bytes);
        loaded_memory + self.reserved_memory_bytes <= self.total_memory_bytes
    }

    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn has_capacity(&self, memory_bytes: u64) -> bool {
        self.available_memory_bytes >= memory_bytes
    }

    /// Reserve memory for an in-flight load; moves from available to reserved.
    pub fn reserve(&mut self, memory_bytes: u64) {
        self.available_memory_bytes = self.available_memory_bytes.saturating_sub(memory_bytes);
        self.reserved_memory_bytes += memory_bytes;
    }

    /// Commit a reservation once the model reports Loaded.
    pub fn commit_reservation(&mut self, model: ModelName, memory_bytes: u64) {
        self.reserved_memory_bytes = self.reserved_memory_bytes.saturating_sub(memory_bytes);
        self.loaded_models.insert(model);
    }

    /// Release memory held by a model that unloaded, whether from the
    /// reserved pool (load abandoned) or the loaded set (unload completed).
    pub fn release(&mut self, model: &ModelName, memory_bytes: u64) {
        if self.loaded_models.remove(model) {
            self.available_memory_bytes += memory_bytes;
        } else {
            self.reserved_memory_bytes = self.reserved_memory_bytes.saturating_sub(memory_bytes);
            self.available_memory_bytes += memory_bytes;
        }
    }
}

/// A named inference host with an ordered sequence of replica slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub name: ServerName,
    pub replicas: Vec<Replica>,
}

impl Server {
    pub fn new(name: ServerName, replicas: Vec<Replica>) -> Self {
        Self { name, replicas }
    }

    pub fn replica(&self, index: ReplicaIndex) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.index == index)
    }

    pub fn replica_mut(&mut self, index: ReplicaIndex) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.index == index)
    }

    pub fn mark_all_unavailable(&mut self) {
        for replica in &mut self.replicas {
            replica.available = false;
        }
    }
}
