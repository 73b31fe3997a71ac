//! Newtype identifiers shared across the control plane.
//!
//! A cheap, `Copy`-or-`Clone`, `Display`, ordered-where-useful newtype per
//! identifier, so the identifiers read the same way no matter which store
//! or wire boundary they cross.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(ServerName, "Unique name of an inference server (agent host).");
string_id!(ModelName, "Unique name of a Model.");
string_id!(ExperimentName, "Unique name of an Experiment.");
string_id!(PipelineName, "Unique name of a Pipeline.");

/// Index of a replica slot within a [`crate::Server`]'s ordered replica sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaIndex(pub u32);

impl fmt::Display for ReplicaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ReplicaIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// A (server, replica) pair identifying a single assignment slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaRef {
    pub server: ServerName,
    pub replica: ReplicaIndex,
}

impl ReplicaRef {
    pub fn new(server: ServerName, replica: ReplicaIndex) -> Self {
        Self { server, replica }
    }
}

impl fmt::Display for ReplicaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.server, self.replica)
    }
}
