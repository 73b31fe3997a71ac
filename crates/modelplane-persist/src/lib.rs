//! # modelplane-persist: opaque durable key/value namespace
//!
//! On-disk persistence is an opaque durable key/value store, one namespace
//! per store (pipeline, experiment), with records carrying a
//! schema-version prefix — unknown versions on load are fatal. `sled` is
//! the embedded engine: a small, crash-safe key/value store without the
//! overhead of hand-rolling a WAL for two small namespaces (see
//! DESIGN.md).

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("durable store error: {0}")]
    Backend(#[from] sled::Error),

    #[error("record at key {key:?} has schema version {found}, expected {expected}")]
    UnknownSchemaVersion { key: String, found: u16, expected: u16 },

    #[error("failed to (de)serialize record at key {key:?}: {source}")]
    Codec { key: String, #[source] source: serde_json::Error },
}

pub type PersistResult<T> = Result<T, PersistError>;

/// A durable key/value database, opened once per process at `db_path`.
#[derive(Clone)]
pub struct Db {
    inner: sled::Db,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let inner = sled::open(path)?;
        Ok(Self { inner })
    }

    /// Opens (creating if absent) a named namespace, e.g. `"pipeline"` or
    /// `"experiment"`.
    pub fn namespace(&self, name: &str) -> PersistResult<Namespace> {
        let tree = self.inner.open_tree(name)?;
        Ok(Namespace { tree })
    }
}

/// One store's durable namespace: a flat key -> schema-versioned record map.
pub struct Namespace {
    tree: sled::Tree,
}

impl Namespace {
    /// Serializes `value` behind a 2-byte little-endian schema-version
    /// prefix and writes it under `key`.
    pub fn put<T: Serialize>(&self, key: &str, schema_version: u16, value: &T) -> PersistResult<()> {
        let body = serde_json::to_vec(value).map_err(|source| PersistError::Codec {
            key: key.to_string(),
            source,
        })?;
        let mut record = Vec::with_capacity(2 + body.len());
        record.extend_from_slice(&schema_version.to_le_bytes());
        record.extend_from_slice(&body);
        self.tree.insert(key.as_bytes(), record)?;
        Ok(())
    }

    /// Reads the record at `key`, verifying its schema version equals
    /// `expected_schema_version`. A mismatch is a fatal condition the
    /// caller should surface as a `ControlPlaneError::Fatal`.
    pub fn get<T: DeserializeOwned>(
        &self,
        key: &str,
        expected_schema_version: u16,
    ) -> PersistResult<Option<T>> {
        let Some(bytes) = self.tree.get(key.as_bytes())? else {
            return Ok(None);
        };
        decode_record(key, expected_schema_version, &bytes).map(Some)
    }

    pub fn remove(&self, key: &str) -> PersistResult<()> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    /// Replays every record in the namespace, in key order, for the
    /// reload-and-synthesize-events flow each store runs at startup.
    pub fn iter<T: DeserializeOwned>(
        &self,
        expected_schema_version: u16,
    ) -> impl Iterator<Item = PersistResult<(String, T)>> + '_ {
        self.tree.iter().map(move |entry| {
            let (key_bytes, value_bytes) = entry?;
            let key = String::from_utf8_lossy(&key_bytes).into_owned();
            let value = decode_record(&key, expected_schema_version, &value_bytes)?;
            Ok((key, value))
        })
    }
}

fn decode_record<T: DeserializeOwned>(
    key: &str,
    expected_schema_version: u16,
    bytes: &[u8],
) -> PersistResult<T> {
    if bytes.len() < 2 {
        return Err(PersistError::UnknownSchemaVersion {
            key: key.to_string(),
            found: 0,
            expected: expected_schema_version,
        });
    }
    let found = u16::from_le_bytes([bytes[0], bytes[1]]);
    if found != expected_schema_version {
        return Err(PersistError::UnknownSchemaVersion {
            key: key.to_string(),
            found,
            expected: expected_schema_version,
        });
    }
    serde_json::from_slice(&bytes[2..]).map_err(|source| PersistError::Codec {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Rec {
        value: u32,
    }

    #[test]
    fn round_trip_put_get() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path()).unwrap();
        let ns = db.namespace("pipeline").unwrap();
        ns.put("p1", 1, &Rec { value: 42 }).unwrap();
        let got: Rec = ns.get("p1", 1).unwrap().unwrap();
        assert_eq!(got, Rec { value: 42 });
    }

    #[test]
    fn unknown_schema_version_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path()).unwrap();
        let ns = db.namespace("experiment").unwrap();
        ns.put("e1", 1, &Rec { value: 1 }).unwrap();
        let err = ns.get::<Rec>("e1", 2).unwrap_err();
        assert!(matches!(err, PersistError::UnknownSchemaVersion { .. }));
    }

    #[test]
    fn iter_replays_all_records() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path()).unwrap();
        let ns = db.namespace("pipeline").unwrap();
        ns.put("a", 1, &Rec { value: 1 }).unwrap();
        ns.put("b", 1, &Rec { value: 2 }).unwrap();
        let all: Vec<(String, Rec)> = ns.iter(1).collect::<Result<_, _>>().unwrap();
        assert_eq!(all.len(), 2);
    }
}
