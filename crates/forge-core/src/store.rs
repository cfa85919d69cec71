//! The redb database backing the engine.
//!
//! # Table design
//!
//! ```text
//! events           (user, sequence)        -> JSON ProgressionEvent
//! idempotency      (user, idempotency_key) -> sequence
//! heads            user                    -> last sequence
//! projections      user                    -> JSON PlayerAggregate
//! quest_instances  (user, instance_id)     -> JSON QuestInstance
//! proposals        proposal_id             -> JSON RoadmapProposal
//! votes            (proposal_id, user)     -> JSON Vote
//! assessment_jobs  created_ms BE ++ uuid   -> JSON AssessmentJob
//! ```
//!
//! Only `events`, `idempotency` and `heads` are authoritative. `projections`
//! is a cache that can be dropped and rebuilt from the ledger at any time.

use crate::error::{db_err, Result};
use crate::ledger::Ledger;
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

pub(crate) const EVENTS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("events");
pub(crate) const IDEMPOTENCY: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("idempotency");
pub(crate) const HEADS: TableDefinition<&str, u64> = TableDefinition::new("heads");
pub(crate) const PROJECTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("projections");
pub(crate) const QUEST_INSTANCES: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("quest_instances");
pub(crate) const PROPOSALS: TableDefinition<&str, &[u8]> = TableDefinition::new("proposals");
pub(crate) const VOTES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("votes");
pub(crate) const ASSESSMENT_JOBS: TableDefinition<&[u8], &[u8]> =
    TableDefinition::new("assessment_jobs");

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the database at `path`, creating every table so that
    /// read transactions never observe a missing one.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(EVENTS).map_err(db_err)?;
        wt.open_table(IDEMPOTENCY).map_err(db_err)?;
        wt.open_table(HEADS).map_err(db_err)?;
        wt.open_table(PROJECTIONS).map_err(db_err)?;
        wt.open_table(QUEST_INSTANCES).map_err(db_err)?;
        wt.open_table(PROPOSALS).map_err(db_err)?;
        wt.open_table(VOTES).map_err(db_err)?;
        wt.open_table(ASSESSMENT_JOBS).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &Database {
        &self.db
    }

    pub fn ledger(&self) -> Ledger<'_> {
        Ledger::new(&self.db)
    }
}

// ---------------------------------------------------------------------------
// JSON value helpers
// ---------------------------------------------------------------------------

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Fetch and decode a JSON value from a string-keyed table.
pub(crate) fn get_json<T, Tb>(table: &Tb, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(db_err)? {
        Some(v) => Ok(Some(from_json(v.value())?)),
        None => Ok(None),
    }
}

/// Decode every value of a string-keyed table, in key order.
pub(crate) fn all_json<T, Tb>(table: &Tb) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<&'static str, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        out.push(from_json(v.value())?);
    }
    Ok(out)
}

/// Decode every value under `owner` in a `(owner, id)`-keyed table.
pub(crate) fn owned_json<T, Tb>(table: &Tb, owner: &str) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    Tb: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.range((owner, "")..).map_err(db_err)? {
        let (k, v) = entry.map_err(db_err)?;
        if k.value().0 != owner {
            break;
        }
        out.push(from_json(v.value())?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_creates_parent_and_is_reopenable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".forge/ledger.redb");
        {
            let _store = Store::open(&path).unwrap();
        }
        assert!(path.exists());
        let store = Store::open(&path).unwrap();
        assert_eq!(store.ledger().head("nobody").unwrap(), 0);
    }

    #[test]
    fn owned_json_stops_at_owner_boundary() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("db.redb")).unwrap();
        let wt = store.db().begin_write().unwrap();
        {
            let mut t = wt.open_table(QUEST_INSTANCES).unwrap();
            for (owner, id) in [("alice", "a"), ("alice", "b"), ("alicex", "c"), ("bob", "d")] {
                let v = to_json(&id).unwrap();
                t.insert((owner, id), v.as_slice()).unwrap();
            }
        }
        wt.commit().unwrap();

        let rt = store.db().begin_read().unwrap();
        let t = rt.open_table(QUEST_INSTANCES).unwrap();
        let ids: Vec<String> = owned_json(&t, "alice").unwrap();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
