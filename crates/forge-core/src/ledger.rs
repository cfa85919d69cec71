//! Append-only, per-user progression ledger.
//!
//! The ledger is the only authoritative state in the engine. Each user has an
//! independent sequence starting at 1; the `idempotency` table is a unique
//! index on `(user, idempotency_key)` so an external trigger is applied at
//! most once no matter how often it is delivered.

use crate::error::{db_err, Result};
use crate::event::{EventSubmission, ProgressionEvent};
use crate::store::{from_json, to_json, EVENTS, HEADS, IDEMPOTENCY};
use redb::{Database, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Append result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendOutcome {
    pub accepted: bool,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Appended {
    Accepted(ProgressionEvent),
    /// The key was already recorded at `sequence`; nothing was written.
    Duplicate { sequence: u64 },
}

impl Appended {
    pub fn outcome(&self) -> AppendOutcome {
        match self {
            Appended::Accepted(e) => AppendOutcome {
                accepted: true,
                sequence: e.sequence,
            },
            Appended::Duplicate { sequence } => AppendOutcome {
                accepted: false,
                sequence: *sequence,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction-level operations
// ---------------------------------------------------------------------------

pub(crate) fn lookup_in<T>(index: &T, user_id: &str, key: &str) -> Result<Option<u64>>
where
    T: ReadableTable<(&'static str, &'static str), u64>,
{
    Ok(index
        .get((user_id, key))
        .map_err(db_err)?
        .map(|v| v.value()))
}

pub(crate) fn head_in<T>(heads: &T, user_id: &str) -> Result<u64>
where
    T: ReadableTable<&'static str, u64>,
{
    Ok(heads.get(user_id).map_err(db_err)?.map(|v| v.value()).unwrap_or(0))
}

/// Events for `user_id` with sequence strictly greater than `after`, ascending.
pub(crate) fn events_after_in<T>(events: &T, user_id: &str, after: u64) -> Result<Vec<ProgressionEvent>>
where
    T: ReadableTable<(&'static str, u64), &'static [u8]>,
{
    let Some(start) = after.checked_add(1) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for entry in events
        .range((user_id, start)..=(user_id, u64::MAX))
        .map_err(db_err)?
    {
        let (_, v) = entry.map_err(db_err)?;
        out.push(from_json(v.value())?);
    }
    Ok(out)
}

/// Append inside an open write transaction. The caller commits.
pub(crate) fn append_in(txn: &WriteTransaction, sub: EventSubmission) -> Result<Appended> {
    let mut index = txn.open_table(IDEMPOTENCY).map_err(db_err)?;
    if let Some(sequence) = lookup_in(&index, &sub.user_id, &sub.idempotency_key)? {
        return Ok(Appended::Duplicate { sequence });
    }

    let mut heads = txn.open_table(HEADS).map_err(db_err)?;
    let sequence = head_in(&heads, &sub.user_id)? + 1;
    let event = ProgressionEvent::from_submission(sub, sequence);
    let value = to_json(&event)?;

    let mut events = txn.open_table(EVENTS).map_err(db_err)?;
    events
        .insert((event.user_id.as_str(), sequence), value.as_slice())
        .map_err(db_err)?;
    index
        .insert((event.user_id.as_str(), event.event_id.as_str()), sequence)
        .map_err(db_err)?;
    heads
        .insert(event.user_id.as_str(), sequence)
        .map_err(db_err)?;

    tracing::debug!(
        user = %event.user_id,
        sequence,
        source = %event.source,
        key = %event.event_id,
        "ledger append"
    );
    Ok(Appended::Accepted(event))
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Standalone ledger handle; each call runs in its own transaction.
pub struct Ledger<'a> {
    db: &'a Database,
}

impl<'a> Ledger<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn append(&self, sub: EventSubmission) -> Result<Appended> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let appended = append_in(&wt, sub)?;
        wt.commit().map_err(db_err)?;
        Ok(appended)
    }

    /// Full ordered history of `user_id`.
    pub fn replay(&self, user_id: &str) -> Result<Vec<ProgressionEvent>> {
        self.events_after(user_id, 0)
    }

    pub fn events_after(&self, user_id: &str, after: u64) -> Result<Vec<ProgressionEvent>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let events = rt.open_table(EVENTS).map_err(db_err)?;
        events_after_in(&events, user_id, after)
    }

    pub fn head(&self, user_id: &str) -> Result<u64> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let heads = rt.open_table(HEADS).map_err(db_err)?;
        head_in(&heads, user_id)
    }

    pub fn lookup(&self, user_id: &str, key: &str) -> Result<Option<u64>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let index = rt.open_table(IDEMPOTENCY).map_err(db_err)?;
        lookup_in(&index, user_id, key)
    }

    /// Every user with at least one ledger entry.
    pub fn users(&self) -> Result<Vec<String>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let heads = rt.open_table(HEADS).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in heads.iter().map_err(db_err)? {
            let (k, _) = entry.map_err(db_err)?;
            out.push(k.value().to_string());
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::store::Store;
    use chrono::Utc;
    use tempfile::TempDir;

    fn exercise(user: &str, key: &str, xp: u64) -> EventSubmission {
        EventSubmission::new(
            key,
            user,
            EventPayload::Exercise {
                skill: "rust".into(),
                xp,
            },
            Utc::now(),
        )
    }

    #[test]
    fn sequences_are_per_user_and_start_at_one() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("l.redb")).unwrap();
        let ledger = store.ledger();

        assert_eq!(ledger.append(exercise("alice", "a1", 1)).unwrap().outcome().sequence, 1);
        assert_eq!(ledger.append(exercise("alice", "a2", 1)).unwrap().outcome().sequence, 2);
        assert_eq!(ledger.append(exercise("bob", "b1", 1)).unwrap().outcome().sequence, 1);
        assert_eq!(ledger.head("alice").unwrap(), 2);
        assert_eq!(ledger.users().unwrap(), vec!["alice", "bob"]);
    }

    #[test]
    fn duplicate_key_is_rejected_without_write() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("l.redb")).unwrap();
        let ledger = store.ledger();

        let first = ledger.append(exercise("alice", "dup", 10)).unwrap();
        assert!(first.outcome().accepted);
        let second = ledger.append(exercise("alice", "dup", 99)).unwrap();
        assert_eq!(second, Appended::Duplicate { sequence: 1 });
        assert_eq!(ledger.replay("alice").unwrap().len(), 1);

        // Same key for a different user is independent.
        assert!(ledger.append(exercise("bob", "dup", 1)).unwrap().outcome().accepted);
        assert_eq!(ledger.lookup("alice", "dup").unwrap(), Some(1));
        assert_eq!(ledger.lookup("alice", "nope").unwrap(), None);
    }

    #[test]
    fn replay_is_ordered_and_tail_reads_past_sequence() {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("l.redb")).unwrap();
        let ledger = store.ledger();
        for i in 0..5 {
            ledger.append(exercise("alice", &format!("k{i}"), i)).unwrap();
        }
        ledger.append(exercise("alicia", "other", 1)).unwrap();

        let all = ledger.replay("alice").unwrap();
        let seqs: Vec<u64> = all.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(all[2].event_id, "k2");

        let tail = ledger.events_after("alice", 3).unwrap();
        assert_eq!(tail.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![4, 5]);
        assert!(ledger.events_after("alice", u64::MAX).unwrap().is_empty());
    }
}
