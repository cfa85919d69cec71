//! Persistent records for background assessment jobs.
//!
//! Jobs live in the `assessment_jobs` table under a 24-byte key:
//! ```text
//! [ created_ms: u64 big-endian (8 bytes) | uuid: 16 bytes ]
//! ```
//! so a plain table scan yields jobs in creation order. The runner that
//! drives a job through its attempts lives in the server; this module only
//! owns the record and its state machine.

use crate::assessment::ProfileSnapshot;
use crate::error::{db_err, ForgeError, Result};
use crate::store::{from_json, to_json, ASSESSMENT_JOBS};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Transitions: `Pending → Running → Succeeded | Failed`, and
/// `Pending | Running → Cancelled`.
///
/// The runner writes `Running` before the first fetch. On restart, any job
/// left `Running` is failed by [`AssessmentJobDb::startup_recovery`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded {
        accepted: bool,
        sequence: u64,
        xp_granted: u64,
    },
    Failed {
        reason: String,
    },
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded { .. } => "succeeded",
            JobStatus::Failed { .. } => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded { .. } | JobStatus::Failed { .. } | JobStatus::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// AssessmentJob
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentJob {
    pub id: Uuid,
    pub user_id: String,
    /// Inline snapshot; when absent the runner asks the profile source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ProfileSnapshot>,
    pub status: JobStatus,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AssessmentJob {
    pub fn new(user_id: impl Into<String>, snapshot: Option<ProfileSnapshot>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            snapshot,
            status: JobStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

fn job_key(ts: DateTime<Utc>, id: Uuid) -> [u8; 24] {
    let mut key = [0u8; 24];
    let ms = ts.timestamp_millis().max(0) as u64;
    key[..8].copy_from_slice(&ms.to_be_bytes());
    key[8..].copy_from_slice(id.as_bytes());
    key
}

// ---------------------------------------------------------------------------
// AssessmentJobDb
// ---------------------------------------------------------------------------

pub struct AssessmentJobDb<'a> {
    db: &'a Database,
}

impl<'a> AssessmentJobDb<'a> {
    pub(crate) fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn insert(&self, job: &AssessmentJob) -> Result<()> {
        let key = job_key(job.created_at, job.id);
        let value = to_json(job)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(ASSESSMENT_JOBS).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<AssessmentJob> {
        self.list_all()?
            .into_iter()
            .find(|j| j.id == id)
            .ok_or_else(|| ForgeError::JobNotFound(id.to_string()))
    }

    /// Apply `f` to the job in a single write transaction and return the
    /// updated record. `f` may refuse the change by returning an error.
    pub fn update<F>(&self, id: Uuid, f: F) -> Result<AssessmentJob>
    where
        F: FnOnce(&mut AssessmentJob) -> Result<()>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let job = {
            let mut table = wt.open_table(ASSESSMENT_JOBS).map_err(db_err)?;
            let mut found = None;
            for entry in table.iter().map_err(db_err)? {
                let (k, v) = entry.map_err(db_err)?;
                let job: AssessmentJob = from_json(v.value())?;
                if job.id == id {
                    found = Some((k.value().to_vec(), job));
                    break;
                }
            }
            let (key, mut job) = found.ok_or_else(|| ForgeError::JobNotFound(id.to_string()))?;
            f(&mut job)?;
            job.updated_at = Utc::now();
            let value = to_json(&job)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
            job
        };
        wt.commit().map_err(db_err)?;
        Ok(job)
    }

    /// Move a job to `status`. Terminal jobs never change again.
    pub fn set_status(&self, id: Uuid, status: JobStatus) -> Result<AssessmentJob> {
        self.update(id, |job| {
            if job.status.is_terminal() {
                return Err(ForgeError::InvalidTransition {
                    from: job.status.as_str().to_string(),
                    to: status.as_str().to_string(),
                    reason: format!("assessment job {} already finished", job.id),
                });
            }
            job.status = status;
            Ok(())
        })
    }

    pub fn record_attempt(&self, id: Uuid, error: Option<String>) -> Result<AssessmentJob> {
        self.update(id, |job| {
            job.attempts += 1;
            if error.is_some() {
                job.last_error = error;
            }
            Ok(())
        })
    }

    pub fn cancel(&self, id: Uuid) -> Result<AssessmentJob> {
        self.set_status(id, JobStatus::Cancelled)
    }

    /// On startup, fail every job still `Running` whose last update is older
    /// than `max_age`. Returns the number of jobs recovered.
    pub fn startup_recovery(&self, max_age: Duration) -> Result<u32> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).map_err(db_err)?;
        let mut count = 0u32;
        for job in self.list_all()? {
            if matches!(job.status, JobStatus::Running) && job.updated_at < cutoff {
                self.set_status(
                    job.id,
                    JobStatus::Failed {
                        reason: "interrupted by restart".into(),
                    },
                )?;
                count += 1;
            }
        }
        if count > 0 {
            tracing::warn!(count, "failed assessment jobs left running by a previous process");
        }
        Ok(count)
    }

    /// Jobs left `Pending`, oldest first.
    pub fn pending(&self) -> Result<Vec<AssessmentJob>> {
        let mut jobs: Vec<AssessmentJob> = self
            .list_all()?
            .into_iter()
            .filter(|j| matches!(j.status, JobStatus::Pending))
            .collect();
        jobs.reverse();
        Ok(jobs)
    }

    /// All jobs, newest first.
    pub fn list_all(&self) -> Result<Vec<AssessmentJob>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ASSESSMENT_JOBS).map_err(db_err)?;
        let mut result = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (_, v) = entry.map_err(db_err)?;
            result.push(from_json::<AssessmentJob>(v.value())?);
        }
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Duration as CDur;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("jobs.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn insert_get_and_list_newest_first() {
        let (_dir, store) = open_tmp();
        let db = AssessmentJobDb::new(store.db());
        let mut older = AssessmentJob::new("alice", None);
        older.created_at = Utc::now() - CDur::seconds(30);
        let newer = AssessmentJob::new("bob", None);
        db.insert(&older).unwrap();
        db.insert(&newer).unwrap();

        let all = db.list_all().unwrap();
        assert_eq!(all[0].user_id, "bob");
        assert_eq!(all[1].user_id, "alice");
        assert_eq!(db.get(older.id).unwrap().user_id, "alice");
        assert_eq!(db.pending().unwrap()[0].user_id, "alice");
        assert!(matches!(
            db.get(Uuid::new_v4()),
            Err(ForgeError::JobNotFound(_))
        ));
    }

    #[test]
    fn terminal_jobs_are_frozen() {
        let (_dir, store) = open_tmp();
        let db = AssessmentJobDb::new(store.db());
        let job = AssessmentJob::new("alice", None);
        db.insert(&job).unwrap();

        db.set_status(job.id, JobStatus::Running).unwrap();
        let done = db.cancel(job.id).unwrap();
        assert_eq!(done.status, JobStatus::Cancelled);
        assert!(matches!(
            db.set_status(job.id, JobStatus::Running),
            Err(ForgeError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn record_attempt_counts_and_keeps_last_error() {
        let (_dir, store) = open_tmp();
        let db = AssessmentJobDb::new(store.db());
        let job = AssessmentJob::new("alice", None);
        db.insert(&job).unwrap();
        db.record_attempt(job.id, Some("timed out".into())).unwrap();
        let j = db.record_attempt(job.id, None).unwrap();
        assert_eq!(j.attempts, 2);
        assert_eq!(j.last_error.as_deref(), Some("timed out"));
    }

    #[test]
    fn startup_recovery_fails_stale_running_jobs() {
        let (_dir, store) = open_tmp();
        let db = AssessmentJobDb::new(store.db());
        let stale = AssessmentJob::new("alice", None);
        let fresh = AssessmentJob::new("bob", None);
        db.insert(&stale).unwrap();
        db.insert(&fresh).unwrap();
        db.set_status(stale.id, JobStatus::Running).unwrap();
        db.set_status(fresh.id, JobStatus::Running).unwrap();

        // Backdate the stale job's updated_at directly in the table.
        let mut backdated = db.get(stale.id).unwrap();
        backdated.updated_at = Utc::now() - CDur::minutes(10);
        let key = job_key(backdated.created_at, backdated.id);
        let wt = store.db().begin_write().unwrap();
        {
            let mut table = wt.open_table(ASSESSMENT_JOBS).unwrap();
            table
                .insert(key.as_slice(), to_json(&backdated).unwrap().as_slice())
                .unwrap();
        }
        wt.commit().unwrap();

        assert_eq!(db.startup_recovery(Duration::from_secs(120)).unwrap(), 1);
        match db.get(stale.id).unwrap().status {
            JobStatus::Failed { reason } => assert!(reason.contains("restart")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert_eq!(db.get(fresh.id).unwrap().status, JobStatus::Running);
    }

    #[test]
    fn startup_recovery_on_empty_db_returns_zero() {
        let (_dir, store) = open_tmp();
        let db = AssessmentJobDb::new(store.db());
        assert_eq!(db.startup_recovery(Duration::from_secs(60)).unwrap(), 0);
    }
}
