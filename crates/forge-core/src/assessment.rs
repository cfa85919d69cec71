//! Initial placement from an external profile snapshot.
//!
//! The engine never talks to a code-hosting API. A collaborator hands it a
//! normalized [`ProfileSnapshot`] through a [`ProfileSource`], the
//! [`AssessmentScorer`] turns that into a per-skill XP estimate, and only the
//! increment over what earlier assessments already granted reaches the ledger.

use crate::config::AssessmentConfig;
use crate::error::{ForgeError, Result};
use crate::event::{AssessmentPayload, ASSESSMENT_KEY_PREFIX};
use crate::io;
use crate::paths::{self, normalize_slug, validate_slug};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::PathBuf;

// ---------------------------------------------------------------------------
// ProfileSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub commit_count: u64,
    /// Language name -> sample count (repositories, files or bytes; the
    /// scorer only uses relative shares and the raw count for confidence).
    #[serde(default)]
    pub languages: BTreeMap<String, u64>,
    #[serde(default)]
    pub pr_count: u64,
    #[serde(default)]
    pub review_count: u64,
    #[serde(default)]
    pub star_count: u64,
    #[serde(default)]
    pub fork_count: u64,
    #[serde(default)]
    pub resolved_issues: u64,
}

impl ProfileSnapshot {
    /// The supplied hash, or SHA-256 over the canonical JSON of the
    /// snapshot with the hash field omitted.
    pub fn content_hash(&self) -> Result<String> {
        if let Some(h) = self.content_hash.as_deref().filter(|h| !h.trim().is_empty()) {
            return Ok(h.to_string());
        }
        let canonical = ProfileSnapshot {
            content_hash: None,
            ..self.clone()
        };
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&canonical)?);
        Ok(format!("{:x}", hasher.finalize()))
    }

    pub fn idempotency_key(&self) -> Result<String> {
        Ok(format!("{ASSESSMENT_KEY_PREFIX}{}", self.content_hash()?))
    }
}

// ---------------------------------------------------------------------------
// ProfileSource
// ---------------------------------------------------------------------------

/// Capability boundary to whatever produces profile snapshots.
///
/// Failures that a retry could fix must be reported as
/// [`ForgeError::ExternalService`].
pub trait ProfileSource: Send + Sync {
    fn fetch_profile_snapshot(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<ProfileSnapshot>> + Send;
}

/// Reads `.forge/profiles/<user>.json`.
#[derive(Debug, Clone)]
pub struct FileProfileSource {
    root: PathBuf,
}

impl FileProfileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn load(&self, user_id: &str) -> Result<ProfileSnapshot> {
        validate_slug(user_id)?;
        let path = paths::profile_path(&self.root, user_id);
        let snap: ProfileSnapshot = io::read_json(&path).map_err(|e| match e {
            ForgeError::Json(e) => {
                ForgeError::Validation(format!("malformed profile snapshot {}: {e}", path.display()))
            }
            other => ForgeError::ExternalService(format!("cannot read {}: {other}", path.display())),
        })?;
        if snap.user_id != user_id {
            return Err(ForgeError::Validation(format!(
                "profile snapshot at {} belongs to '{}'",
                path.display(),
                snap.user_id
            )));
        }
        Ok(snap)
    }
}

impl ProfileSource for FileProfileSource {
    fn fetch_profile_snapshot(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<ProfileSnapshot>> + Send {
        std::future::ready(self.load(user_id))
    }
}

/// A snapshot supplied inline by the caller.
#[derive(Debug, Clone)]
pub struct StaticProfileSource {
    snapshot: ProfileSnapshot,
}

impl StaticProfileSource {
    pub fn new(snapshot: ProfileSnapshot) -> Self {
        Self { snapshot }
    }
}

impl ProfileSource for StaticProfileSource {
    fn fetch_profile_snapshot(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<ProfileSnapshot>> + Send {
        let out = if self.snapshot.user_id == user_id {
            Ok(self.snapshot.clone())
        } else {
            Err(ForgeError::Validation(format!(
                "snapshot belongs to '{}', not '{user_id}'",
                self.snapshot.user_id
            )))
        };
        std::future::ready(out)
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub user_id: String,
    pub content_hash: String,
    /// Discounted XP estimate per skill.
    pub estimates: BTreeMap<String, u64>,
    pub confidence: BTreeMap<String, f64>,
    pub skip_test: BTreeSet<String>,
}

impl Assessment {
    /// Ledger payload granting only what `applied` (the highest estimate
    /// already turned into XP per skill) does not cover yet.
    pub fn grant_against(&self, applied: &BTreeMap<String, u64>) -> AssessmentPayload {
        let skill_xp = self
            .estimates
            .iter()
            .filter_map(|(skill, &estimate)| {
                let prior = applied.get(skill).copied().unwrap_or(0);
                let delta = estimate.saturating_sub(prior);
                (delta > 0).then(|| (skill.clone(), delta))
            })
            .collect();
        AssessmentPayload {
            content_hash: self.content_hash.clone(),
            estimates: self.estimates.clone(),
            skill_xp,
            skip_test: self.skip_test.clone(),
        }
    }
}

pub struct AssessmentScorer<'a> {
    cfg: &'a AssessmentConfig,
}

impl<'a> AssessmentScorer<'a> {
    pub fn new(cfg: &'a AssessmentConfig) -> Self {
        Self { cfg }
    }

    /// Weighted activity score distributed across languages by share.
    pub fn score(&self, snap: &ProfileSnapshot) -> Result<Assessment> {
        validate_slug(&snap.user_id)?;
        let w = &self.cfg.weights;
        let activity = snap.commit_count as f64 * w.commit
            + snap.pr_count as f64 * w.pull_request
            + snap.review_count as f64 * w.review
            + snap.star_count as f64 * w.star
            + snap.fork_count as f64 * w.fork
            + snap.resolved_issues as f64 * w.resolved_issue;

        let mut samples: BTreeMap<String, u64> = BTreeMap::new();
        for (raw, &count) in &snap.languages {
            let skill = normalize_slug(raw);
            if validate_slug(&skill).is_err() {
                tracing::debug!(language = %raw, "skipping language with no valid skill slug");
                continue;
            }
            let entry = samples.entry(skill).or_default();
            *entry = entry.saturating_add(count);
        }
        let total = samples.values().fold(0u64, |acc, &n| acc.saturating_add(n));

        let mut estimates = BTreeMap::new();
        let mut confidence = BTreeMap::new();
        let mut skip_test = BTreeSet::new();
        if total > 0 {
            for (skill, count) in samples {
                let share = count as f64 / total as f64;
                if share < self.cfg.min_language_share {
                    continue;
                }
                // `as` saturates, then the configured bound applies
                let estimate = ((activity * share * self.cfg.discount).floor().max(0.0) as u64)
                    .min(self.cfg.max_skill_estimate);
                let conf = (count as f64 / self.cfg.confidence_sample as f64).min(1.0);
                if conf >= self.cfg.skip_test_confidence {
                    skip_test.insert(skill.clone());
                }
                confidence.insert(skill.clone(), conf);
                estimates.insert(skill, estimate);
            }
        }

        Ok(Assessment {
            user_id: snap.user_id.clone(),
            content_hash: snap.content_hash()?,
            estimates,
            confidence,
            skip_test,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot() -> ProfileSnapshot {
        ProfileSnapshot {
            user_id: "octocat".into(),
            content_hash: None,
            commit_count: 100,
            languages: BTreeMap::from([
                ("Rust".to_string(), 60),
                ("Python".to_string(), 38),
                ("Makefile".to_string(), 2),
            ]),
            pr_count: 10,
            review_count: 4,
            star_count: 0,
            fork_count: 0,
            resolved_issues: 2,
        }
    }

    #[test]
    fn content_hash_is_stable_and_sensitive() {
        let a = snapshot();
        let h1 = a.content_hash().unwrap();
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, snapshot().content_hash().unwrap());

        let mut b = snapshot();
        b.commit_count += 1;
        assert_ne!(h1, b.content_hash().unwrap());

        let mut c = snapshot();
        c.content_hash = Some("abc".into());
        assert_eq!(c.content_hash().unwrap(), "abc");
        assert_eq!(c.idempotency_key().unwrap(), "github:abc");
    }

    #[test]
    fn estimates_are_discounted_and_share_weighted() {
        let cfg = AssessmentConfig::default();
        let snap = snapshot();
        let a = AssessmentScorer::new(&cfg).score(&snap).unwrap();

        let w = &cfg.weights;
        let activity = 100.0 * w.commit + 10.0 * w.pull_request + 4.0 * w.review
            + 2.0 * w.resolved_issue;
        let raw_rust = activity * 0.6;
        assert_eq!(a.estimates["rust"], (raw_rust * cfg.discount).floor() as u64);
        assert!((a.estimates["rust"] as f64) < raw_rust);
        assert!(a.estimates.contains_key("python"));
        // 2% share is below the default min_language_share
        assert!(!a.estimates.contains_key("makefile"));
    }

    #[test]
    fn skip_test_follows_confidence_threshold() {
        let mut cfg = AssessmentConfig::default();
        cfg.confidence_sample = 50;
        cfg.skip_test_confidence = 1.0;
        let a = AssessmentScorer::new(&cfg).score(&snapshot()).unwrap();
        assert!(a.skip_test.contains("rust"));
        assert!(!a.skip_test.contains("python"));
        assert_eq!(a.confidence["rust"], 1.0);
    }

    #[test]
    fn grant_against_never_goes_negative() {
        let cfg = AssessmentConfig::default();
        let a = AssessmentScorer::new(&cfg).score(&snapshot()).unwrap();
        let rust = a.estimates["rust"];

        let fresh = a.grant_against(&BTreeMap::new());
        assert_eq!(fresh.skill_xp["rust"], rust);

        let applied = BTreeMap::from([
            ("rust".to_string(), rust + 500),
            ("python".to_string(), 1),
        ]);
        let inc = a.grant_against(&applied);
        assert!(!inc.skill_xp.contains_key("rust"));
        assert_eq!(inc.skill_xp["python"], a.estimates["python"] - 1);
    }

    #[test]
    fn empty_histogram_yields_no_estimates() {
        let cfg = AssessmentConfig::default();
        let mut snap = snapshot();
        snap.languages.clear();
        let a = AssessmentScorer::new(&cfg).score(&snap).unwrap();
        assert!(a.estimates.is_empty());
    }

    #[test]
    fn file_source_reads_profile_dir() {
        let dir = TempDir::new().unwrap();
        let path = paths::profile_path(dir.path(), "octocat");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, serde_json::to_vec(&snapshot()).unwrap()).unwrap();

        let src = FileProfileSource::new(dir.path());
        let snap = src.load("octocat").unwrap();
        assert_eq!(snap.commit_count, 100);

        let missing = src.load("ghost").unwrap_err();
        assert!(missing.is_transient());
    }

    #[test]
    fn file_source_rejects_malformed_snapshot_without_retry() {
        let dir = TempDir::new().unwrap();
        let path = paths::profile_path(dir.path(), "octocat");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        let err = FileProfileSource::new(dir.path()).load("octocat").unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)), "{err}");
        assert!(!err.is_transient());
    }

    #[test]
    fn outsized_profiles_score_without_overflow() {
        let cfg = AssessmentConfig::default();
        let mut colliding = snapshot();
        colliding.languages = BTreeMap::from([
            ("Rust".to_string(), u64::MAX),
            ("rust".to_string(), 5),
        ]);
        let a = AssessmentScorer::new(&cfg).score(&colliding).unwrap();
        assert_eq!(a.estimates.len(), 1);
        assert!(a.estimates["rust"] <= cfg.max_skill_estimate);

        let mut busy = snapshot();
        busy.commit_count = u64::MAX;
        busy.languages = BTreeMap::from([
            ("Rust".to_string(), 50),
            ("Go".to_string(), 50),
        ]);
        let a = AssessmentScorer::new(&cfg).score(&busy).unwrap();
        assert_eq!(a.estimates["rust"], cfg.max_skill_estimate);
        assert_eq!(a.estimates["go"], cfg.max_skill_estimate);
        let payload = a.grant_against(&BTreeMap::new());
        assert_eq!(
            crate::event::EventPayload::Assessment(payload).checked_total_xp(),
            Some(2 * cfg.max_skill_estimate)
        );
    }
}
