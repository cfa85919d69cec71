use crate::config::Config;
use crate::error::{ForgeError, Result};
use crate::paths::validate_slug;
use crate::types::{EventSource, QuestCategory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Idempotency-key prefixes the engine reserves for the events it derives.
pub const BADGE_KEY_PREFIX: &str = "badge:";
pub const CLAIM_KEY_PREFIX: &str = "quest-claim:";
pub const ASSESSMENT_KEY_PREFIX: &str = "github:";

const MAX_KEY_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentPayload {
    pub content_hash: String,
    /// Full discounted estimate per skill at the time of scoring.
    pub estimates: BTreeMap<String, u64>,
    /// Incremental XP actually granted: `max(0, estimate - already applied)`.
    pub skill_xp: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skip_test: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestRewardPayload {
    pub instance_id: String,
    pub quest: String,
    pub category: QuestCategory,
    #[serde(default)]
    pub xp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skill_xp: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Assessment(AssessmentPayload),
    QuestReward(QuestRewardPayload),
    Exercise { skill: String, xp: u64 },
    BadgeAward { badge: String, xp: u64 },
    Signal { name: String, xp: u64 },
    JobChange { to: String },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Assessment(_) => "assessment",
            EventPayload::QuestReward(_) => "quest_reward",
            EventPayload::Exercise { .. } => "exercise",
            EventPayload::BadgeAward { .. } => "badge_award",
            EventPayload::Signal { .. } => "signal",
            EventPayload::JobChange { .. } => "job_change",
        }
    }

    pub fn expected_source(&self) -> EventSource {
        match self {
            EventPayload::Assessment(_) => EventSource::GithubAnalysis,
            EventPayload::QuestReward(_) => EventSource::QuestCompletion,
            EventPayload::Exercise { .. } => EventSource::ManualExercise,
            EventPayload::BadgeAward { .. } | EventPayload::Signal { .. } => {
                EventSource::BadgeTrigger
            }
            EventPayload::JobChange { .. } => EventSource::JobChange,
        }
    }

    /// XP added to the player's total by this payload, or `None` when the
    /// grants overflow `u64`.
    pub fn checked_total_xp(&self) -> Option<u64> {
        let sum = |base: u64, grants: &BTreeMap<String, u64>| {
            grants.values().try_fold(base, |acc, &xp| acc.checked_add(xp))
        };
        match self {
            EventPayload::Assessment(a) => sum(0, &a.skill_xp),
            EventPayload::QuestReward(q) => sum(q.xp, &q.skill_xp),
            EventPayload::Exercise { xp, .. }
            | EventPayload::BadgeAward { xp, .. }
            | EventPayload::Signal { xp, .. } => Some(*xp),
            EventPayload::JobChange { .. } => Some(0),
        }
    }

    /// Saturating form of [`checked_total_xp`](Self::checked_total_xp).
    /// Appended events passed validation, so this only saturates on
    /// hand-edited ledgers.
    pub fn total_xp(&self) -> u64 {
        self.checked_total_xp().unwrap_or(u64::MAX)
    }

    /// Per-skill XP carried by this payload.
    pub fn skill_grants(&self) -> Vec<(&str, u64)> {
        match self {
            EventPayload::Assessment(a) => {
                a.skill_xp.iter().map(|(k, v)| (k.as_str(), *v)).collect()
            }
            EventPayload::QuestReward(q) => {
                q.skill_xp.iter().map(|(k, v)| (k.as_str(), *v)).collect()
            }
            EventPayload::Exercise { skill, xp } => vec![(skill.as_str(), *xp)],
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// EventSubmission / ProgressionEvent
// ---------------------------------------------------------------------------

/// An event as handed to the ingestion boundary, before the ledger has
/// assigned it a sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubmission {
    pub idempotency_key: String,
    pub user_id: String,
    pub source: EventSource,
    pub payload: EventPayload,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl EventSubmission {
    pub fn new(
        idempotency_key: impl Into<String>,
        user_id: impl Into<String>,
        payload: EventPayload,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            user_id: user_id.into(),
            source: payload.expected_source(),
            payload,
            occurred_at,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionEvent {
    /// The idempotency key the event was submitted with.
    pub event_id: String,
    pub user_id: String,
    pub source: EventSource,
    pub payload: EventPayload,
    pub occurred_at: DateTime<Utc>,
    pub sequence: u64,
}

impl ProgressionEvent {
    pub fn from_submission(sub: EventSubmission, sequence: u64) -> Self {
        Self {
            event_id: sub.idempotency_key,
            user_id: sub.user_id,
            source: sub.source,
            payload: sub.payload,
            occurred_at: sub.occurred_at,
            sequence,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Who produced a submission. Engine-derived events (badge awards, claim
/// rewards, assessments) may use reserved keys and payload kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    External,
    Engine,
}

pub fn validate_submission(sub: &EventSubmission, cfg: &Config, origin: Origin) -> Result<()> {
    let invalid = |msg: String| Err(ForgeError::Validation(msg));

    let key = sub.idempotency_key.trim();
    if key.is_empty() {
        return invalid("idempotency_key must not be empty".to_string());
    }
    if sub.idempotency_key.len() > MAX_KEY_LEN {
        return invalid(format!("idempotency_key longer than {MAX_KEY_LEN} bytes"));
    }
    validate_slug(&sub.user_id)?;

    if sub.payload.expected_source() != sub.source {
        return invalid(format!(
            "payload kind '{}' does not belong to source '{}'",
            sub.payload.kind(),
            sub.source
        ));
    }

    let Some(total) = sub.payload.checked_total_xp() else {
        return invalid("event XP overflows".to_string());
    };

    if origin == Origin::External {
        for prefix in [BADGE_KEY_PREFIX, CLAIM_KEY_PREFIX, ASSESSMENT_KEY_PREFIX] {
            if key.starts_with(prefix) {
                return invalid(format!(
                    "idempotency_key prefix '{prefix}' is reserved for engine events"
                ));
            }
        }
        match &sub.payload {
            EventPayload::BadgeAward { .. } => {
                return invalid("badge awards are granted by rule evaluation only".to_string())
            }
            EventPayload::Assessment(_) => {
                return invalid(
                    "assessment events are produced from profile snapshots".to_string(),
                )
            }
            _ => {}
        }
        let cap = cfg.leveling.max_xp_per_event;
        for (skill, xp) in sub.payload.skill_grants() {
            if xp > cap {
                return invalid(format!(
                    "grant of {xp} XP to '{skill}' is above max_xp_per_event={cap}"
                ));
            }
        }
        if total > cap {
            return invalid(format!(
                "event grants {total} XP, above max_xp_per_event={cap}"
            ));
        }
    }

    for (skill, _) in sub.payload.skill_grants() {
        validate_slug(skill)?;
    }
    match &sub.payload {
        EventPayload::JobChange { to } => validate_slug(to)?,
        EventPayload::BadgeAward { badge, .. } => validate_slug(badge)?,
        EventPayload::Signal { name, .. } if name.trim().is_empty() => {
            return invalid("signal name must not be empty".to_string())
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
