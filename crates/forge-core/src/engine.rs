//! The progression engine: the single entry point that serializes writes per
//! user, appends to the ledger, advances the cached projection and evaluates
//! badge rules, all inside one redb write transaction per operation.

use crate::assessment::{AssessmentScorer, ProfileSnapshot};
use crate::config::Config;
use crate::error::{db_err, ForgeError, Result};
use crate::event::{
    validate_submission, EventPayload, EventSubmission, Origin, ProgressionEvent,
    QuestRewardPayload, BADGE_KEY_PREFIX, CLAIM_KEY_PREFIX,
};
use crate::jobs::AssessmentJobDb;
use crate::ledger::{self, Appended};
use crate::leveling::LevelingCalculator;
use crate::paths::{self, validate_slug};
use crate::projection::{self, Notification, PlayerAggregate, PlayerStatusSnapshot, ProjectionBuilder};
use crate::quest::{self, ClaimReceipt, QuestInstance};
use crate::rules::{EvalContext, RuleEngine};
use crate::store::{Store, EVENTS, HEADS, IDEMPOTENCY, PROJECTIONS, PROPOSALS, QUEST_INSTANCES, VOTES};
use crate::types::{QuestState, VoteDirection};
use crate::voting::{self, RoadmapProposal, Tally, Vote, VoteResult};
use chrono::{DateTime, Utc};
use redb::WriteTransaction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResult {
    pub accepted: bool,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resulting_level: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlocked_badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentOutcome {
    #[serde(flatten)]
    pub result: SubmitResult,
    pub content_hash: String,
    pub xp_granted: u64,
    pub skill_xp: BTreeMap<String, u64>,
    pub skip_test: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimOutcome {
    pub instance: QuestInstance,
    /// False when the instance had already been claimed.
    pub claimed_now: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlocked_badges: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub user_id: String,
    pub events: u64,
    pub last_sequence: u64,
    /// False when no cached projection existed to compare.
    pub cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProposal {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub roadmap: Option<String>,
    pub author: String,
}

/// Accumulated effects of one engine operation.
#[derive(Default)]
struct Effects {
    notifications: Vec<Notification>,
    badges: Vec<String>,
}

// ---------------------------------------------------------------------------
// UserLocks
// ---------------------------------------------------------------------------

/// One mutex per user so writes for a user never interleave.
#[derive(Default)]
struct UserLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl UserLocks {
    fn handle(&self, user_id: &str) -> Result<Arc<Mutex<()>>> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| ForgeError::Ledger("user lock table poisoned".into()))?;
        Ok(map.entry(user_id.to_string()).or_default().clone())
    }
}

macro_rules! lock_user {
    ($engine:expr, $user:expr) => {
        let handle = $engine.locks.handle($user)?;
        let _guard = handle
            .lock()
            .map_err(|_| ForgeError::Ledger(format!("lock for '{}' poisoned", $user)))?;
    };
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    root: PathBuf,
    config: Config,
    store: Store,
    locks: UserLocks,
}

impl Engine {
    /// Load `.forge/config.yaml` under `root` and open the ledger.
    pub fn open(root: &Path) -> Result<Self> {
        let config = Config::load(root)?;
        Self::with_config(root, config)
    }

    pub fn with_config(root: &Path, config: Config) -> Result<Self> {
        config.ensure_valid()?;
        let store = Store::open(&paths::ledger_path(root))?;
        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            locks: UserLocks::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn jobs(&self) -> AssessmentJobDb<'_> {
        AssessmentJobDb::new(self.store.db())
    }

    fn builder(&self) -> ProjectionBuilder<'_> {
        ProjectionBuilder::new(&self.config)
    }

    // -----------------------------------------------------------------------
    // Transaction helpers
    // -----------------------------------------------------------------------

    /// Cached aggregate advanced by any ledger tail it has not seen.
    fn load_fresh_in(&self, txn: &WriteTransaction, user_id: &str) -> Result<PlayerAggregate> {
        let cached = {
            let table = txn.open_table(PROJECTIONS).map_err(db_err)?;
            projection::load_in(&table, user_id)?
        };
        let builder = self.builder();
        let mut agg = cached.unwrap_or_else(|| builder.empty(user_id));
        let tail = {
            let events = txn.open_table(EVENTS).map_err(db_err)?;
            ledger::events_after_in(&events, user_id, agg.last_sequence)?
        };
        for event in &tail {
            builder.apply(&mut agg, event);
        }
        Ok(agg)
    }

    fn lookup_in(&self, txn: &WriteTransaction, user_id: &str, key: &str) -> Result<Option<u64>> {
        let index = txn.open_table(IDEMPOTENCY).map_err(db_err)?;
        ledger::lookup_in(&index, user_id, key)
    }

    /// Append `sub`, fold it into `agg` and award any badges it makes due.
    fn commit_in(
        &self,
        txn: &WriteTransaction,
        agg: &mut PlayerAggregate,
        sub: EventSubmission,
        fx: &mut Effects,
    ) -> Result<Appended> {
        let appended = ledger::append_in(txn, sub)?;
        if let Appended::Accepted(event) = &appended {
            fx.notifications.extend(self.builder().apply(agg, event));
            self.award_due_badges_in(txn, agg, event.occurred_at, fx)?;
        }
        Ok(appended)
    }

    /// Repeat until no configured badge is newly satisfied; award XP can
    /// satisfy further badges.
    fn award_due_badges_in(
        &self,
        txn: &WriteTransaction,
        agg: &mut PlayerAggregate,
        at: DateTime<Utc>,
        fx: &mut Effects,
    ) -> Result<()> {
        let rules = RuleEngine::new(&self.config.badges, &self.config.hidden_skills);
        loop {
            let due: Vec<(String, u64)> = {
                let ctx = EvalContext {
                    aggregate: agg,
                    calc: LevelingCalculator::new(&self.config.leveling),
                };
                rules
                    .due_badges(&ctx)
                    .into_iter()
                    .map(|b| (b.slug.clone(), b.xp_reward))
                    .collect()
            };
            if due.is_empty() {
                return Ok(());
            }
            for (badge, xp) in due {
                let sub = EventSubmission::new(
                    format!("{BADGE_KEY_PREFIX}{badge}"),
                    agg.user_id.clone(),
                    EventPayload::BadgeAward {
                        badge: badge.clone(),
                        xp,
                    },
                    at,
                );
                match ledger::append_in(txn, sub)? {
                    Appended::Accepted(event) => {
                        tracing::info!(user = %agg.user_id, badge = %badge, "badge awarded");
                        fx.notifications.extend(self.builder().apply(agg, &event));
                        fx.badges.push(badge);
                    }
                    Appended::Duplicate { sequence } => {
                        return Err(ForgeError::InconsistentState {
                            user: agg.user_id.clone(),
                            detail: format!(
                                "ledger already holds badge '{badge}' at sequence {sequence} but the projection does not"
                            ),
                        });
                    }
                }
            }
        }
    }

    fn log_effects(&self, user_id: &str, fx: &Effects) {
        for note in &fx.notifications {
            if let Notification::LevelUp { from, to, .. } = note {
                tracing::info!(user = %user_id, from, to, "level up");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Validate and append an externally supplied event.
    pub fn submit_event(&self, sub: EventSubmission) -> Result<SubmitResult> {
        validate_submission(&sub, &self.config, Origin::External)?;
        let user_id = sub.user_id.clone();
        lock_user!(self, &user_id);

        let txn = self.store.db().begin_write().map_err(db_err)?;
        let mut agg = self.load_fresh_in(&txn, &user_id)?;
        if let Some(sequence) = self.lookup_in(&txn, &user_id, &sub.idempotency_key)? {
            txn.abort().map_err(db_err)?;
            tracing::debug!(user = %user_id, key = %sub.idempotency_key, sequence, "duplicate event");
            return Ok(SubmitResult {
                accepted: false,
                sequence,
                resulting_level: Some(agg.level),
                unlocked_badges: Vec::new(),
                notifications: Vec::new(),
            });
        }
        if let EventPayload::JobChange { to } = &sub.payload {
            self.check_job_change(&agg, to)?;
        }

        let mut fx = Effects::default();
        let appended = self.commit_in(&txn, &mut agg, sub, &mut fx)?;
        projection::save_in(&txn, &agg)?;
        txn.commit().map_err(db_err)?;
        self.log_effects(&user_id, &fx);

        Ok(SubmitResult {
            accepted: true,
            sequence: appended.outcome().sequence,
            resulting_level: Some(agg.level),
            unlocked_badges: fx.badges,
            notifications: fx.notifications,
        })
    }

    // -----------------------------------------------------------------------
    // Read side and projection maintenance
    // -----------------------------------------------------------------------

    pub fn player_status(&self, user_id: &str) -> Result<PlayerStatusSnapshot> {
        validate_slug(user_id)?;
        let fresh = {
            let rt = self.store.db().begin_read().map_err(db_err)?;
            let table = rt.open_table(PROJECTIONS).map_err(db_err)?;
            let heads = rt.open_table(HEADS).map_err(db_err)?;
            let head = ledger::head_in(&heads, user_id)?;
            match projection::load_in(&table, user_id)? {
                Some(agg) if agg.last_sequence == head => Some(agg),
                None if head == 0 => Some(self.builder().empty(user_id)),
                _ => None,
            }
        };
        let agg = match fresh {
            Some(agg) => agg,
            None => {
                lock_user!(self, user_id);
                let txn = self.store.db().begin_write().map_err(db_err)?;
                let agg = self.load_fresh_in(&txn, user_id)?;
                projection::save_in(&txn, &agg)?;
                txn.commit().map_err(db_err)?;
                agg
            }
        };
        Ok(self.builder().snapshot(&agg))
    }

    pub fn replay(&self, user_id: &str) -> Result<Vec<ProgressionEvent>> {
        validate_slug(user_id)?;
        self.store.ledger().replay(user_id)
    }

    pub fn players(&self) -> Result<Vec<String>> {
        self.store.ledger().users()
    }

    /// Discard the cached projection and rebuild it from a full replay, then
    /// award any badge the rebuilt state makes due.
    pub fn rebuild(&self, user_id: &str) -> Result<PlayerStatusSnapshot> {
        validate_slug(user_id)?;
        lock_user!(self, user_id);
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let events = {
            let table = txn.open_table(EVENTS).map_err(db_err)?;
            ledger::events_after_in(&table, user_id, 0)?
        };
        let mut agg = self.builder().fold(user_id, &events);
        let mut fx = Effects::default();
        self.award_due_badges_in(&txn, &mut agg, Utc::now(), &mut fx)?;
        projection::save_in(&txn, &agg)?;
        txn.commit().map_err(db_err)?;
        tracing::info!(user = %user_id, events = events.len(), "projection rebuilt");
        Ok(self.builder().snapshot(&agg))
    }

    /// Compare the cached projection against a full replay. A mismatch is
    /// logged, the cache is replaced by the replayed state, and
    /// [`ForgeError::InconsistentState`] is returned.
    pub fn verify(&self, user_id: &str) -> Result<VerifyReport> {
        validate_slug(user_id)?;
        lock_user!(self, user_id);
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let cached = {
            let table = txn.open_table(PROJECTIONS).map_err(db_err)?;
            projection::load_in(&table, user_id)?
        };
        let events = {
            let table = txn.open_table(EVENTS).map_err(db_err)?;
            ledger::events_after_in(&table, user_id, 0)?
        };
        let builder = self.builder();
        let replayed = builder.fold(user_id, &events);
        let report = VerifyReport {
            user_id: user_id.to_string(),
            events: events.len() as u64,
            last_sequence: replayed.last_sequence,
            cached: cached.is_some(),
        };

        let Some(mut incremental) = cached else {
            txn.abort().map_err(db_err)?;
            return Ok(report);
        };
        let seen = incremental.last_sequence;
        for event in events.iter().filter(|e| e.sequence > seen) {
            builder.apply(&mut incremental, event);
        }
        if serde_json::to_vec(&incremental)? == serde_json::to_vec(&replayed)? {
            txn.abort().map_err(db_err)?;
            return Ok(report);
        }

        let detail = format!(
            "fields differ: {}",
            differing_fields(&incremental, &replayed)?.join(", ")
        );
        tracing::error!(user = %user_id, %detail, "cached projection disagrees with ledger replay; rebuilding");
        projection::save_in(&txn, &replayed)?;
        txn.commit().map_err(db_err)?;
        Err(ForgeError::InconsistentState {
            user: user_id.to_string(),
            detail,
        })
    }

    // -----------------------------------------------------------------------
    // Assessment
    // -----------------------------------------------------------------------

    /// Score `snapshot` and append only the XP earlier assessments did not
    /// already grant. An unchanged snapshot is a duplicate and grants nothing.
    pub fn apply_assessment(&self, snapshot: &ProfileSnapshot) -> Result<AssessmentOutcome> {
        let assessment = AssessmentScorer::new(&self.config.assessment).score(snapshot)?;
        let key = snapshot.idempotency_key()?;
        let user_id = assessment.user_id.clone();
        lock_user!(self, &user_id);

        let txn = self.store.db().begin_write().map_err(db_err)?;
        let mut agg = self.load_fresh_in(&txn, &user_id)?;
        if let Some(sequence) = self.lookup_in(&txn, &user_id, &key)? {
            txn.abort().map_err(db_err)?;
            tracing::debug!(user = %user_id, hash = %assessment.content_hash, "snapshot already assessed");
            return Ok(AssessmentOutcome {
                result: SubmitResult {
                    accepted: false,
                    sequence,
                    resulting_level: Some(agg.level),
                    unlocked_badges: Vec::new(),
                    notifications: Vec::new(),
                },
                content_hash: assessment.content_hash,
                xp_granted: 0,
                skill_xp: BTreeMap::new(),
                skip_test: agg.skip_test.clone(),
            });
        }

        let payload = assessment.grant_against(&agg.assessed);
        let skill_xp = payload.skill_xp.clone();
        let sub = EventSubmission::new(key, user_id.clone(), EventPayload::Assessment(payload), Utc::now());
        validate_submission(&sub, &self.config, Origin::Engine)?;
        let xp_granted = sub.payload.total_xp();

        let mut fx = Effects::default();
        let appended = self.commit_in(&txn, &mut agg, sub, &mut fx)?;
        projection::save_in(&txn, &agg)?;
        txn.commit().map_err(db_err)?;
        self.log_effects(&user_id, &fx);
        tracing::info!(user = %user_id, xp_granted, skills = skill_xp.len(), "assessment applied");

        Ok(AssessmentOutcome {
            result: SubmitResult {
                accepted: true,
                sequence: appended.outcome().sequence,
                resulting_level: Some(agg.level),
                unlocked_badges: fx.badges,
                notifications: fx.notifications,
            },
            content_hash: assessment.content_hash,
            xp_granted,
            skill_xp,
            skip_test: agg.skip_test.clone(),
        })
    }

    // -----------------------------------------------------------------------
    // Job change
    // -----------------------------------------------------------------------

    fn check_job_change(&self, agg: &PlayerAggregate, to: &str) -> Result<()> {
        if self.config.jobs.get(to).is_none() {
            return Err(ForgeError::Validation(format!("unknown job class '{to}'")));
        }
        if agg.job == to {
            return Err(ForgeError::Validation(format!(
                "'{}' is already a {to}",
                agg.user_id
            )));
        }
        if !agg.job_change_eligible {
            return Err(ForgeError::InvalidTransition {
                from: agg.job.clone(),
                to: to.to_string(),
                reason: format!("level {} has not reached a job-change level", agg.level),
            });
        }
        Ok(())
    }

    /// Switch job class. Skill XP carries over in full; only the equipped
    /// set changes.
    pub fn change_job(&self, user_id: &str, to: &str, key: Option<String>) -> Result<SubmitResult> {
        let key = key.unwrap_or_else(|| format!("job-change:{}", Uuid::new_v4()));
        self.submit_event(EventSubmission::new(
            key,
            user_id,
            EventPayload::JobChange { to: to.to_string() },
            Utc::now(),
        ))
    }

    // -----------------------------------------------------------------------
    // Quests
    // -----------------------------------------------------------------------

    /// Materialise every quest instance the offering policy allows at `now`.
    /// Returns only instances created by this call.
    pub fn offer_quests(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<QuestInstance>> {
        validate_slug(user_id)?;
        lock_user!(self, user_id);
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let agg = self.load_fresh_in(&txn, user_id)?;
        let mut offered = Vec::new();
        {
            let mut table = txn.open_table(QUEST_INSTANCES).map_err(db_err)?;
            for template in self.config.quests.iter().filter(|t| t.available_to(&agg)) {
                let instance = QuestInstance::offer(template, user_id, now);
                if quest::get_in(&table, user_id, &instance.id)?.is_some() {
                    continue;
                }
                quest::put(&mut table, &instance)?;
                offered.push(instance);
            }
        }
        projection::save_in(&txn, &agg)?;
        txn.commit().map_err(db_err)?;
        if !offered.is_empty() {
            tracing::debug!(user = %user_id, count = offered.len(), "quests offered");
        }
        Ok(offered)
    }

    pub fn list_quests(&self, user_id: &str, state: Option<QuestState>) -> Result<Vec<QuestInstance>> {
        validate_slug(user_id)?;
        let rt = self.store.db().begin_read().map_err(db_err)?;
        let table = rt.open_table(QUEST_INSTANCES).map_err(db_err)?;
        let mut all = quest::list_in(&table, user_id)?;
        if let Some(state) = state {
            all.retain(|q| q.state == state);
        }
        Ok(all)
    }

    fn advance_quest(
        &self,
        user_id: &str,
        instance_id: &str,
        to: QuestState,
        now: DateTime<Utc>,
    ) -> Result<QuestInstance> {
        validate_slug(user_id)?;
        lock_user!(self, user_id);
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let mut instance = {
            let table = txn.open_table(QUEST_INSTANCES).map_err(db_err)?;
            quest::get_in(&table, user_id, instance_id)?
        }
        .ok_or_else(|| ForgeError::QuestNotFound(instance_id.to_string()))?;
        instance.advance(to, now)?;
        quest::save_in(&txn, &instance)?;
        txn.commit().map_err(db_err)?;
        Ok(instance)
    }

    pub fn start_quest(&self, user_id: &str, instance_id: &str, now: DateTime<Utc>) -> Result<QuestInstance> {
        self.advance_quest(user_id, instance_id, QuestState::InProgress, now)
    }

    pub fn complete_quest(&self, user_id: &str, instance_id: &str, now: DateTime<Utc>) -> Result<QuestInstance> {
        self.advance_quest(user_id, instance_id, QuestState::Completed, now)
    }

    /// The only quest transition that grants XP. Claiming an already claimed
    /// instance returns it unchanged.
    pub fn claim_quest(
        &self,
        user_id: &str,
        instance_id: &str,
        idempotency_key: &str,
    ) -> Result<ClaimOutcome> {
        validate_slug(user_id)?;
        if idempotency_key.trim().is_empty() {
            return Err(ForgeError::Validation("idempotency_key must not be empty".into()));
        }
        lock_user!(self, user_id);
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let mut instance = {
            let table = txn.open_table(QUEST_INSTANCES).map_err(db_err)?;
            quest::get_in(&table, user_id, instance_id)?
        }
        .ok_or_else(|| ForgeError::QuestNotFound(instance_id.to_string()))?;

        if instance.state == QuestState::Claimed {
            txn.abort().map_err(db_err)?;
            tracing::debug!(user = %user_id, instance = %instance_id, "quest already claimed");
            return Ok(ClaimOutcome {
                instance,
                claimed_now: false,
                unlocked_badges: Vec::new(),
                notifications: Vec::new(),
            });
        }
        let now = Utc::now();
        instance.advance(QuestState::Claimed, now)?;
        let template = self.config.quest(&instance.quest).ok_or_else(|| {
            ForgeError::Validation(format!("quest '{}' is no longer configured", instance.quest))
        })?;

        let mut agg = self.load_fresh_in(&txn, user_id)?;
        let sub = EventSubmission::new(
            format!("{CLAIM_KEY_PREFIX}{}", instance.id),
            user_id,
            EventPayload::QuestReward(QuestRewardPayload {
                instance_id: instance.id.clone(),
                quest: template.slug.clone(),
                category: template.category,
                xp: template.xp,
                skill_xp: template.skill_xp.clone(),
                tags: template.tags.clone(),
            }),
            now,
        );
        validate_submission(&sub, &self.config, Origin::Engine)?;
        let xp = sub.payload.total_xp();

        let mut fx = Effects::default();
        let appended = self.commit_in(&txn, &mut agg, sub, &mut fx)?;
        instance.claim = Some(ClaimReceipt {
            idempotency_key: idempotency_key.to_string(),
            sequence: appended.outcome().sequence,
            xp,
            level_after: agg.level,
        });
        quest::save_in(&txn, &instance)?;
        projection::save_in(&txn, &agg)?;
        txn.commit().map_err(db_err)?;
        self.log_effects(user_id, &fx);
        tracing::info!(user = %user_id, quest = %instance.quest, xp, "quest claimed");

        Ok(ClaimOutcome {
            instance,
            claimed_now: true,
            unlocked_badges: fx.badges,
            notifications: fx.notifications,
        })
    }

    // -----------------------------------------------------------------------
    // Roadmap proposals and voting
    // -----------------------------------------------------------------------

    pub fn submit_proposal(&self, new: NewProposal) -> Result<RoadmapProposal> {
        validate_slug(&new.id)?;
        validate_slug(&new.author)?;
        if new.title.trim().is_empty() {
            return Err(ForgeError::Validation("proposal title must not be empty".into()));
        }
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let exists = {
            let table = txn.open_table(PROPOSALS).map_err(db_err)?;
            voting::get_proposal_in(&table, &new.id)?.is_some()
        };
        if exists {
            txn.abort().map_err(db_err)?;
            return Err(ForgeError::ProposalExists(new.id));
        }
        let mut proposal = RoadmapProposal::new(new.id, new.title, new.author, Utc::now());
        proposal.description = new.description;
        proposal.roadmap = new.roadmap;
        voting::save_proposal_in(&txn, &proposal)?;
        txn.commit().map_err(db_err)?;
        Ok(proposal)
    }

    pub fn list_proposals(&self) -> Result<Vec<RoadmapProposal>> {
        let rt = self.store.db().begin_read().map_err(db_err)?;
        let table = rt.open_table(PROPOSALS).map_err(db_err)?;
        voting::list_proposals_in(&table)
    }

    pub fn get_proposal(&self, id: &str) -> Result<RoadmapProposal> {
        let rt = self.store.db().begin_read().map_err(db_err)?;
        let table = rt.open_table(PROPOSALS).map_err(db_err)?;
        voting::get_proposal_in(&table, id)?.ok_or_else(|| ForgeError::ProposalNotFound(id.to_string()))
    }

    pub fn proposal_votes(&self, id: &str) -> Result<Vec<Vote>> {
        let rt = self.store.db().begin_read().map_err(db_err)?;
        let table = rt.open_table(VOTES).map_err(db_err)?;
        voting::votes_for_in(&table, id)
    }

    /// Record one vote per (user, proposal). A repeated vote returns the
    /// original with `accepted: false` and changes nothing.
    pub fn cast_vote(
        &self,
        user_id: &str,
        proposal_id: &str,
        direction: VoteDirection,
    ) -> Result<VoteResult> {
        validate_slug(user_id)?;
        let txn = self.store.db().begin_write().map_err(db_err)?;
        let mut proposal = {
            let table = txn.open_table(PROPOSALS).map_err(db_err)?;
            voting::get_proposal_in(&table, proposal_id)?
        }
        .ok_or_else(|| ForgeError::ProposalNotFound(proposal_id.to_string()))?;

        let existing = {
            let table = txn.open_table(VOTES).map_err(db_err)?;
            voting::get_vote_in(&table, proposal_id, user_id)?
        };
        if let Some(vote) = existing {
            txn.abort().map_err(db_err)?;
            tracing::debug!(user = %user_id, proposal = %proposal_id, "repeat vote ignored");
            return Ok(VoteResult {
                accepted: false,
                vote,
                tally: proposal.tally,
                decision: proposal.decision,
            });
        }
        if proposal.decision.is_terminal() {
            txn.abort().map_err(db_err)?;
            return Err(ForgeError::Validation(format!(
                "proposal '{proposal_id}' is already {}",
                proposal.decision
            )));
        }

        let reputation = self.load_fresh_in(&txn, user_id)?.level;
        let vote = Vote {
            proposal_id: proposal_id.to_string(),
            user_id: user_id.to_string(),
            direction,
            reputation,
            counted: voting::counts(reputation, &self.config.voting),
            cast_at: Utc::now(),
        };
        voting::save_vote_in(&txn, &vote)?;
        let votes = {
            let table = txn.open_table(VOTES).map_err(db_err)?;
            voting::votes_for_in(&table, proposal_id)?
        };
        let tally = Tally::from_votes(&votes);
        let decision = voting::decide(&tally, &self.config.voting);
        proposal.tally = tally;
        if decision.is_terminal() {
            proposal.decision = decision;
            proposal.decided_at = Some(vote.cast_at);
            tracing::info!(proposal = %proposal_id, %decision, net = tally.net(), "proposal decided");
        } else if tally.net() == 0 {
            tracing::info!(
                proposal = %proposal_id,
                up = tally.counted_up,
                down = tally.counted_down,
                "voting tie: proposal stays pending, logged for review"
            );
        }
        voting::save_proposal_in(&txn, &proposal)?;
        txn.commit().map_err(db_err)?;

        Ok(VoteResult {
            accepted: true,
            vote,
            tally,
            decision: proposal.decision,
        })
    }
}

/// Top-level JSON fields whose values differ between two aggregates.
fn differing_fields(a: &PlayerAggregate, b: &PlayerAggregate) -> Result<Vec<String>> {
    let (serde_json::Value::Object(a), serde_json::Value::Object(b)) =
        (serde_json::to_value(a)?, serde_json::to_value(b)?)
    else {
        return Ok(vec!["<aggregate>".to_string()]);
    };
    Ok(a.iter()
        .filter(|(k, v)| b.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
