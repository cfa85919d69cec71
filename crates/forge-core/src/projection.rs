//! Player status projection.
//!
//! [`PlayerAggregate`] is the fold of a user's ledger. It is cached in the
//! `projections` table and advanced incrementally as events are appended,
//! but a full replay must always produce the same bytes. Every collection in
//! the aggregate is a `BTreeMap`/`BTreeSet` so serialization is deterministic.

use crate::config::Config;
use crate::error::{db_err, Result};
use crate::event::{EventPayload, ProgressionEvent};
use crate::leveling::LevelingCalculator;
use crate::rules::{EvalContext, HistoryFacts, RuleEngine};
use crate::store::{get_json, to_json, PROJECTIONS};
use crate::types::Stat;
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillProgress {
    pub xp: u64,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgeAward {
    pub badge: String,
    /// Ledger sequence of the award event.
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerAggregate {
    pub user_id: String,
    pub job: String,
    pub total_xp: u64,
    pub level: u32,
    #[serde(default)]
    pub skills: BTreeMap<String, SkillProgress>,
    #[serde(default)]
    pub badges: BTreeMap<String, BadgeAward>,
    /// Hidden skill -> sequence of the event after which it unlocked.
    #[serde(default)]
    pub hidden_skills: BTreeMap<String, u64>,
    /// Highest assessment estimate already turned into XP, per skill.
    #[serde(default)]
    pub assessed: BTreeMap<String, u64>,
    #[serde(default)]
    pub skip_test: BTreeSet<String>,
    /// Claimed quest template slug -> number of claims.
    #[serde(default)]
    pub claimed_quests: BTreeMap<String, u64>,
    #[serde(default)]
    pub facts: HistoryFacts,
    /// Job changes made so far; each consumes one reached job-change level.
    #[serde(default)]
    pub job_changes: u32,
    pub job_change_eligible: bool,
    pub last_sequence: u64,
}

impl PlayerAggregate {
    pub fn new(user_id: impl Into<String>, job: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job: job.into(),
            total_xp: 0,
            level: 1,
            skills: BTreeMap::new(),
            badges: BTreeMap::new(),
            hidden_skills: BTreeMap::new(),
            assessed: BTreeMap::new(),
            skip_test: BTreeSet::new(),
            claimed_quests: BTreeMap::new(),
            facts: HistoryFacts::default(),
            job_changes: 0,
            job_change_eligible: false,
            last_sequence: 0,
        }
    }

    pub fn skill_xp(&self, skill: &str) -> u64 {
        self.skills.get(skill).map(|s| s.xp).unwrap_or(0)
    }

    pub fn has_claimed(&self, quest: &str) -> bool {
        self.claimed_quests.contains_key(quest)
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Side-channel signals produced while applying events. Delivery (animation,
/// sound, push) is up to whoever consumes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    LevelUp {
        user_id: String,
        from: u32,
        to: u32,
        sequence: u64,
    },
    JobChangeUnlocked {
        user_id: String,
        level: u32,
    },
    JobChanged {
        user_id: String,
        from: String,
        to: String,
    },
    BadgeAwarded {
        user_id: String,
        badge: String,
    },
    HiddenSkillUnlocked {
        user_id: String,
        skill: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LevelUp { .. } => "level_up",
            Notification::JobChangeUnlocked { .. } => "job_change_unlocked",
            Notification::JobChanged { .. } => "job_changed",
            Notification::BadgeAwarded { .. } => "badge_awarded",
            Notification::HiddenSkillUnlocked { .. } => "hidden_skill_unlocked",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Notification::LevelUp { user_id, .. }
            | Notification::JobChangeUnlocked { user_id, .. }
            | Notification::JobChanged { user_id, .. }
            | Notification::BadgeAwarded { user_id, .. }
            | Notification::HiddenSkillUnlocked { user_id, .. } => user_id,
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectionBuilder
// ---------------------------------------------------------------------------

pub struct ProjectionBuilder<'a> {
    cfg: &'a Config,
}

impl<'a> ProjectionBuilder<'a> {
    pub fn new(cfg: &'a Config) -> Self {
        Self { cfg }
    }

    pub fn empty(&self, user_id: &str) -> PlayerAggregate {
        PlayerAggregate::new(user_id, self.cfg.jobs.default.clone())
    }

    /// Fold one ledger event into `agg`. Events must arrive in sequence order.
    pub fn apply(&self, agg: &mut PlayerAggregate, event: &ProgressionEvent) -> Vec<Notification> {
        let calc = LevelingCalculator::new(&self.cfg.leveling);
        let mut notes = Vec::new();
        let user = agg.user_id.clone();

        agg.facts.record_event(event.source);
        match &event.payload {
            EventPayload::Assessment(a) => {
                for (skill, &estimate) in &a.estimates {
                    let applied = agg.assessed.entry(skill.clone()).or_default();
                    *applied = (*applied).max(estimate);
                }
                agg.skip_test.extend(a.skip_test.iter().cloned());
            }
            EventPayload::QuestReward(q) => {
                agg.facts.record_claim(q.category, &q.tags);
                *agg.claimed_quests.entry(q.quest.clone()).or_default() += 1;
            }
            EventPayload::BadgeAward { badge, .. } => {
                agg.badges.insert(
                    badge.clone(),
                    BadgeAward {
                        badge: badge.clone(),
                        sequence: event.sequence,
                    },
                );
                notes.push(Notification::BadgeAwarded {
                    user_id: user.clone(),
                    badge: badge.clone(),
                });
            }
            EventPayload::JobChange { to } => {
                let from = std::mem::replace(&mut agg.job, to.clone());
                agg.job_changes = agg.job_changes.saturating_add(1);
                notes.push(Notification::JobChanged {
                    user_id: user.clone(),
                    from,
                    to: to.clone(),
                });
            }
            EventPayload::Exercise { .. } | EventPayload::Signal { .. } => {}
        }

        for (skill, xp) in event.payload.skill_grants() {
            let progress = agg.skills.entry(skill.to_string()).or_default();
            progress.xp = progress.xp.saturating_add(xp);
            progress.level = calc.skill_level(progress.xp);
        }

        let outcome = calc.apply(agg.total_xp, event.payload.total_xp());
        agg.total_xp = outcome.xp_after;
        agg.level = outcome.level_after;
        agg.job_change_eligible = calc.job_change_gates_reached(agg.level) > agg.job_changes;
        if outcome.leveled_up() {
            notes.push(Notification::LevelUp {
                user_id: user.clone(),
                from: outcome.level_before,
                to: outcome.level_after,
                sequence: event.sequence,
            });
        }
        if outcome.job_change_unlocked {
            notes.push(Notification::JobChangeUnlocked {
                user_id: user.clone(),
                level: agg.level,
            });
        }

        let engine = RuleEngine::new(&self.cfg.badges, &self.cfg.hidden_skills);
        let unlocked: Vec<String> = {
            let ctx = EvalContext {
                aggregate: agg,
                calc,
            };
            engine
                .due_hidden_skills(&ctx)
                .into_iter()
                .map(str::to_string)
                .collect()
        };
        for skill in unlocked {
            tracing::info!(user = %user, skill = %skill, "hidden skill unlocked");
            agg.hidden_skills.insert(skill.clone(), event.sequence);
            notes.push(Notification::HiddenSkillUnlocked {
                user_id: user.clone(),
                skill,
            });
        }

        agg.last_sequence = event.sequence;
        notes
    }

    /// Full fold of an ordered event stream from an empty aggregate.
    pub fn fold<'e>(
        &self,
        user_id: &str,
        events: impl IntoIterator<Item = &'e ProgressionEvent>,
    ) -> PlayerAggregate {
        let mut agg = self.empty(user_id);
        for event in events {
            self.apply(&mut agg, event);
        }
        agg
    }

    // -----------------------------------------------------------------------
    // Read view
    // -----------------------------------------------------------------------

    pub fn snapshot(&self, agg: &PlayerAggregate) -> PlayerStatusSnapshot {
        let calc = LevelingCalculator::new(&self.cfg.leveling);

        let mut stats: BTreeMap<String, u32> = [
            Stat::Coding,
            Stat::Debugging,
            Stat::Design,
            Stat::Communication,
        ]
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
        for (skill, progress) in &agg.skills {
            *stats
                .entry(self.cfg.stat_for(skill).as_str().to_string())
                .or_default() += progress.level;
        }

        let job = self.cfg.jobs.get(&agg.job);
        let mut equipped: Vec<EquippedSkill> = match job {
            Some(j) if !j.skills.is_empty() => j
                .skills
                .iter()
                .filter(|gate| gate.min_level <= agg.level)
                .map(|gate| {
                    let xp = agg.skill_xp(&gate.skill);
                    EquippedSkill {
                        skill: gate.skill.clone(),
                        xp,
                        level: calc.skill_level(xp),
                        hidden: false,
                    }
                })
                .collect(),
            _ => agg
                .skills
                .iter()
                .filter(|(_, p)| p.xp > 0)
                .map(|(skill, p)| EquippedSkill {
                    skill: skill.clone(),
                    xp: p.xp,
                    level: p.level,
                    hidden: false,
                })
                .collect(),
        };
        for skill in agg.hidden_skills.keys() {
            if equipped.iter().any(|e| &e.skill == skill) {
                continue;
            }
            let xp = agg.skill_xp(skill);
            equipped.push(EquippedSkill {
                skill: skill.clone(),
                xp,
                level: calc.skill_level(xp),
                hidden: true,
            });
        }

        PlayerStatusSnapshot {
            user_id: agg.user_id.clone(),
            job: agg.job.clone(),
            job_title: job.map(|j| j.title.clone()),
            level: agg.level,
            xp: agg.total_xp,
            next_level_xp: calc.next_threshold(agg.total_xp),
            hp: calc.hp(agg.level),
            mp: calc.mp(agg.level),
            stat_points: calc.stat_points(agg.level),
            stats,
            equipped_skills: equipped,
            badges: agg.badges.keys().cloned().collect(),
            hidden_skills: agg.hidden_skills.keys().cloned().collect(),
            skip_test: agg.skip_test.iter().cloned().collect(),
            job_change_eligible: agg.job_change_eligible,
            last_sequence: agg.last_sequence,
        }
    }
}

// ---------------------------------------------------------------------------
// PlayerStatusSnapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquippedSkill {
    pub skill: String,
    pub xp: u64,
    pub level: u32,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStatusSnapshot {
    pub user_id: String,
    pub job: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_title: Option<String>,
    pub level: u32,
    pub xp: u64,
    /// Cumulative XP for the next level; absent at the top of the table.
    pub next_level_xp: Option<u64>,
    pub hp: u32,
    pub mp: u32,
    pub stat_points: u32,
    pub stats: BTreeMap<String, u32>,
    pub equipped_skills: Vec<EquippedSkill>,
    pub badges: Vec<String>,
    pub hidden_skills: Vec<String>,
    pub skip_test: Vec<String>,
    pub job_change_eligible: bool,
    pub last_sequence: u64,
}

// ---------------------------------------------------------------------------
// Cache persistence
// ---------------------------------------------------------------------------

pub(crate) fn load_in<T>(table: &T, user_id: &str) -> Result<Option<PlayerAggregate>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    get_json(table, user_id)
}

pub(crate) fn save_in(txn: &WriteTransaction, agg: &PlayerAggregate) -> Result<()> {
    let value = to_json(agg)?;
    let mut table = txn.open_table(PROJECTIONS).map_err(db_err)?;
    table
        .insert(agg.user_id.as_str(), value.as_slice())
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
