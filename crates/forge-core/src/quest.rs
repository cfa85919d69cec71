use crate::error::{db_err, ForgeError, Result};
use crate::projection::PlayerAggregate;
use crate::store::{from_json, owned_json, to_json, QUEST_INSTANCES};
use crate::types::{QuestCategory, QuestState};
use chrono::{DateTime, NaiveDate, Utc};
use redb::{ReadableTable, Table, WriteTransaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// QuestTemplate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestTemplate {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub category: QuestCategory,
    #[serde(default)]
    pub xp: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub skill_xp: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Main-quest story gate: this quest must have been claimed first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
}

fn default_min_level() -> u32 {
    1
}

impl QuestTemplate {
    pub fn total_xp(&self) -> u64 {
        self.skill_xp
            .values()
            .fold(self.xp, |acc, &xp| acc.saturating_add(xp))
    }

    /// Instance id for this template on `day`. Daily quests get one instance
    /// per UTC day; main and side quests exist at most once per player.
    pub fn instance_id(&self, day: NaiveDate) -> String {
        match self.category {
            QuestCategory::Daily => format!("daily:{}:{}", self.slug, day.format("%Y-%m-%d")),
            QuestCategory::Main => format!("main:{}", self.slug),
            QuestCategory::Side => format!("side:{}", self.slug),
        }
    }

    /// Whether the offering policy lets `agg` see this quest at all.
    pub fn available_to(&self, agg: &PlayerAggregate) -> bool {
        if agg.level < self.min_level {
            return false;
        }
        match (&self.category, &self.requires) {
            (QuestCategory::Main, Some(req)) => agg.has_claimed(req),
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// QuestInstance
// ---------------------------------------------------------------------------

/// Result of the XP-granting claim, kept on the instance so a repeated claim
/// can return it unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    /// Key the caller supplied with the claim.
    pub idempotency_key: String,
    pub sequence: u64,
    pub xp: u64,
    pub level_after: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestInstance {
    pub id: String,
    pub user_id: String,
    pub quest: String,
    pub category: QuestCategory,
    pub state: QuestState,
    pub offered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim: Option<ClaimReceipt>,
}

impl QuestInstance {
    pub fn offer(template: &QuestTemplate, user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: template.instance_id(now.date_naive()),
            user_id: user_id.to_string(),
            quest: template.slug.clone(),
            category: template.category,
            state: QuestState::Offered,
            offered_at: now,
            started_at: None,
            completed_at: None,
            claimed_at: None,
            claim: None,
        }
    }

    /// Move exactly one step forward to `to`.
    pub fn advance(&mut self, to: QuestState, at: DateTime<Utc>) -> Result<()> {
        if self.state.next() != Some(to) {
            return Err(ForgeError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
                reason: format!("quest instance '{}' only moves one step forward", self.id),
            });
        }
        self.state = to;
        match to {
            QuestState::InProgress => self.started_at = Some(at),
            QuestState::Completed => self.completed_at = Some(at),
            QuestState::Claimed => self.claimed_at = Some(at),
            QuestState::Offered => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub(crate) fn get_in<T>(table: &T, user_id: &str, id: &str) -> Result<Option<QuestInstance>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    match table.get((user_id, id)).map_err(db_err)? {
        Some(v) => Ok(Some(from_json(v.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn list_in<T>(table: &T, user_id: &str) -> Result<Vec<QuestInstance>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    owned_json(table, user_id)
}

pub(crate) fn put(
    table: &mut Table<'_, (&'static str, &'static str), &'static [u8]>,
    instance: &QuestInstance,
) -> Result<()> {
    let value = to_json(instance)?;
    table
        .insert(
            (instance.user_id.as_str(), instance.id.as_str()),
            value.as_slice(),
        )
        .map_err(db_err)?;
    Ok(())
}

pub(crate) fn save_in(txn: &WriteTransaction, instance: &QuestInstance) -> Result<()> {
    let mut table = txn.open_table(QUEST_INSTANCES).map_err(db_err)?;
    put(&mut table, instance)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template(slug: &str, category: QuestCategory) -> QuestTemplate {
        QuestTemplate {
            slug: slug.into(),
            title: slug.into(),
            description: None,
            category,
            xp: 100,
            skill_xp: BTreeMap::from([("rust".to_string(), 50)]),
            tags: Vec::new(),
            requires: None,
            min_level: 1,
        }
    }

    #[test]
    fn instance_ids_follow_category_cadence() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(
            template("standup", QuestCategory::Daily).instance_id(day),
            "daily:standup:2026-03-09"
        );
        assert_eq!(template("arc-1", QuestCategory::Main).instance_id(day), "main:arc-1");
        assert_eq!(template("tidy", QuestCategory::Side).instance_id(day), "side:tidy");
    }

    #[test]
    fn main_quests_are_story_gated() {
        let mut chapter2 = template("chapter-2", QuestCategory::Main);
        chapter2.requires = Some("chapter-1".into());
        let mut agg = PlayerAggregate::new("octocat", "apprentice");
        assert!(!chapter2.available_to(&agg));
        agg.claimed_quests.insert("chapter-1".into(), 1);
        assert!(chapter2.available_to(&agg));
    }

    #[test]
    fn min_level_gates_every_category() {
        let mut side = template("raid", QuestCategory::Side);
        side.min_level = 10;
        let mut agg = PlayerAggregate::new("octocat", "apprentice");
        assert!(!side.available_to(&agg));
        agg.level = 10;
        assert!(side.available_to(&agg));
    }

    #[test]
    fn transitions_only_move_one_step_forward() {
        let now = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        let mut inst = QuestInstance::offer(&template("tidy", QuestCategory::Side), "octocat", now);
        assert_eq!(inst.state, QuestState::Offered);

        let err = inst.advance(QuestState::Completed, now).unwrap_err();
        assert!(matches!(err, ForgeError::InvalidTransition { .. }));

        inst.advance(QuestState::InProgress, now).unwrap();
        inst.advance(QuestState::Completed, now).unwrap();
        assert!(inst.advance(QuestState::InProgress, now).is_err());
        inst.advance(QuestState::Claimed, now).unwrap();
        assert_eq!(inst.claimed_at, Some(now));
        assert!(inst.advance(QuestState::Claimed, now).is_err());
    }

    #[test]
    fn total_xp_includes_skill_grants() {
        assert_eq!(template("tidy", QuestCategory::Side).total_xp(), 150);
    }
}
