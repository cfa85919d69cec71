//! Declarative unlock rules shared by badges and hidden skills.
//!
//! Every predicate is monotone over accumulated history: once true for a
//! prefix of a player's ledger it stays true for every longer prefix, and
//! it only reads order-independent facts (sums and counts). The set of
//! satisfied rules therefore depends on which events were applied, never on
//! the order they arrived in.

use crate::leveling::LevelingCalculator;
use crate::projection::PlayerAggregate;
use crate::types::{EventSource, QuestCategory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    TotalXpAtLeast {
        xp: u64,
    },
    LevelAtLeast {
        level: u32,
    },
    SkillXpAtLeast {
        skill: String,
        xp: u64,
    },
    SkillLevelAtLeast {
        skill: String,
        level: u32,
    },
    EventCountAtLeast {
        source: EventSource,
        count: u64,
    },
    QuestsClaimedAtLeast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        category: Option<QuestCategory>,
        count: u64,
    },
    /// Claimed quests carrying `tag`.
    TagCountAtLeast {
        tag: String,
        count: u64,
    },
    /// Distinct tags starting with `prefix` across claimed quests,
    /// e.g. `bug-class:` for "resolved N distinct bug-class quests".
    DistinctTagsAtLeast {
        prefix: String,
        count: u64,
    },
    BadgeCountAtLeast {
        count: u64,
    },
    All {
        of: Vec<Predicate>,
    },
    Any {
        of: Vec<Predicate>,
    },
}

impl Predicate {
    pub fn eval(&self, ctx: &EvalContext) -> bool {
        let agg = ctx.aggregate;
        match self {
            Predicate::TotalXpAtLeast { xp } => agg.total_xp >= *xp,
            Predicate::LevelAtLeast { level } => agg.level >= *level,
            Predicate::SkillXpAtLeast { skill, xp } => agg.skill_xp(skill) >= *xp,
            Predicate::SkillLevelAtLeast { skill, level } => {
                ctx.calc.skill_level(agg.skill_xp(skill)) >= *level
            }
            Predicate::EventCountAtLeast { source, count } => {
                agg.facts.events_from(*source) >= *count
            }
            Predicate::QuestsClaimedAtLeast { category, count } => {
                agg.facts.quests_claimed(*category) >= *count
            }
            Predicate::TagCountAtLeast { tag, count } => {
                agg.facts.tag_counts.get(tag).copied().unwrap_or(0) >= *count
            }
            Predicate::DistinctTagsAtLeast { prefix, count } => {
                agg.facts.distinct_tags(prefix) >= *count
            }
            Predicate::BadgeCountAtLeast { count } => agg.badges.len() as u64 >= *count,
            Predicate::All { of } => of.iter().all(|p| p.eval(ctx)),
            Predicate::Any { of } => of.iter().any(|p| p.eval(ctx)),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeDefinition {
    pub slug: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// XP granted with the award; zero for purely cosmetic badges.
    #[serde(default)]
    pub xp_reward: u64,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenSkillRule {
    pub skill: String,
    pub predicate: Predicate,
}

// ---------------------------------------------------------------------------
// HistoryFacts
// ---------------------------------------------------------------------------

/// Order-independent counters accumulated while folding the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryFacts {
    /// Accepted events per source (`EventSource::as_str`).
    #[serde(default)]
    pub event_counts: BTreeMap<String, u64>,
    /// Claimed quests per category.
    #[serde(default)]
    pub quests_claimed: BTreeMap<String, u64>,
    /// Claimed quests per tag.
    #[serde(default)]
    pub tag_counts: BTreeMap<String, u64>,
}

impl HistoryFacts {
    pub fn record_event(&mut self, source: EventSource) {
        *self.event_counts.entry(source.as_str().to_string()).or_default() += 1;
    }

    pub fn record_claim(&mut self, category: QuestCategory, tags: &[String]) {
        *self
            .quests_claimed
            .entry(category.as_str().to_string())
            .or_default() += 1;
        for tag in tags {
            *self.tag_counts.entry(tag.clone()).or_default() += 1;
        }
    }

    pub fn events_from(&self, source: EventSource) -> u64 {
        self.event_counts.get(source.as_str()).copied().unwrap_or(0)
    }

    pub fn quests_claimed(&self, category: Option<QuestCategory>) -> u64 {
        match category {
            Some(c) => self.quests_claimed.get(c.as_str()).copied().unwrap_or(0),
            None => self.quests_claimed.values().sum(),
        }
    }

    pub fn distinct_tags(&self, prefix: &str) -> u64 {
        self.tag_counts
            .keys()
            .filter(|t| t.starts_with(prefix))
            .count() as u64
    }
}

// ---------------------------------------------------------------------------
// EvalContext / RuleEngine
// ---------------------------------------------------------------------------

pub struct EvalContext<'a> {
    pub aggregate: &'a PlayerAggregate,
    pub calc: LevelingCalculator<'a>,
}

/// Evaluates the configured badge and hidden-skill tables against a
/// player's aggregate.
pub struct RuleEngine<'a> {
    badges: &'a [BadgeDefinition],
    hidden_skills: &'a [HiddenSkillRule],
}

impl<'a> RuleEngine<'a> {
    pub fn new(badges: &'a [BadgeDefinition], hidden_skills: &'a [HiddenSkillRule]) -> Self {
        Self {
            badges,
            hidden_skills,
        }
    }

    /// Badges whose predicate holds and that the player does not hold yet,
    /// in configuration order.
    pub fn due_badges(&self, ctx: &EvalContext) -> Vec<&'a BadgeDefinition> {
        self.badges
            .iter()
            .filter(|b| !ctx.aggregate.badges.contains_key(&b.slug))
            .filter(|b| b.predicate.eval(ctx))
            .collect()
    }

    /// Hidden skills whose predicate holds and that are not unlocked yet.
    pub fn due_hidden_skills(&self, ctx: &EvalContext) -> Vec<&'a str> {
        self.hidden_skills
            .iter()
            .filter(|h| !ctx.aggregate.hidden_skills.contains_key(&h.skill))
            .filter(|h| h.predicate.eval(ctx))
            .map(|h| h.skill.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LevelingConfig;
    use crate::projection::{BadgeAward, SkillProgress};

    fn aggregate() -> PlayerAggregate {
        let mut agg = PlayerAggregate::new("octocat", "apprentice");
        agg.total_xp = 1_200;
        agg.level = 3;
        agg.skills.insert(
            "rust".to_string(),
            SkillProgress { xp: 900, level: 2 },
        );
        agg.facts.record_event(EventSource::QuestCompletion);
        agg.facts.record_event(EventSource::QuestCompletion);
        agg.facts.record_claim(
            QuestCategory::Side,
            &["bug-class:null".to_string(), "backend".to_string()],
        );
        agg.facts
            .record_claim(QuestCategory::Daily, &["bug-class:race".to_string()]);
        agg
    }

    #[test]
    fn leaf_predicates() {
        let cfg = LevelingConfig::default();
        let agg = aggregate();
        let ctx = EvalContext {
            aggregate: &agg,
            calc: LevelingCalculator::new(&cfg),
        };
        assert!(Predicate::TotalXpAtLeast { xp: 1_200 }.eval(&ctx));
        assert!(!Predicate::TotalXpAtLeast { xp: 1_201 }.eval(&ctx));
        assert!(Predicate::LevelAtLeast { level: 3 }.eval(&ctx));
        assert!(Predicate::SkillXpAtLeast {
            skill: "rust".into(),
            xp: 900
        }
        .eval(&ctx));
        assert!(!Predicate::SkillXpAtLeast {
            skill: "go".into(),
            xp: 1
        }
        .eval(&ctx));
        assert!(Predicate::EventCountAtLeast {
            source: EventSource::QuestCompletion,
            count: 2
        }
        .eval(&ctx));
        assert!(Predicate::QuestsClaimedAtLeast {
            category: None,
            count: 2
        }
        .eval(&ctx));
        assert!(!Predicate::QuestsClaimedAtLeast {
            category: Some(QuestCategory::Main),
            count: 1
        }
        .eval(&ctx));
        assert!(Predicate::DistinctTagsAtLeast {
            prefix: "bug-class:".into(),
            count: 2
        }
        .eval(&ctx));
        assert!(Predicate::TagCountAtLeast {
            tag: "backend".into(),
            count: 1
        }
        .eval(&ctx));
    }

    #[test]
    fn combinators() {
        let cfg = LevelingConfig::default();
        let agg = aggregate();
        let ctx = EvalContext {
            aggregate: &agg,
            calc: LevelingCalculator::new(&cfg),
        };
        let yes = Predicate::LevelAtLeast { level: 1 };
        let no = Predicate::BadgeCountAtLeast { count: 1 };
        assert!(!Predicate::All {
            of: vec![yes.clone(), no.clone()]
        }
        .eval(&ctx));
        assert!(Predicate::Any { of: vec![yes, no] }.eval(&ctx));
        assert!(Predicate::All { of: vec![] }.eval(&ctx));
    }

    #[test]
    fn engine_skips_held_badges_and_unlocked_skills() {
        let cfg = LevelingConfig::default();
        let badges = vec![
            BadgeDefinition {
                slug: "first-quest".into(),
                title: "First Quest".into(),
                description: None,
                xp_reward: 10,
                predicate: Predicate::QuestsClaimedAtLeast {
                    category: None,
                    count: 1,
                },
            },
            BadgeDefinition {
                slug: "veteran".into(),
                title: "Veteran".into(),
                description: None,
                xp_reward: 0,
                predicate: Predicate::LevelAtLeast { level: 40 },
            },
        ];
        let hidden = vec![HiddenSkillRule {
            skill: "bug-whisperer".into(),
            predicate: Predicate::DistinctTagsAtLeast {
                prefix: "bug-class:".into(),
                count: 2,
            },
        }];
        let engine = RuleEngine::new(&badges, &hidden);

        let mut agg = aggregate();
        {
            let ctx = EvalContext {
                aggregate: &agg,
                calc: LevelingCalculator::new(&cfg),
            };
            let due: Vec<_> = engine.due_badges(&ctx).iter().map(|b| b.slug.clone()).collect();
            assert_eq!(due, vec!["first-quest"]);
            assert_eq!(engine.due_hidden_skills(&ctx), vec!["bug-whisperer"]);
        }

        agg.badges.insert(
            "first-quest".into(),
            BadgeAward {
                badge: "first-quest".into(),
                sequence: 7,
            },
        );
        agg.hidden_skills.insert("bug-whisperer".into(), 7);
        let ctx = EvalContext {
            aggregate: &agg,
            calc: LevelingCalculator::new(&cfg),
        };
        assert!(engine.due_badges(&ctx).is_empty());
        assert!(engine.due_hidden_skills(&ctx).is_empty());
    }

    #[test]
    fn predicate_yaml_shape() {
        let yaml = "type: all\nof:\n  - type: level_at_least\n    level: 5\n  - type: event_count_at_least\n    source: manual_exercise\n    count: 3\n";
        let p: Predicate = serde_yaml::from_str(yaml).unwrap();
        match p {
            Predicate::All { of } => {
                assert_eq!(of.len(), 2);
                assert_eq!(
                    of[1],
                    Predicate::EventCountAtLeast {
                        source: EventSource::ManualExercise,
                        count: 3
                    }
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
