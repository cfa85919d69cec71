use crate::error::{ForgeError, Result};
use crate::leveling::LevelTable;
use crate::paths;
use crate::quest::QuestTemplate;
use crate::rules::{BadgeDefinition, HiddenSkillRule};
use crate::types::{QuestCategory, Stat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// LevelingConfig
// ---------------------------------------------------------------------------

/// Cosmetic stamina stat: `base + per_level * (level - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatCurve {
    pub base: u32,
    pub per_level: u32,
}

impl StatCurve {
    pub fn at(&self, level: u32) -> u32 {
        self.base + self.per_level * level.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelingConfig {
    #[serde(default = "default_thresholds")]
    pub thresholds: LevelTable,
    #[serde(default = "default_skill_thresholds")]
    pub skill_thresholds: LevelTable,
    #[serde(default = "default_job_change_levels")]
    pub job_change_levels: Vec<u32>,
    #[serde(default = "default_stat_points")]
    pub stat_points_per_level: u32,
    #[serde(default = "default_hp")]
    pub hp: StatCurve,
    #[serde(default = "default_mp")]
    pub mp: StatCurve,
    #[serde(default = "default_max_xp_per_event")]
    pub max_xp_per_event: u64,
}

// Starter values written by `forge init`; deployments are expected to replace them.
fn default_thresholds() -> LevelTable {
    LevelTable::linear(1_000, 50)
}

fn default_skill_thresholds() -> LevelTable {
    LevelTable::linear(500, 20)
}

fn default_job_change_levels() -> Vec<u32> {
    vec![30]
}

fn default_stat_points() -> u32 {
    3
}

fn default_hp() -> StatCurve {
    StatCurve {
        base: 100,
        per_level: 10,
    }
}

fn default_mp() -> StatCurve {
    StatCurve {
        base: 50,
        per_level: 5,
    }
}

fn default_max_xp_per_event() -> u64 {
    100_000
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            skill_thresholds: default_skill_thresholds(),
            job_change_levels: default_job_change_levels(),
            stat_points_per_level: default_stat_points(),
            hp: default_hp(),
            mp: default_mp(),
            max_xp_per_event: default_max_xp_per_event(),
        }
    }
}

// ---------------------------------------------------------------------------
// JobsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillGate {
    pub skill: String,
    #[serde(default = "default_min_level")]
    pub min_level: u32,
}

fn default_min_level() -> u32 {
    1
}

/// A job class and its skill tree. An empty tree equips every skill the
/// player has progress in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub skills: Vec<SkillGate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_job")]
    pub default: String,
    #[serde(default = "default_job_classes")]
    pub classes: Vec<JobDefinition>,
}

fn default_job() -> String {
    "apprentice".to_string()
}

fn default_job_classes() -> Vec<JobDefinition> {
    vec![JobDefinition {
        slug: default_job(),
        title: "Apprentice".to_string(),
        skills: Vec::new(),
    }]
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default: default_job(),
            classes: default_job_classes(),
        }
    }
}

impl JobsConfig {
    pub fn get(&self, slug: &str) -> Option<&JobDefinition> {
        self.classes.iter().find(|j| j.slug == slug)
    }
}

// ---------------------------------------------------------------------------
// AssessmentConfig
// ---------------------------------------------------------------------------

/// XP credited per unit of each profile counter before language distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentWeights {
    #[serde(default = "default_w_commit")]
    pub commit: f64,
    #[serde(default = "default_w_pr")]
    pub pull_request: f64,
    #[serde(default = "default_w_review")]
    pub review: f64,
    #[serde(default = "default_w_star")]
    pub star: f64,
    #[serde(default = "default_w_fork")]
    pub fork: f64,
    #[serde(default = "default_w_issue")]
    pub resolved_issue: f64,
}

fn default_w_commit() -> f64 {
    10.0
}
fn default_w_pr() -> f64 {
    40.0
}
fn default_w_review() -> f64 {
    25.0
}
fn default_w_star() -> f64 {
    5.0
}
fn default_w_fork() -> f64 {
    8.0
}
fn default_w_issue() -> f64 {
    30.0
}

impl Default for AssessmentWeights {
    fn default() -> Self {
        Self {
            commit: default_w_commit(),
            pull_request: default_w_pr(),
            review: default_w_review(),
            star: default_w_star(),
            fork: default_w_fork(),
            resolved_issue: default_w_issue(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentConfig {
    /// Multiplier applied to the raw estimate so players start slightly below it.
    #[serde(default = "default_discount")]
    pub discount: f64,
    #[serde(default)]
    pub weights: AssessmentWeights,
    /// Language sample count at which confidence reaches 1.0.
    #[serde(default = "default_confidence_sample")]
    pub confidence_sample: u64,
    #[serde(default = "default_skip_test_confidence")]
    pub skip_test_confidence: f64,
    /// Languages below this share of the histogram are ignored.
    #[serde(default = "default_min_share")]
    pub min_language_share: f64,
    /// Upper bound on any single skill's estimate, so an outsized profile
    /// cannot place a player beyond what one event may grant.
    #[serde(default = "default_max_skill_estimate")]
    pub max_skill_estimate: u64,
}

fn default_discount() -> f64 {
    0.8
}
fn default_confidence_sample() -> u64 {
    50
}
fn default_skip_test_confidence() -> f64 {
    0.8
}
fn default_min_share() -> f64 {
    0.05
}
fn default_max_skill_estimate() -> u64 {
    default_max_xp_per_event()
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            discount: default_discount(),
            weights: AssessmentWeights::default(),
            confidence_sample: default_confidence_sample(),
            skip_test_confidence: default_skip_test_confidence(),
            min_language_share: default_min_share(),
            max_skill_estimate: default_max_skill_estimate(),
        }
    }
}

// ---------------------------------------------------------------------------
// VotingConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Net counted votes (up - down) at which a proposal is adopted.
    #[serde(default = "default_adopt_net")]
    pub adopt_net_votes: i64,
    /// Net counted votes at or below which a proposal is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject_net_votes: Option<i64>,
    /// Minimum voter level for a vote to count toward the tally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation_floor: Option<u32>,
}

fn default_adopt_net() -> i64 {
    10
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self {
            adopt_net_votes: default_adopt_net(),
            reject_net_votes: None,
            reputation_floor: None,
        }
    }
}

// ---------------------------------------------------------------------------
// RetryConfig
// ---------------------------------------------------------------------------

/// Retry policy for assessment jobs against the profile source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    30_000
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff_ms`
    /// and capped at `max_backoff_ms`. `attempt` is 1-indexed.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(1u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub leveling: LevelingConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stat_affinity: BTreeMap<String, Stat>,
    #[serde(default)]
    pub assessment: AssessmentConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quests: Vec<QuestTemplate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub badges: Vec<BadgeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hidden_skills: Vec<HiddenSkillRule>,
    #[serde(default)]
    pub voting: VotingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                name: project_name.into(),
                description: None,
            },
            leveling: LevelingConfig::default(),
            jobs: JobsConfig::default(),
            stat_affinity: BTreeMap::new(),
            assessment: AssessmentConfig::default(),
            quests: Vec::new(),
            badges: Vec::new(),
            hidden_skills: Vec::new(),
            voting: VotingConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    pub fn quest(&self, slug: &str) -> Option<&QuestTemplate> {
        self.quests.iter().find(|q| q.slug == slug)
    }

    pub fn stat_for(&self, skill: &str) -> Stat {
        self.stat_affinity
            .get(skill)
            .copied()
            .unwrap_or(Stat::Coding)
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ForgeError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    /// Fail with [`ForgeError::InvalidConfig`] if any error-level warning exists.
    pub fn ensure_valid(&self) -> Result<()> {
        let errors: Vec<String> = self
            .validate()
            .into_iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message)
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ForgeError::InvalidConfig(errors.join("; ")))
        }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message });
        };

        // 1. Step tables must be monotonic
        if let Some(problem) = self.leveling.thresholds.check() {
            push(WarnLevel::Error, format!("leveling.thresholds: {problem}"));
        }
        if let Some(problem) = self.leveling.skill_thresholds.check() {
            push(WarnLevel::Error, format!("leveling.skill_thresholds: {problem}"));
        }
        let max_level = self.leveling.thresholds.max_level();
        for &gate in &self.leveling.job_change_levels {
            if gate > max_level {
                push(
                    WarnLevel::Warning,
                    format!("job change level {gate} is above the table's max level {max_level}"),
                );
            }
        }

        // 2. Jobs
        let mut job_slugs = HashSet::new();
        for job in &self.jobs.classes {
            if !job_slugs.insert(job.slug.as_str()) {
                push(WarnLevel::Error, format!("duplicate job class '{}'", job.slug));
            }
        }
        if self.jobs.get(&self.jobs.default).is_none() {
            push(
                WarnLevel::Error,
                format!("default job '{}' is not a defined job class", self.jobs.default),
            );
        }

        // 3. Assessment
        let a = &self.assessment;
        if !(a.discount > 0.0 && a.discount <= 1.0) {
            push(
                WarnLevel::Error,
                format!("assessment.discount must be in (0, 1], got {}", a.discount),
            );
        }
        if !(0.0..=1.0).contains(&a.skip_test_confidence) {
            push(
                WarnLevel::Error,
                format!(
                    "assessment.skip_test_confidence must be in [0, 1], got {}",
                    a.skip_test_confidence
                ),
            );
        }
        if a.confidence_sample == 0 {
            push(
                WarnLevel::Error,
                "assessment.confidence_sample must be positive".to_string(),
            );
        }

        // 4. Quests
        let mut quest_slugs = HashSet::new();
        for q in &self.quests {
            if !quest_slugs.insert(q.slug.as_str()) {
                push(WarnLevel::Error, format!("duplicate quest '{}'", q.slug));
            }
        }
        for q in &self.quests {
            if let Some(req) = &q.requires {
                if !quest_slugs.contains(req.as_str()) {
                    push(
                        WarnLevel::Error,
                        format!("quest '{}' requires unknown quest '{req}'", q.slug),
                    );
                }
                if q.category != QuestCategory::Main {
                    push(
                        WarnLevel::Warning,
                        format!(
                            "quest '{}' is {} but declares 'requires' (story gating applies to main quests)",
                            q.slug, q.category
                        ),
                    );
                }
            }
            if q.total_xp() > self.leveling.max_xp_per_event {
                push(
                    WarnLevel::Warning,
                    format!(
                        "quest '{}' grants {} XP, above max_xp_per_event={}",
                        q.slug,
                        q.total_xp(),
                        self.leveling.max_xp_per_event
                    ),
                );
            }
        }

        // 5. Rule tables
        let mut badge_slugs = HashSet::new();
        for b in &self.badges {
            if !badge_slugs.insert(b.slug.as_str()) {
                push(WarnLevel::Error, format!("duplicate badge '{}'", b.slug));
            }
        }
        let mut hidden = HashSet::new();
        for h in &self.hidden_skills {
            if !hidden.insert(h.skill.as_str()) {
                push(WarnLevel::Error, format!("duplicate hidden skill rule '{}'", h.skill));
            }
        }

        // 6. Voting: a tie (net 0) must never adopt
        if self.voting.adopt_net_votes <= 0 {
            push(
                WarnLevel::Error,
                format!(
                    "voting.adopt_net_votes must be positive, got {}",
                    self.voting.adopt_net_votes
                ),
            );
        }
        if let Some(r) = self.voting.reject_net_votes {
            if r >= 0 {
                push(
                    WarnLevel::Error,
                    format!("voting.reject_net_votes must be negative, got {r}"),
                );
            }
        }

        // 7. Retry
        if self.retry.max_attempts == 0 {
            push(WarnLevel::Error, "retry.max_attempts must be at least 1".to_string());
        }

        // 8. Affinity keys should name skills
        for skill in self.stat_affinity.keys() {
            if paths::validate_slug(skill).is_err() {
                push(
                    WarnLevel::Warning,
                    format!("stat_affinity key '{skill}' is not a valid skill slug"),
                );
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Predicate;

    #[test]
    fn default_config_roundtrip_is_valid() {
        let cfg = Config::new("guild");
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.project.name, "guild");
        assert_eq!(parsed.leveling.thresholds, cfg.leveling.thresholds);
        assert!(parsed.validate().is_empty());
    }

    #[test]
    fn minimal_yaml_fills_defaults() {
        let yaml = "version: 1\nproject:\n  name: guild\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.jobs.default, "apprentice");
        assert!(cfg.quests.is_empty());
        assert_eq!(cfg.retry.max_attempts, 4);

        let out = serde_yaml::to_string(&cfg).unwrap();
        assert!(!out.contains("badges"));
        assert!(!out.contains("reputation_floor"));
    }

    #[test]
    fn custom_tables_and_rules_parse() {
        let yaml = r#"
version: 1
project:
  name: guild
leveling:
  thresholds: [0, 100, 250, 500]
  job_change_levels: [3]
jobs:
  default: backend
  classes:
    - slug: backend
      title: Backend Engineer
      skills:
        - skill: rust
        - skill: sql
          min_level: 3
quests:
  - slug: fix-null-deref
    title: Fix a null dereference
    category: side
    xp: 300
    tags: ["bug-class:null"]
badges:
  - slug: first-steps
    title: First Steps
    xp_reward: 50
    predicate:
      type: event_count_at_least
      source: quest_completion
      count: 1
voting:
  adopt_net_votes: 3
  reputation_floor: 5
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.leveling.thresholds.level_for(260), 3);
        assert_eq!(cfg.jobs.get("backend").unwrap().skills[1].min_level, 3);
        assert_eq!(cfg.quest("fix-null-deref").unwrap().category, QuestCategory::Side);
        assert!(matches!(
            cfg.badges[0].predicate,
            Predicate::EventCountAtLeast { count: 1, .. }
        ));
        assert_eq!(cfg.voting.reputation_floor, Some(5));
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
    }

    #[test]
    fn validate_rejects_non_monotonic_table() {
        let mut cfg = Config::new("guild");
        cfg.leveling.thresholds = LevelTable::new(vec![0, 100, 90]);
        let warnings = cfg.validate();
        assert!(warnings
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("leveling.thresholds")));
        assert!(matches!(cfg.ensure_valid(), Err(ForgeError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_unknown_default_job() {
        let mut cfg = Config::new("guild");
        cfg.jobs.default = "wizard".to_string();
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("default job 'wizard'")));
    }

    #[test]
    fn validate_rejects_tie_adoption_threshold() {
        let mut cfg = Config::new("guild");
        cfg.voting.adopt_net_votes = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.level == WarnLevel::Error && w.message.contains("adopt_net_votes")));
    }

    #[test]
    fn validate_flags_discount_out_of_range() {
        let mut cfg = Config::new("guild");
        cfg.assessment.discount = 1.5;
        assert!(cfg
            .validate()
            .iter()
            .any(|w| w.message.contains("assessment.discount")));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 350,
            timeout_secs: 1,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(100));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(200));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(350));
        assert_eq!(retry.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn stat_curve_grows_per_level() {
        let curve = StatCurve {
            base: 100,
            per_level: 10,
        };
        assert_eq!(curve.at(1), 100);
        assert_eq!(curve.at(25), 340);
    }
}
