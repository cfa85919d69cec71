//! XP → level mapping.
//!
//! A [`LevelTable`] is a step function defined entirely by configuration:
//! entry `i` is the cumulative XP needed to reach level `i + 1`. The first
//! entry must be `0` and entries must strictly increase, which makes
//! `level_for` monotonic non-decreasing by construction.

use crate::config::LevelingConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// LevelTable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LevelTable(Vec<u64>);

impl LevelTable {
    pub fn new(thresholds: Vec<u64>) -> Self {
        Self(thresholds)
    }

    /// `max_level` levels spaced `step` XP apart.
    pub fn linear(step: u64, max_level: u32) -> Self {
        Self((0..max_level as u64).map(|i| i * step).collect())
    }

    pub fn thresholds(&self) -> &[u64] {
        &self.0
    }

    /// Returns a description of the first structural problem, if any.
    pub fn check(&self) -> Option<String> {
        match self.0.first() {
            None => return Some("table is empty".to_string()),
            Some(&first) if first != 0 => {
                return Some(format!("first threshold must be 0, got {first}"))
            }
            _ => {}
        }
        self.0.windows(2).enumerate().find_map(|(i, w)| {
            (w[1] <= w[0]).then(|| {
                format!(
                    "threshold for level {} ({}) must exceed level {} ({})",
                    i + 2,
                    w[1],
                    i + 1,
                    w[0]
                )
            })
        })
    }

    pub fn max_level(&self) -> u32 {
        self.0.len().max(1) as u32
    }

    pub fn level_for(&self, xp: u64) -> u32 {
        (self.0.partition_point(|&t| t <= xp) as u32).max(1)
    }

    /// Cumulative XP needed to reach `level`, or `None` past the end of the table.
    pub fn threshold_for(&self, level: u32) -> Option<u64> {
        if level == 0 {
            return None;
        }
        self.0.get(level as usize - 1).copied()
    }

    /// Threshold of the level after the one `xp` maps to.
    pub fn next_threshold(&self, xp: u64) -> Option<u64> {
        self.threshold_for(self.level_for(xp) + 1)
    }
}

// ---------------------------------------------------------------------------
// LevelOutcome
// ---------------------------------------------------------------------------

/// Result of applying an XP delta to a running total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelOutcome {
    pub xp_before: u64,
    pub xp_after: u64,
    pub level_before: u32,
    pub level_after: u32,
    /// Levels newly reached, ascending.
    pub crossed: Vec<u32>,
    pub next_threshold: Option<u64>,
    /// True when a configured job-change level lies in `crossed`.
    pub job_change_unlocked: bool,
    pub stat_points_gained: u32,
}

impl LevelOutcome {
    pub fn leveled_up(&self) -> bool {
        self.level_after > self.level_before
    }
}

// ---------------------------------------------------------------------------
// LevelingCalculator
// ---------------------------------------------------------------------------

/// Pure leveling rules over a [`LevelingConfig`].
#[derive(Debug, Clone, Copy)]
pub struct LevelingCalculator<'a> {
    cfg: &'a LevelingConfig,
}

impl<'a> LevelingCalculator<'a> {
    pub fn new(cfg: &'a LevelingConfig) -> Self {
        Self { cfg }
    }

    pub fn level(&self, xp: u64) -> u32 {
        self.cfg.thresholds.level_for(xp)
    }

    pub fn skill_level(&self, skill_xp: u64) -> u32 {
        self.cfg.skill_thresholds.level_for(skill_xp)
    }

    pub fn next_threshold(&self, xp: u64) -> Option<u64> {
        self.cfg.thresholds.next_threshold(xp)
    }

    pub fn job_change_eligible(&self, level: u32) -> bool {
        self.job_change_gates_reached(level) > 0
    }

    /// Distinct job-change levels at or below `level`. Each one reached
    /// entitles the player to one job change.
    pub fn job_change_gates_reached(&self, level: u32) -> u32 {
        let gates: BTreeSet<u32> = self
            .cfg
            .job_change_levels
            .iter()
            .copied()
            .filter(|&gate| level >= gate)
            .collect();
        gates.len() as u32
    }

    pub fn stat_points(&self, level: u32) -> u32 {
        level.saturating_sub(1) * self.cfg.stat_points_per_level
    }

    pub fn hp(&self, level: u32) -> u32 {
        self.cfg.hp.at(level)
    }

    pub fn mp(&self, level: u32) -> u32 {
        self.cfg.mp.at(level)
    }

    pub fn apply(&self, xp_before: u64, delta: u64) -> LevelOutcome {
        let xp_after = xp_before.saturating_add(delta);
        let level_before = self.level(xp_before);
        let level_after = self.level(xp_after);
        let crossed: Vec<u32> = (level_before + 1..=level_after).collect();
        let job_change_unlocked =
            self.job_change_gates_reached(level_after) > self.job_change_gates_reached(level_before);
        LevelOutcome {
            xp_before,
            xp_after,
            level_before,
            level_after,
            next_threshold: self.next_threshold(xp_after),
            job_change_unlocked,
            stat_points_gained: self.stat_points(level_after) - self.stat_points(level_before),
            crossed,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
