use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// EventSource
// ---------------------------------------------------------------------------

/// Where a progression event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    GithubAnalysis,
    QuestCompletion,
    ManualExercise,
    BadgeTrigger,
    JobChange,
}

impl EventSource {
    pub fn all() -> &'static [EventSource] {
        &[
            EventSource::GithubAnalysis,
            EventSource::QuestCompletion,
            EventSource::ManualExercise,
            EventSource::BadgeTrigger,
            EventSource::JobChange,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventSource::GithubAnalysis => "github_analysis",
            EventSource::QuestCompletion => "quest_completion",
            EventSource::ManualExercise => "manual_exercise",
            EventSource::BadgeTrigger => "badge_trigger",
            EventSource::JobChange => "job_change",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventSource {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventSource::all()
            .iter()
            .copied()
            .find(|src| src.as_str() == s)
            .ok_or_else(|| ForgeError::Validation(format!("unknown event source '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// QuestCategory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestCategory {
    Daily,
    Main,
    Side,
}

impl QuestCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            QuestCategory::Daily => "daily",
            QuestCategory::Main => "main",
            QuestCategory::Side => "side",
        }
    }
}

impl fmt::Display for QuestCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// QuestState
// ---------------------------------------------------------------------------

/// Quest instance lifecycle. Transitions only move one step forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestState {
    Offered,
    InProgress,
    Completed,
    Claimed,
}

impl QuestState {
    pub fn all() -> &'static [QuestState] {
        &[
            QuestState::Offered,
            QuestState::InProgress,
            QuestState::Completed,
            QuestState::Claimed,
        ]
    }

    pub fn next(self) -> Option<QuestState> {
        QuestState::all().get(self as usize + 1).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QuestState::Offered => "offered",
            QuestState::InProgress => "in_progress",
            QuestState::Completed => "completed",
            QuestState::Claimed => "claimed",
        }
    }
}

impl fmt::Display for QuestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for QuestState {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.replace('-', "_");
        QuestState::all()
            .iter()
            .copied()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ForgeError::Validation(format!("unknown quest state '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Stat
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Coding,
    Debugging,
    Design,
    Communication,
}

impl Stat {
    pub fn as_str(self) -> &'static str {
        match self {
            Stat::Coding => "coding",
            Stat::Debugging => "debugging",
            Stat::Design => "design",
            Stat::Communication => "communication",
        }
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// VoteDirection / ProposalDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteDirection {
    Up,
    Down,
}

impl VoteDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteDirection::Up => "up",
            VoteDirection::Down => "down",
        }
    }
}

impl fmt::Display for VoteDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VoteDirection {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" | "yes" | "+1" => Ok(VoteDirection::Up),
            "down" | "no" | "-1" => Ok(VoteDirection::Down),
            _ => Err(ForgeError::Validation(format!("unknown vote direction '{s}'"))),
        }
    }
}

/// Proposal decision. `Pending` moves to exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalDecision {
    Pending,
    Adopted,
    Rejected,
}

impl ProposalDecision {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalDecision::Pending)
    }
}

impl fmt::Display for ProposalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProposalDecision::Pending => "pending",
            ProposalDecision::Adopted => "adopted",
            ProposalDecision::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_source_parses_wire_names() {
        for &src in EventSource::all() {
            let parsed: EventSource = src.as_str().parse().unwrap();
            assert_eq!(parsed, src);
        }
        assert!("webhook".parse::<EventSource>().is_err());
    }

    #[test]
    fn quest_state_only_moves_forward() {
        assert_eq!(QuestState::Offered.next(), Some(QuestState::InProgress));
        assert_eq!(QuestState::InProgress.next(), Some(QuestState::Completed));
        assert_eq!(QuestState::Completed.next(), Some(QuestState::Claimed));
        assert_eq!(QuestState::Claimed.next(), None);
    }

    #[test]
    fn quest_state_parses_either_separator() {
        assert_eq!("in-progress".parse::<QuestState>().unwrap(), QuestState::InProgress);
        assert_eq!("claimed".parse::<QuestState>().unwrap(), QuestState::Claimed);
        assert!("done".parse::<QuestState>().is_err());
    }

    #[test]
    fn quest_state_serializes_snake_case() {
        let json = serde_json::to_string(&QuestState::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn vote_direction_accepts_yes_no() {
        assert_eq!("yes".parse::<VoteDirection>().unwrap(), VoteDirection::Up);
        assert_eq!("no".parse::<VoteDirection>().unwrap(), VoteDirection::Down);
        assert!("maybe".parse::<VoteDirection>().is_err());
    }

    #[test]
    fn only_pending_is_open() {
        assert!(!ProposalDecision::Pending.is_terminal());
        assert!(ProposalDecision::Adopted.is_terminal());
        assert!(ProposalDecision::Rejected.is_terminal());
    }
}
