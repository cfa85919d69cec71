use crate::config::VotingConfig;
use crate::error::{db_err, Result};
use crate::store::{all_json, from_json, get_json, owned_json, to_json, PROPOSALS, VOTES};
use crate::types::{ProposalDecision, VoteDirection};
use chrono::{DateTime, Utc};
use redb::{ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tally
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub up: u64,
    pub down: u64,
    /// Votes from voters at or above the reputation floor.
    pub counted_up: u64,
    pub counted_down: u64,
}

impl Tally {
    pub fn from_votes<'a>(votes: impl IntoIterator<Item = &'a Vote>) -> Self {
        let mut t = Tally::default();
        for v in votes {
            match v.direction {
                VoteDirection::Up => {
                    t.up += 1;
                    if v.counted {
                        t.counted_up += 1;
                    }
                }
                VoteDirection::Down => {
                    t.down += 1;
                    if v.counted {
                        t.counted_down += 1;
                    }
                }
            }
        }
        t
    }

    pub fn net(&self) -> i64 {
        self.counted_up as i64 - self.counted_down as i64
    }
}

/// Decision implied by `tally` under `cfg`. A net of zero never adopts.
pub fn decide(tally: &Tally, cfg: &VotingConfig) -> ProposalDecision {
    let net = tally.net();
    if net > 0 && net >= cfg.adopt_net_votes {
        ProposalDecision::Adopted
    } else if cfg.reject_net_votes.is_some_and(|r| net < 0 && net <= r) {
        ProposalDecision::Rejected
    } else {
        ProposalDecision::Pending
    }
}

/// Whether a voter with `reputation` counts toward the tally.
pub fn counts(reputation: u32, cfg: &VotingConfig) -> bool {
    cfg.reputation_floor.map_or(true, |floor| reputation >= floor)
}

// ---------------------------------------------------------------------------
// Proposal / Vote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoadmapProposal {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Job or skill roadmap the proposal extends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<String>,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub decision: ProposalDecision,
    #[serde(default)]
    pub tally: Tally,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl RoadmapProposal {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        author: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            roadmap: None,
            author: author.into(),
            created_at: now,
            decision: ProposalDecision::Pending,
            tally: Tally::default(),
            decided_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: String,
    pub user_id: String,
    pub direction: VoteDirection,
    /// Voter level when the vote was cast.
    pub reputation: u32,
    pub counted: bool,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResult {
    /// False when the user had already voted; `vote` is then the original.
    pub accepted: bool,
    pub vote: Vote,
    pub tally: Tally,
    pub decision: ProposalDecision,
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

pub(crate) fn get_proposal_in<T>(table: &T, id: &str) -> Result<Option<RoadmapProposal>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    get_json(table, id)
}

pub(crate) fn list_proposals_in<T>(table: &T) -> Result<Vec<RoadmapProposal>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    all_json(table)
}

pub(crate) fn save_proposal_in(txn: &WriteTransaction, proposal: &RoadmapProposal) -> Result<()> {
    let value = to_json(proposal)?;
    let mut table = txn.open_table(PROPOSALS).map_err(db_err)?;
    table
        .insert(proposal.id.as_str(), value.as_slice())
        .map_err(db_err)?;
    Ok(())
}

pub(crate) fn get_vote_in<T>(table: &T, proposal_id: &str, user_id: &str) -> Result<Option<Vote>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    match table.get((proposal_id, user_id)).map_err(db_err)? {
        Some(v) => Ok(Some(from_json(v.value())?)),
        None => Ok(None),
    }
}

pub(crate) fn votes_for_in<T>(table: &T, proposal_id: &str) -> Result<Vec<Vote>>
where
    T: ReadableTable<(&'static str, &'static str), &'static [u8]>,
{
    owned_json(table, proposal_id)
}

pub(crate) fn save_vote_in(txn: &WriteTransaction, vote: &Vote) -> Result<()> {
    let value = to_json(vote)?;
    let mut table = txn.open_table(VOTES).map_err(db_err)?;
    table
        .insert(
            (vote.proposal_id.as_str(), vote.user_id.as_str()),
            value.as_slice(),
        )
        .map_err(db_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(user: &str, direction: VoteDirection, counted: bool) -> Vote {
        Vote {
            proposal_id: "p".into(),
            user_id: user.into(),
            direction,
            reputation: 1,
            counted,
            cast_at: Utc::now(),
        }
    }

    fn cfg(adopt: i64, reject: Option<i64>) -> VotingConfig {
        VotingConfig {
            adopt_net_votes: adopt,
            reject_net_votes: reject,
            reputation_floor: None,
        }
    }

    #[test]
    fn tally_counts_only_eligible_voters() {
        let votes = vec![
            vote("a", VoteDirection::Up, true),
            vote("b", VoteDirection::Up, false),
            vote("c", VoteDirection::Down, true),
        ];
        let t = Tally::from_votes(&votes);
        assert_eq!((t.up, t.down), (2, 1));
        assert_eq!((t.counted_up, t.counted_down), (1, 1));
        assert_eq!(t.net(), 0);
    }

    #[test]
    fn ties_stay_pending() {
        let tie = Tally {
            up: 3,
            down: 3,
            counted_up: 3,
            counted_down: 3,
        };
        for c in [cfg(1, None), cfg(1, Some(-1)), cfg(5, Some(-5))] {
            assert_eq!(decide(&tie, &c), ProposalDecision::Pending);
        }
    }

    #[test]
    fn threshold_crossing_adopts_or_rejects() {
        let up = Tally {
            counted_up: 4,
            counted_down: 1,
            ..Tally::default()
        };
        assert_eq!(decide(&up, &cfg(3, None)), ProposalDecision::Adopted);
        assert_eq!(decide(&up, &cfg(4, None)), ProposalDecision::Pending);

        let down = Tally {
            counted_up: 0,
            counted_down: 2,
            ..Tally::default()
        };
        assert_eq!(decide(&down, &cfg(3, None)), ProposalDecision::Pending);
        assert_eq!(decide(&down, &cfg(3, Some(-2))), ProposalDecision::Rejected);
    }

    #[test]
    fn reputation_floor_is_read_from_config() {
        let mut c = cfg(1, None);
        assert!(counts(1, &c));
        c.reputation_floor = Some(10);
        assert!(!counts(9, &c));
        assert!(counts(10, &c));
    }
}
