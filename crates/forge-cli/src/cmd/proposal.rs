use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use clap::Subcommand;
use forge_core::engine::NewProposal;
use forge_core::types::VoteDirection;
use std::path::Path;

#[derive(Subcommand)]
pub enum ProposalSubcommand {
    /// Submit a roadmap proposal
    Create {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        author: String,
        #[arg(long)]
        description: Option<String>,
        /// Job or skill roadmap the proposal extends
        #[arg(long)]
        roadmap: Option<String>,
    },
    /// List all proposals
    List,
    /// Show a proposal with its votes
    Show { id: String },
}

pub fn run(root: &Path, subcmd: ProposalSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        ProposalSubcommand::Create {
            id,
            title,
            author,
            description,
            roadmap,
        } => {
            let proposal = engine.submit_proposal(NewProposal {
                id,
                title,
                description,
                roadmap,
                author,
            })?;
            if json {
                return print_json(&proposal);
            }
            println!("Created proposal '{}'", proposal.id);
        }
        ProposalSubcommand::List => {
            let proposals = engine.list_proposals()?;
            if json {
                return print_json(&proposals);
            }
            if proposals.is_empty() {
                println!("No proposals.");
                return Ok(());
            }
            let rows = proposals
                .iter()
                .map(|p| {
                    vec![
                        p.id.clone(),
                        p.decision.to_string(),
                        format!("+{} / -{}", p.tally.counted_up, p.tally.counted_down),
                        p.title.clone(),
                    ]
                })
                .collect();
            print_table(&["ID", "DECISION", "VOTES", "TITLE"], rows);
        }
        ProposalSubcommand::Show { id } => {
            let proposal = engine.get_proposal(&id)?;
            let votes = engine.proposal_votes(&id)?;
            if json {
                return print_json(&serde_json::json!({ "proposal": proposal, "votes": votes }));
            }
            println!("{}: {} [{}]", proposal.id, proposal.title, proposal.decision);
            println!("  author: {}", proposal.author);
            if let Some(d) = &proposal.description {
                println!("  {d}");
            }
            println!(
                "  net {} (counted +{} / -{}, raw +{} / -{})",
                proposal.tally.net(),
                proposal.tally.counted_up,
                proposal.tally.counted_down,
                proposal.tally.up,
                proposal.tally.down
            );
            for v in &votes {
                let counted = if v.counted { "" } else { " (below floor)" };
                println!("  - {} {} at lv {}{counted}", v.user_id, v.direction, v.reputation);
            }
        }
    }
    Ok(())
}

pub fn vote(
    root: &Path,
    proposal: &str,
    user: &str,
    direction: VoteDirection,
    json: bool,
) -> anyhow::Result<()> {
    let result = open_engine(root)?.cast_vote(user, proposal, direction)?;
    if json {
        return print_json(&result);
    }
    if result.accepted {
        println!("Recorded {direction} vote from {user} on '{proposal}'");
    } else {
        println!("{user} already voted {} on '{proposal}'", result.vote.direction);
    }
    println!("  decision: {}", result.decision);
    Ok(())
}
