use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use chrono::Utc;
use clap::Subcommand;
use forge_core::quest::QuestInstance;
use forge_core::types::QuestState;
use std::path::Path;

#[derive(Subcommand)]
pub enum QuestSubcommand {
    /// Offer every quest the player is eligible for today
    Offer { user: String },
    /// List a player's quest instances
    List {
        user: String,
        /// Filter by state: offered, in-progress, completed, claimed
        #[arg(long)]
        state: Option<QuestState>,
    },
    /// Start an offered quest
    Start { user: String, id: String },
    /// Mark a started quest completed
    Complete { user: String, id: String },
    /// Claim a completed quest's reward
    Claim {
        user: String,
        id: String,
        /// Idempotency key (default: claim:<user>:<id>)
        #[arg(long)]
        key: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: QuestSubcommand, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    match subcmd {
        QuestSubcommand::Offer { user } => {
            let offered = engine.offer_quests(&user, Utc::now())?;
            if json {
                return print_json(&offered);
            }
            if offered.is_empty() {
                println!("No new quests for {user}.");
            } else {
                for q in &offered {
                    println!("Offered {} to {user}", q.id);
                }
            }
        }
        QuestSubcommand::List { user, state } => {
            let quests = engine.list_quests(&user, state)?;
            if json {
                return print_json(&quests);
            }
            if quests.is_empty() {
                println!("No quests.");
                return Ok(());
            }
            let rows = quests.iter().map(quest_row).collect();
            print_table(&["ID", "CATEGORY", "STATE", "OFFERED"], rows);
        }
        QuestSubcommand::Start { user, id } => {
            let q = engine.start_quest(&user, &id, Utc::now())?;
            report(&q, json)?;
        }
        QuestSubcommand::Complete { user, id } => {
            let q = engine.complete_quest(&user, &id, Utc::now())?;
            report(&q, json)?;
        }
        QuestSubcommand::Claim { user, id, key } => {
            let key = key.unwrap_or_else(|| format!("claim:{user}:{id}"));
            let outcome = engine.claim_quest(&user, &id, &key)?;
            if json {
                return print_json(&outcome);
            }
            let receipt = outcome.instance.claim.as_ref();
            match (outcome.claimed_now, receipt) {
                (true, Some(r)) => println!(
                    "Claimed {id}: +{} xp (#{}, level {})",
                    r.xp, r.sequence, r.level_after
                ),
                (false, Some(r)) => println!("{id} was already claimed as #{}", r.sequence),
                _ => println!("Claimed {id}"),
            }
            for badge in &outcome.unlocked_badges {
                println!("  badge unlocked: {badge}");
            }
        }
    }
    Ok(())
}

fn quest_row(q: &QuestInstance) -> Vec<String> {
    vec![
        q.id.clone(),
        q.category.to_string(),
        q.state.to_string(),
        q.offered_at.format("%Y-%m-%d").to_string(),
    ]
}

fn report(q: &QuestInstance, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(q)
    } else {
        println!("{} is now {}", q.id, q.state);
        Ok(())
    }
}
