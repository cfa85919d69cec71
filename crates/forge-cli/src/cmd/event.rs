use crate::cmd::open_engine;
use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use forge_core::event::{EventPayload, EventSubmission};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum EventSubcommand {
    /// Submit one event: a skill exercise, a named signal, or a full JSON
    /// submission read from a file
    Submit {
        /// Player the event belongs to
        #[arg(long, required_unless_present = "file")]
        user: Option<String>,
        /// Skill exercised (manual_exercise source)
        #[arg(long, conflicts_with = "signal")]
        skill: Option<String>,
        /// Named external signal (badge_trigger source)
        #[arg(long)]
        signal: Option<String>,
        /// XP carried by the event
        #[arg(long, default_value_t = 0)]
        xp: u64,
        /// Idempotency key (default: a fresh cli:<uuid>)
        #[arg(long)]
        key: Option<String>,
        /// Read an EventSubmission as JSON from this file (`-` for stdin)
        #[arg(long, conflicts_with_all = ["user", "skill", "signal"])]
        file: Option<PathBuf>,
    },
}

pub fn run(root: &Path, subcmd: EventSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        EventSubcommand::Submit {
            user,
            skill,
            signal,
            xp,
            key,
            file,
        } => {
            let sub = match file {
                Some(path) => read_submission(&path)?,
                None => build_submission(user, skill, signal, xp, key)?,
            };
            submit(root, sub, json)
        }
    }
}

fn read_submission(path: &Path) -> anyhow::Result<EventSubmission> {
    let data = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&data).context("malformed event submission")
}

fn build_submission(
    user: Option<String>,
    skill: Option<String>,
    signal: Option<String>,
    xp: u64,
    key: Option<String>,
) -> anyhow::Result<EventSubmission> {
    let user = user.context("--user is required")?;
    let payload = match (skill, signal) {
        (Some(skill), None) => EventPayload::Exercise { skill, xp },
        (None, Some(name)) => EventPayload::Signal { name, xp },
        _ => anyhow::bail!("pass exactly one of --skill or --signal"),
    };
    let key = key.unwrap_or_else(|| format!("cli:{}", uuid::Uuid::new_v4()));
    Ok(EventSubmission::new(key, user, payload, Utc::now()))
}

fn submit(root: &Path, sub: EventSubmission, json: bool) -> anyhow::Result<()> {
    let engine = open_engine(root)?;
    let user = sub.user_id.clone();
    let key = sub.idempotency_key.clone();
    let result = engine.submit_event(sub)?;

    if json {
        return print_json(&result);
    }
    if result.accepted {
        println!("Accepted event '{key}' for {user} as #{}", result.sequence);
    } else {
        println!("Duplicate event '{key}': already recorded as #{}", result.sequence);
    }
    if let Some(level) = result.resulting_level {
        println!("  level: {level}");
    }
    for badge in &result.unlocked_badges {
        println!("  badge unlocked: {badge}");
    }
    Ok(())
}
