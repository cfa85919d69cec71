use crate::cmd::open_engine;
use crate::output::{print_json, print_table};
use forge_core::event::{EventPayload, ProgressionEvent};
use forge_core::projection::PlayerStatusSnapshot;
use std::path::Path;

pub fn status(root: &Path, user: &str, json: bool) -> anyhow::Result<()> {
    let snap = open_engine(root)?.player_status(user)?;
    if json {
        return print_json(&snap);
    }
    print_status(&snap);
    Ok(())
}

fn print_status(snap: &PlayerStatusSnapshot) {
    let job = snap.job_title.as_deref().unwrap_or(&snap.job);
    println!("{} (lv {}, {job})", snap.user_id, snap.level);
    match snap.next_level_xp {
        Some(next) => println!("  xp:    {} / {next}", snap.xp),
        None => println!("  xp:    {} (max level)", snap.xp),
    }
    println!("  hp/mp: {}/{}", snap.hp, snap.mp);
    let stats: Vec<String> = snap.stats.iter().map(|(k, v)| format!("{k} {v}")).collect();
    println!("  stats: {} ({} points)", stats.join(", "), snap.stat_points);
    if snap.job_change_eligible {
        println!("  job change available");
    }
    if !snap.badges.is_empty() {
        println!("  badges: {}", snap.badges.join(", "));
    }
    if !snap.equipped_skills.is_empty() {
        println!();
        let rows = snap
            .equipped_skills
            .iter()
            .map(|s| {
                vec![
                    s.skill.clone(),
                    s.level.to_string(),
                    s.xp.to_string(),
                    if s.hidden { "hidden".into() } else { String::new() },
                ]
            })
            .collect();
        print_table(&["SKILL", "LEVEL", "XP", ""], rows);
    }
}

pub fn history(root: &Path, user: &str, after: u64, json: bool) -> anyhow::Result<()> {
    let mut events = open_engine(root)?.replay(user)?;
    events.retain(|e| e.sequence > after);
    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }
    let rows = events.iter().map(event_row).collect();
    print_table(&["SEQ", "SOURCE", "KIND", "XP", "KEY", "AT"], rows);
    Ok(())
}

fn event_row(e: &ProgressionEvent) -> Vec<String> {
    let kind = match &e.payload {
        EventPayload::Exercise { skill, .. } => format!("exercise:{skill}"),
        EventPayload::Signal { name, .. } => format!("signal:{name}"),
        EventPayload::BadgeAward { badge, .. } => format!("badge:{badge}"),
        EventPayload::JobChange { to } => format!("job:{to}"),
        other => other.kind().to_string(),
    };
    vec![
        e.sequence.to_string(),
        e.source.to_string(),
        kind,
        e.payload.total_xp().to_string(),
        e.event_id.clone(),
        e.occurred_at.format("%Y-%m-%d %H:%M").to_string(),
    ]
}

pub fn rebuild(root: &Path, user: &str, json: bool) -> anyhow::Result<()> {
    let snap = open_engine(root)?.rebuild(user)?;
    if json {
        return print_json(&snap);
    }
    println!("Rebuilt {user} from {} events", snap.last_sequence);
    print_status(&snap);
    Ok(())
}

pub fn verify(root: &Path, user: &str, json: bool) -> anyhow::Result<()> {
    let report = open_engine(root)?.verify(user)?;
    if json {
        return print_json(&report);
    }
    if report.cached {
        println!(
            "{user}: projection matches {} events (last #{})",
            report.events, report.last_sequence
        );
    } else {
        println!("{user}: no cached projection to compare ({} events)", report.events);
    }
    Ok(())
}
