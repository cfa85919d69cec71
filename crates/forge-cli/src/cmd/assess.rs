use crate::cmd::open_engine;
use crate::output::print_json;
use anyhow::Context;
use forge_core::assessment::ProfileSnapshot;
use forge_core::jobs::JobStatus;
use forge_server::{jobs, AppState};
use std::path::Path;

/// Run one assessment job to completion in-process, with the same timeout,
/// retry and backoff policy the server's background runner applies.
pub fn run(root: &Path, user: &str, snapshot: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let snapshot = snapshot
        .map(|path| -> anyhow::Result<ProfileSnapshot> {
            let data = std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_slice(&data)
                .with_context(|| format!("malformed profile snapshot {}", path.display()))
        })
        .transpose()?;

    let app = AppState::new(open_engine(root)?);
    let rt = tokio::runtime::Runtime::new()?;
    let job = rt.block_on(jobs::run_inline(&app, user.to_string(), snapshot))?;

    if json {
        print_json(&job)?;
    } else {
        match &job.status {
            JobStatus::Succeeded {
                accepted: true,
                sequence,
                xp_granted,
            } => println!("Assessed {user}: +{xp_granted} xp (#{sequence})"),
            JobStatus::Succeeded { sequence, .. } => {
                println!("Snapshot for {user} already assessed as #{sequence}; nothing granted")
            }
            other => println!("Assessment for {user} ended {}", other.as_str()),
        }
    }

    if let JobStatus::Failed { reason } = &job.status {
        anyhow::bail!("assessment failed after {} attempts: {reason}", job.attempts);
    }
    Ok(())
}
