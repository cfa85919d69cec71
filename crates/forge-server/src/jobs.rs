//! Background runner for assessment jobs.
//!
//! A job fetches a profile snapshot with a bounded timeout per attempt,
//! retries transient failures with exponential backoff, and only then hands
//! the whole snapshot to [`Engine::apply_assessment`]. Nothing reaches the
//! ledger until a fetch has fully succeeded. Cancellation is a `watch`
//! switch checked between every step.

use crate::state::AppState;
use forge_core::assessment::{FileProfileSource, ProfileSnapshot, ProfileSource, StaticProfileSource};
use forge_core::config::RetryConfig;
use forge_core::jobs::{AssessmentJob, JobStatus};
use forge_core::paths::validate_slug;
use forge_core::{Engine, ForgeError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
enum AttemptError {
    #[error("profile fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Forge(#[from] ForgeError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AttemptError {
    fn is_retryable(&self) -> bool {
        match self {
            AttemptError::Timeout(_) => true,
            AttemptError::Forge(e) => e.is_transient(),
            AttemptError::Cancelled | AttemptError::Other(_) => false,
        }
    }
}

async fn blocking<T, F>(engine: &Arc<Engine>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Engine) -> forge_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = engine.clone();
    Ok(tokio::task::spawn_blocking(move || f(&engine)).await??)
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Persist a new job and start a runner for it.
pub async fn submit(
    app: &AppState,
    user_id: String,
    snapshot: Option<ProfileSnapshot>,
) -> anyhow::Result<AssessmentJob> {
    let job = queue(app, user_id, snapshot).await?;
    spawn(app, job.id).await;
    Ok(job)
}

/// Persist a new job and drive it to a terminal state on the current task.
pub async fn run_inline(
    app: &AppState,
    user_id: String,
    snapshot: Option<ProfileSnapshot>,
) -> anyhow::Result<AssessmentJob> {
    let id = queue(app, user_id, snapshot).await?.id;
    let (_tx, rx) = watch::channel(false);
    run(app, id, rx).await?;
    blocking(&app.engine, move |e| e.jobs().get(id)).await
}

async fn queue(
    app: &AppState,
    user_id: String,
    snapshot: Option<ProfileSnapshot>,
) -> anyhow::Result<AssessmentJob> {
    validate_slug(&user_id)?;
    if let Some(snap) = &snapshot {
        if snap.user_id != user_id {
            return Err(ForgeError::Validation(format!(
                "snapshot belongs to '{}', not '{user_id}'",
                snap.user_id
            ))
            .into());
        }
    }
    let job = AssessmentJob::new(user_id, snapshot);
    let record = job.clone();
    blocking(&app.engine, move |e| e.jobs().insert(&record)).await?;
    info!(job = %job.id, user = %job.user_id, "assessment job queued");
    Ok(job)
}

/// Mark a job cancelled and flip its runner's switch, if one is live.
pub async fn cancel(app: &AppState, id: Uuid) -> anyhow::Result<AssessmentJob> {
    let job = blocking(&app.engine, move |e| e.jobs().cancel(id)).await?;
    if let Some(tx) = app.job_cancels.lock().await.get(&id) {
        let _ = tx.send(true);
    }
    info!(job = %id, "assessment job cancelled");
    Ok(job)
}

/// Fail jobs a previous process left running, then restart every pending one.
pub async fn recover(app: &AppState) -> anyhow::Result<usize> {
    let pending = blocking(&app.engine, |e| {
        // No runner of this process has started yet, so every running job is stale.
        e.jobs().startup_recovery(Duration::ZERO)?;
        e.jobs().pending()
    })
    .await?;
    let count = pending.len();
    for job in pending {
        debug!(job = %job.id, user = %job.user_id, "resuming pending assessment job");
        spawn(app, job.id).await;
    }
    Ok(count)
}

async fn spawn(app: &AppState, id: Uuid) {
    let (tx, rx) = watch::channel(false);
    app.job_cancels.lock().await.insert(id, tx);
    let app = app.clone();
    tokio::spawn(async move {
        if let Err(e) = run(&app, id, rx).await {
            warn!(job = %id, error = %e, "assessment runner stopped");
        }
        app.job_cancels.lock().await.remove(&id);
    });
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

async fn run(app: &AppState, id: Uuid, cancel: watch::Receiver<bool>) -> anyhow::Result<()> {
    let job = blocking(&app.engine, move |e| e.jobs().get(id)).await?;
    match job.snapshot.clone() {
        Some(snap) => run_with(app, job, &StaticProfileSource::new(snap), cancel).await,
        None => {
            let source = FileProfileSource::new(app.engine.root());
            run_with(app, job, &source, cancel).await
        }
    }
}

async fn run_with<S: ProfileSource>(
    app: &AppState,
    job: AssessmentJob,
    source: &S,
    mut cancel: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if job.status.is_terminal() {
        return Ok(());
    }
    let id = job.id;
    blocking(&app.engine, move |e| e.jobs().set_status(id, JobStatus::Running)).await?;

    let retry = app.engine.config().retry.clone();
    let snapshot = match fetch_with_retry(app, &job, source, &retry, &mut cancel).await {
        Ok(snap) => snap,
        Err(AttemptError::Cancelled) => {
            debug!(job = %id, "runner observed cancellation");
            return Ok(());
        }
        Err(e) => {
            let reason = if e.is_retryable() {
                format!("gave up after {} attempts: {e}", retry.max_attempts)
            } else {
                e.to_string()
            };
            warn!(job = %id, user = %job.user_id, %reason, "assessment job failed");
            return finish(app, id, JobStatus::Failed { reason }).await;
        }
    };

    if *cancel.borrow() {
        return Ok(());
    }
    match blocking(&app.engine, move |e| e.apply_assessment(&snapshot)).await {
        Ok(outcome) => {
            app.publish(&outcome.result.notifications);
            info!(
                job = %id,
                user = %job.user_id,
                accepted = outcome.result.accepted,
                xp = outcome.xp_granted,
                "assessment applied"
            );
            finish(
                app,
                id,
                JobStatus::Succeeded {
                    accepted: outcome.result.accepted,
                    sequence: outcome.result.sequence,
                    xp_granted: outcome.xp_granted,
                },
            )
            .await
        }
        Err(e) => {
            let reason = format!("{e:#}");
            warn!(job = %id, user = %job.user_id, %reason, "assessment rejected");
            finish(app, id, JobStatus::Failed { reason }).await
        }
    }
}

async fn fetch_with_retry<S: ProfileSource>(
    app: &AppState,
    job: &AssessmentJob,
    source: &S,
    retry: &RetryConfig,
    cancel: &mut watch::Receiver<bool>,
) -> Result<ProfileSnapshot, AttemptError> {
    let id = job.id;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if *cancel.borrow() {
            return Err(AttemptError::Cancelled);
        }
        let fetched = tokio::select! {
            r = tokio::time::timeout(retry.timeout(), source.fetch_profile_snapshot(&job.user_id)) => match r {
                Ok(Ok(snap)) => Ok(snap),
                Ok(Err(e)) => Err(AttemptError::Forge(e)),
                Err(_) => Err(AttemptError::Timeout(retry.timeout())),
            },
            Ok(()) = cancel.changed() => Err(AttemptError::Cancelled),
        };
        let err = match fetched {
            Ok(snap) => {
                blocking(&app.engine, move |e| e.jobs().record_attempt(id, None)).await?;
                return Ok(snap);
            }
            Err(AttemptError::Cancelled) => return Err(AttemptError::Cancelled),
            Err(e) => e,
        };
        let message = err.to_string();
        blocking(&app.engine, move |e| e.jobs().record_attempt(id, Some(message))).await?;
        if !err.is_retryable() || attempt >= retry.max_attempts {
            return Err(err);
        }

        let delay = retry.backoff_for(attempt);
        warn!(job = %id, user = %job.user_id, attempt, ?delay, error = %err, "assessment attempt failed, retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            Ok(()) = cancel.changed() => return Err(AttemptError::Cancelled),
        }
    }
}

/// Write a terminal status. A job cancelled meanwhile keeps its `cancelled`.
async fn finish(app: &AppState, id: Uuid, status: JobStatus) -> anyhow::Result<()> {
    match blocking(&app.engine, move |e| e.jobs().set_status(id, status)).await {
        Ok(_) => Ok(()),
        Err(e) if matches!(e.downcast_ref::<ForgeError>(), Some(ForgeError::InvalidTransition { .. })) => {
            debug!(job = %id, "job finished elsewhere first");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
