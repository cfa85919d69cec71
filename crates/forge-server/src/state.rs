use forge_core::projection::Notification;
use forge_core::Engine;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Every notification the engine emits, fanned out to SSE subscribers.
    pub notify_tx: broadcast::Sender<Notification>,
    /// Cancel switches for assessment jobs currently owned by a runner task.
    pub job_cancels: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl AppState {
    pub fn new(engine: Engine) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            engine: Arc::new(engine),
            notify_tx: tx,
            job_cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn open(root: &Path) -> forge_core::Result<Self> {
        Ok(Self::new(Engine::open(root)?))
    }

    /// Broadcast `notes`. Having no subscribers is not an error.
    pub fn publish(&self, notes: &[Notification]) {
        for note in notes {
            tracing::debug!(kind = note.kind(), user = note.user_id(), "notification");
            let _ = self.notify_tx.send(note.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::config::Config;
    use tempfile::TempDir;

    #[test]
    fn publish_reaches_subscribers() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::with_config(dir.path(), Config::new("test")).unwrap();
        let state = AppState::new(engine);
        let mut rx = state.notify_tx.subscribe();
        state.publish(&[Notification::BadgeAwarded {
            user_id: "octocat".into(),
            badge: "first-steps".into(),
        }]);
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind(), "badge_awarded");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let dir = TempDir::new().unwrap();
        let engine = Engine::with_config(dir.path(), Config::new("test")).unwrap();
        AppState::new(engine).publish(&[Notification::JobChangeUnlocked {
            user_id: "octocat".into(),
            level: 30,
        }]);
    }
}
