pub mod assess;
pub mod config;
pub mod event;
pub mod init;
pub mod job;
pub mod player;
pub mod proposal;
pub mod quest;
pub mod serve;

use anyhow::Context;
use forge_core::Engine;
use std::path::Path;

pub(crate) fn open_engine(root: &Path) -> anyhow::Result<Engine> {
    Engine::open(root).with_context(|| format!("failed to open forge project at {}", root.display()))
}
