pub mod assessment;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod io;
pub mod jobs;
pub mod ledger;
pub mod leveling;
pub mod paths;
pub mod projection;
pub mod quest;
pub mod rules;
pub mod store;
pub mod types;
pub mod voting;

pub use engine::Engine;
pub use error::{ForgeError, Result};
