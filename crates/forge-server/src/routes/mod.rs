pub mod assessments;
pub mod events;
pub mod notifications;
pub mod players;
pub mod proposals;
pub mod quests;
