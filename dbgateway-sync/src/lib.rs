//! Batched upsert sync and change-feed reading for the gateway's fixed
//! entity set (§4.5).

pub mod entity;
pub mod engine;

pub use engine::{get_changes, sync, SyncResult};
pub use entity::SyncEntityKind;
