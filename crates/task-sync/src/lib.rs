//! Remote persistence and realtime change notifications for the task table.
//!
//! Writes go through PostgREST, change events arrive over the realtime
//! websocket. [`TaskSyncClient`] ties both together.

mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod realtime;
pub mod remote;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use client::TaskSyncClient;
pub use config::TaskSyncConfig;
pub use error::{ApiRetryClass, Result, TaskSyncError};
pub use feed::{ChangeFeed, ChangeSubscription, ChannelFilter, SubscriptionHandle};
pub use realtime::RealtimeChangeFeed;
pub use remote::{init_shared, reset_shared, shared, RemoteClient};
pub use store::{RestTaskStore, TaskStore};

pub use upkeep_core::sync::{ChangeEvent, ChangeEventType};
pub use upkeep_core::tasks::{Task, TaskId, TaskStatus, TaskUpdate};
