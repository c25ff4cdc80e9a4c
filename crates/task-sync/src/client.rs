//! Task sync client: remote writes plus change-feed subscriptions for the
//! task collection.

use chrono::Utc;
use futures::StreamExt;
use log::{debug, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use upkeep_core::sync::ChangeEvent;
use upkeep_core::tasks::{Task, TaskId, TaskUpdate};

use crate::error::{Result, TaskSyncError};
use crate::feed::{ChangeFeed, ChangeSubscription, ChannelFilter, SubscriptionHandle};
use crate::realtime::RealtimeChangeFeed;
use crate::remote::{self, RemoteClient};
use crate::store::{RestTaskStore, TaskStore};
use crate::types::TaskPatch;

/// Single point of contact with the remote task collection.
///
/// Writes return the server-confirmed row and never retry. The same change also
/// reaches every open subscription as an event; fold both into a
/// `TaskListView` with `upsert`/`apply` to avoid duplicates.
#[derive(Clone)]
pub struct TaskSyncClient {
    store: Arc<dyn TaskStore>,
    feed: Arc<dyn ChangeFeed>,
    filter: ChannelFilter,
}

impl TaskSyncClient {
    /// Client using PostgREST for writes and the realtime service for events.
    pub fn new(remote: Arc<RemoteClient>) -> Self {
        let filter = ChannelFilter::all_events(
            remote.config().schema.clone(),
            remote.config().table.clone(),
        );
        Self {
            store: Arc::new(RestTaskStore::new(Arc::clone(&remote))),
            feed: Arc::new(RealtimeChangeFeed::new(remote)),
            filter,
        }
    }

    /// Client bound to the process-wide remote client.
    pub fn from_shared() -> Result<Self> {
        Ok(Self::new(remote::shared()?))
    }

    pub fn with_backends(
        store: Arc<dyn TaskStore>,
        feed: Arc<dyn ChangeFeed>,
        filter: ChannelFilter,
    ) -> Self {
        Self {
            store,
            feed,
            filter,
        }
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    /// Insert a new task and return the confirmed row with its assigned id.
    pub async fn create_task(&self, task: Task) -> Result<Task> {
        if let Some(id) = &task.id {
            return Err(TaskSyncError::invalid_request(format!(
                "New task must not carry an id (got {})",
                id
            )));
        }
        if task.description.trim().is_empty() {
            return Err(TaskSyncError::invalid_request("Task description is required"));
        }

        let created = self.store.insert_task(&task).await?;
        let created = ensure_identified(created)?;
        debug!(
            "[TaskSync] Created task {}",
            created.id.as_ref().map(TaskId::as_str).unwrap_or_default()
        );
        Ok(created)
    }

    /// Apply `updates` to task `id`, stamping `updated_at` with the current time.
    pub async fn update_task(&self, id: &TaskId, updates: TaskUpdate) -> Result<Task> {
        if updates
            .description
            .as_deref()
            .is_some_and(|d| d.trim().is_empty())
        {
            return Err(TaskSyncError::invalid_request("Task description is required"));
        }

        let patch = TaskPatch::new(updates, Utc::now());
        let mut updated = self.store.update_task(id, &patch).await?;
        match &updated.id {
            Some(confirmed) if confirmed != id => {
                // The row filter matched, so this is the same row in canonical form.
                debug!("[TaskSync] Updated task {} (confirmed as {})", id, confirmed);
            }
            Some(_) => debug!("[TaskSync] Updated task {}", id),
            None => {
                warn!("[TaskSync] Update of {} confirmed without an id", id);
                updated.id = Some(id.clone());
            }
        }
        Ok(updated)
    }

    /// Open a dedicated channel and stream every change to the collection.
    pub async fn subscribe(&self) -> Result<ChangeSubscription> {
        let token = CancellationToken::new();
        let events = self.feed.open(&self.filter, token.clone()).await?;
        debug!(
            "[TaskSync] Subscribed to {} changes",
            self.filter.channel_name()
        );
        Ok(ChangeSubscription::new(events, token))
    }

    /// Callback form of [`subscribe`](Self::subscribe).
    ///
    /// Events are passed to `callback` one at a time, in order. Cancel through
    /// the returned handle.
    pub async fn subscribe_with<F>(&self, mut callback: F) -> Result<SubscriptionHandle>
    where
        F: FnMut(ChangeEvent) + Send + 'static,
    {
        let mut subscription = self.subscribe().await?;
        let handle = subscription.handle();
        tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                callback(event);
            }
        });
        Ok(handle)
    }
}

fn ensure_identified(task: Task) -> Result<Task> {
    if task.id.is_none() {
        return Err(TaskSyncError::invalid_request(
            "Remote store returned a task without an id",
        ));
    }
    Ok(task)
}
