//! Remote write path for the task table.

use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

use upkeep_core::tasks::{Task, TaskId};

use crate::error::Result;
use crate::remote::RemoteClient;
use crate::types::{TaskInsert, TaskPatch};

/// Single-row writes against the remote task collection.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a task and return the confirmed row, including its new id.
    async fn insert_task(&self, task: &Task) -> Result<Task>;

    /// Patch the row with `id` and return the confirmed post-update row.
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task>;
}

/// [`TaskStore`] backed by the PostgREST endpoint of the task table.
#[derive(Debug, Clone)]
pub struct RestTaskStore {
    remote: Arc<RemoteClient>,
}

impl RestTaskStore {
    pub fn new(remote: Arc<RemoteClient>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl TaskStore for RestTaskStore {
    /// POST /rest/v1/{table}
    async fn insert_task(&self, task: &Task) -> Result<Task> {
        let url = self.remote.config().rest_url();
        debug!("[TaskSync] Inserting task into {}", self.remote.config().table);

        let response = self
            .remote
            .http()
            .post(&url)
            .headers(self.remote.rest_headers()?)
            .json(&TaskInsert::from(task))
            .send()
            .await?;

        RemoteClient::parse_response(response).await
    }

    /// PATCH /rest/v1/{table}?id=eq.{id}
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let url = self.remote.config().rest_url();
        debug!(
            "[TaskSync] Updating task {} in {}",
            id,
            self.remote.config().table
        );

        let response = self
            .remote
            .http()
            .patch(&url)
            .query(&[("id", format!("eq.{}", id))])
            .headers(self.remote.rest_headers()?)
            .json(patch)
            .send()
            .await?;

        RemoteClient::parse_response(response).await
    }
}
