//! In-memory task table with a change feed, for client tests.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use upkeep_core::sync::ChangeEvent;
use upkeep_core::tasks::{Task, TaskId, TaskImage};

use crate::error::{Result, TaskSyncError};
use crate::feed::{ChangeFeed, ChannelFilter};
use crate::store::TaskStore;
use crate::types::TaskPatch;

struct Subscriber {
    tx: mpsc::UnboundedSender<ChangeEvent>,
    cancel: CancellationToken,
}

impl Subscriber {
    fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct MemoryState {
    rows: Vec<Task>,
    next_id: i64,
    subscribers: Vec<Subscriber>,
    fail_next: Option<TaskSyncError>,
    write_attempts: usize,
}

impl MemoryState {
    fn broadcast(&mut self, event: ChangeEvent) {
        self.subscribers.retain(Subscriber::is_open);
        for subscriber in &self.subscribers {
            let _ = subscriber.tx.send(event.clone());
        }
    }
}

/// Table plus realtime channel in one, mirroring how the hosted backend echoes
/// every committed write to all joined channels.
#[derive(Default)]
pub(crate) struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn fail_next_write(&self, error: TaskSyncError) {
        self.state().fail_next = Some(error);
    }

    pub fn write_attempts(&self) -> usize {
        self.state().write_attempts
    }

    pub fn row_count(&self) -> usize {
        self.state().rows.len()
    }

    pub fn open_channels(&self) -> usize {
        let mut state = self.state();
        state.subscribers.retain(Subscriber::is_open);
        state.subscribers.len()
    }

    /// Delete issued by some other client.
    pub fn delete(&self, id: &TaskId) {
        let mut state = self.state();
        let Some(position) = state.rows.iter().position(|t| t.id.as_ref() == Some(id)) else {
            return;
        };
        let removed = state.rows.remove(position);
        state.broadcast(ChangeEvent::delete(TaskImage {
            id: removed.id,
            ..TaskImage::default()
        }));
    }
}

#[async_trait]
impl TaskStore for MemoryBackend {
    async fn insert_task(&self, task: &Task) -> Result<Task> {
        let mut state = self.state();
        state.write_attempts += 1;
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        state.next_id += 1;
        let now = Utc::now();
        let row = Task {
            id: Some(TaskId::from(state.next_id)),
            description: task.description.clone(),
            status: task.status,
            created_at: Some(task.created_at.unwrap_or(now)),
            updated_at: Some(task.updated_at.unwrap_or(now)),
        };
        state.rows.push(row.clone());
        state.broadcast(ChangeEvent::insert(row.clone()));
        Ok(row)
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let mut state = self.state();
        state.write_attempts += 1;
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }

        let Some(row) = state.rows.iter_mut().find(|t| t.id.as_ref() == Some(id)) else {
            return Err(TaskSyncError::api_with_code(
                406,
                "PGRST116",
                "JSON object requested, multiple (or no) rows returned",
            ));
        };
        let old = TaskImage {
            id: row.id.clone(),
            ..TaskImage::default()
        };
        patch.changes.apply_to(row);
        row.updated_at = Some(patch.updated_at);
        let row = row.clone();
        state.broadcast(ChangeEvent::update(row.clone(), Some(old)));
        Ok(row)
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn open(
        &self,
        _filter: &ChannelFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().subscribers.push(Subscriber { tx, cancel });
        Ok(rx)
    }
}
