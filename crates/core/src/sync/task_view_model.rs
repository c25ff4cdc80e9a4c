//! In-memory projection of the task collection kept consistent with the
//! change feed using merge-by-id.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::tasks::{Task, TaskId, TaskStatus};

use super::{ChangeEvent, ChangeEventType};

/// What applying an event or a direct write result did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Removed,
    Ignored,
}

/// Per-status counts for dashboard tiles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusSummary {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
}

impl TaskStatusSummary {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.completed + self.cancelled
    }

    /// Tasks that are not completed or cancelled.
    pub fn open(&self) -> usize {
        self.pending + self.in_progress
    }

    fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

/// Ordered task list holding at most one entry per id.
///
/// Entries keep the position where their id was first seen. The most recently
/// applied image for an id wins; `updated_at` is never compared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListView {
    tasks: Vec<Task>,
}

impl TaskListView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the view from an initial fetch. Duplicate ids collapse onto the
    /// first position with the last image.
    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut view = Self::new();
        for task in tasks {
            view.upsert(task);
        }
        view
    }

    /// Fold one change event into the list.
    pub fn apply(&mut self, event: &ChangeEvent) -> ApplyOutcome {
        let outcome = match event.event_type {
            ChangeEventType::Insert | ChangeEventType::Update => match &event.new {
                Some(task) => self.upsert(task.clone()),
                None => ApplyOutcome::Ignored,
            },
            ChangeEventType::Delete => match event.old.as_ref().and_then(|old| old.id.as_ref()) {
                Some(id) => match self.remove(id) {
                    Some(_) => ApplyOutcome::Removed,
                    None => ApplyOutcome::Ignored,
                },
                None => ApplyOutcome::Ignored,
            },
        };
        if outcome == ApplyOutcome::Ignored {
            debug!(
                "[TaskSync] {} event ignored (id={})",
                event.event_type,
                event.task_id().map(TaskId::as_str).unwrap_or("none")
            );
        }
        outcome
    }

    /// Replace the entry with the same id in place, or append.
    ///
    /// Used for both direct write results and feed events, so a create result
    /// followed by its own INSERT notification leaves a single entry.
    pub fn upsert(&mut self, task: Task) -> ApplyOutcome {
        let Some(id) = task.id.as_ref() else {
            return ApplyOutcome::Ignored;
        };
        match self.position(id) {
            Some(index) => {
                self.tasks[index] = task;
                ApplyOutcome::Replaced
            }
            None => {
                self.tasks.push(task);
                ApplyOutcome::Inserted
            }
        }
    }

    pub fn remove(&mut self, id: &TaskId) -> Option<Task> {
        self.position(id).map(|index| self.tasks.remove(index))
    }

    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.position(id).map(|index| &self.tasks[index])
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Entries that are not in a terminal status.
    pub fn active(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().filter(|task| !task.is_terminal())
    }

    pub fn summary(&self) -> TaskStatusSummary {
        let mut summary = TaskStatusSummary::default();
        for task in &self.tasks {
            summary.record(task.status);
        }
        summary
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.tasks
            .iter()
            .position(|task| task.id.as_ref() == Some(id))
    }
}
