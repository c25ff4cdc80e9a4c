//! Wire types for the remote store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use upkeep_core::tasks::{Task, TaskStatus, TaskUpdate};

/// Error body returned by PostgREST and the API gateway in front of it.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(alias = "msg", alias = "error_description")]
    pub message: String,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

impl ApiErrorResponse {
    /// Message with details appended when the server sent them.
    pub fn detailed_message(&self) -> String {
        match self.details.as_deref().filter(|d| !d.is_empty()) {
            Some(details) => format!("{} ({})", self.message, details),
            None => self.message.clone(),
        }
    }
}

/// Insert body. The id is assigned by the server and never sent.
#[derive(Debug, Clone, Serialize)]
pub struct TaskInsert<'a> {
    pub description: &'a str,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a Task> for TaskInsert<'a> {
    fn from(task: &'a Task) -> Self {
        Self {
            description: &task.description,
            status: task.status,
            created_at: task.created_at,
            updated_at: task.updated_at,
        }
    }
}

/// Update body: the caller's changes plus the client-stamped `updated_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskPatch {
    #[serde(flatten)]
    pub changes: TaskUpdate,
    pub updated_at: DateTime<Utc>,
}

impl TaskPatch {
    pub fn new(changes: TaskUpdate, updated_at: DateTime<Utc>) -> Self {
        Self {
            changes,
            updated_at,
        }
    }
}
