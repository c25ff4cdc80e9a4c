//! Normalized change-feed events.

use chrono::{DateTime, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{CoreError, Result};
use crate::tasks::{Task, TaskId, TaskImage};

/// Kind of row change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeEventType {
    Insert,
    Update,
    Delete,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::Insert => "INSERT",
            ChangeEventType::Update => "UPDATE",
            ChangeEventType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for ChangeEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeEventType {
    type Err = CoreError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(ChangeEventType::Insert),
            "UPDATE" => Ok(ChangeEventType::Update),
            "DELETE" => Ok(ChangeEventType::Delete),
            _ => Err(CoreError::unknown_event_type(value)),
        }
    }
}

/// Row change as it arrives from the transport, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "type", alias = "eventType")]
    pub event_type: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub record: Option<serde_json::Value>,
    #[serde(default)]
    pub old_record: Option<serde_json::Value>,
}

impl RowChange {
    /// Convert into a [`ChangeEvent`].
    ///
    /// Fails only for an unknown event type. Row images that are missing, empty
    /// or do not parse are dropped from the event instead.
    pub fn normalize(self) -> Result<ChangeEvent> {
        let event_type = self.event_type.parse::<ChangeEventType>()?;
        let new = match event_type {
            ChangeEventType::Delete => None,
            _ => parse_image::<Task>(self.record, "new", event_type),
        };
        let old = match event_type {
            ChangeEventType::Insert => None,
            _ => parse_old_image(self.old_record, event_type),
        };
        let commit_timestamp = self
            .commit_timestamp
            .as_deref()
            .and_then(|value| DateTime::parse_from_rfc3339(value.trim()).ok())
            .map(|value| value.with_timezone(&Utc));

        Ok(ChangeEvent {
            event_type,
            new,
            old,
            commit_timestamp,
        })
    }
}

fn present(value: Option<serde_json::Value>) -> Option<serde_json::Value> {
    match value? {
        serde_json::Value::Null => None,
        serde_json::Value::Object(map) if map.is_empty() => None,
        value => Some(value),
    }
}

fn parse_image<T: DeserializeOwned>(
    value: Option<serde_json::Value>,
    side: &str,
    event_type: ChangeEventType,
) -> Option<T> {
    let value = present(value)?;
    match serde_json::from_value::<T>(value) {
        Ok(image) => Some(image),
        Err(err) => {
            warn!(
                "[TaskSync] Ignoring malformed {} image on {} event: {}",
                side, event_type, err
            );
            None
        }
    }
}

/// Old image of an update or delete. When the full image does not decode, the
/// primary key alone is kept so the row can still be matched.
fn parse_old_image(
    value: Option<serde_json::Value>,
    event_type: ChangeEventType,
) -> Option<TaskImage> {
    let value = present(value)?;
    let key = value.get("id").cloned();
    match serde_json::from_value::<TaskImage>(value) {
        Ok(image) => Some(image),
        Err(err) => {
            let id = key.and_then(|id| serde_json::from_value::<TaskId>(id).ok());
            warn!(
                "[TaskSync] Malformed old image on {} event ({}), keeping key {:?}",
                event_type, err, id
            );
            id.map(|id| TaskImage {
                id: Some(id),
                ..TaskImage::default()
            })
        }
    }
}

/// A change to the task collection, normalized from the remote feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEvent {
    pub event_type: ChangeEventType,
    /// Post-change row. Absent for deletes.
    pub new: Option<Task>,
    /// Pre-change row. Absent for inserts.
    pub old: Option<TaskImage>,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    pub fn insert(task: Task) -> Self {
        Self {
            event_type: ChangeEventType::Insert,
            new: Some(task),
            old: None,
            commit_timestamp: None,
        }
    }

    pub fn update(task: Task, old: Option<TaskImage>) -> Self {
        Self {
            event_type: ChangeEventType::Update,
            new: Some(task),
            old,
            commit_timestamp: None,
        }
    }

    pub fn delete(old: TaskImage) -> Self {
        Self {
            event_type: ChangeEventType::Delete,
            new: None,
            old: Some(old),
            commit_timestamp: None,
        }
    }

    /// Id of the affected row, taken from the new image first.
    pub fn task_id(&self) -> Option<&TaskId> {
        self.new
            .as_ref()
            .and_then(|task| task.id.as_ref())
            .or_else(|| self.old.as_ref().and_then(|image| image.id.as_ref()))
    }
}
