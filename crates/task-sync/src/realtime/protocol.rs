//! Phoenix channel messages spoken by the realtime service (`vsn=1.0.0`).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use upkeep_core::sync::RowChange;

use crate::feed::ChannelFilter;

pub(crate) const PHOENIX_TOPIC: &str = "phoenix";
pub(crate) const PHX_JOIN: &str = "phx_join";
pub(crate) const PHX_LEAVE: &str = "phx_leave";
pub(crate) const PHX_REPLY: &str = "phx_reply";
pub(crate) const PHX_ERROR: &str = "phx_error";
pub(crate) const PHX_CLOSE: &str = "phx_close";
pub(crate) const HEARTBEAT: &str = "heartbeat";
pub(crate) const POSTGRES_CHANGES: &str = "postgres_changes";
pub(crate) const SYSTEM: &str = "system";

/// One frame of the Phoenix v1 JSON serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    pub fn join(topic: &str, filter: &ChannelFilter, access_token: &str, msg_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "ack": false, "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [{
                        "event": filter.event,
                        "schema": filter.schema,
                        "table": filter.table,
                    }],
                    "private": false,
                },
                "access_token": access_token,
            }),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn leave(topic: &str, msg_ref: &str, join_ref: &str) -> Self {
        Self {
            topic: topic.to_string(),
            event: PHX_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(join_ref.to_string()),
        }
    }

    pub fn heartbeat(msg_ref: &str) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Monotonic message reference counter, one per socket.
#[derive(Debug, Default)]
pub(crate) struct RefCounter(u64);

impl RefCounter {
    pub fn next_ref(&mut self) -> String {
        self.0 += 1;
        self.0.to_string()
    }
}

/// What an inbound frame means for a joined channel.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Inbound {
    Reply {
        msg_ref: Option<String>,
        ok: bool,
        reason: String,
    },
    Change(Box<RowChange>),
    /// The payload of a change notification did not have the expected shape.
    MalformedChange(String),
    ChannelError(String),
    ChannelClosed,
    Other,
}

#[derive(Debug, Deserialize)]
struct PostgresChangesPayload {
    data: RowChange,
}

pub(crate) fn classify(message: PhoenixMessage, topic: &str) -> Inbound {
    if message.topic != topic {
        return Inbound::Other;
    }
    match message.event.as_str() {
        PHX_REPLY => {
            let status = message
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Inbound::Reply {
                msg_ref: message.msg_ref,
                ok: status == "ok",
                reason: error_reason(&message.payload),
            }
        }
        POSTGRES_CHANGES => match serde_json::from_value::<PostgresChangesPayload>(message.payload)
        {
            Ok(payload) => Inbound::Change(Box::new(payload.data)),
            Err(err) => Inbound::MalformedChange(err.to_string()),
        },
        SYSTEM => {
            let status = message
                .payload
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if status == "error" {
                Inbound::ChannelError(error_reason(&message.payload))
            } else {
                Inbound::Other
            }
        }
        PHX_ERROR => Inbound::ChannelError(error_reason(&message.payload)),
        PHX_CLOSE => Inbound::ChannelClosed,
        _ => Inbound::Other,
    }
}

fn error_reason(payload: &Value) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .or_else(|| payload.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("no reason given")
        .to_string()
}
