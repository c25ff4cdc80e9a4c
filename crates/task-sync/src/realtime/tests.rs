use super::*;
use crate::config::TaskSyncConfig;
use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex as TokioMutex;
use tokio_tungstenite::accept_async;

use crate::feed::ChangeSubscription;
use upkeep_core::sync::ChangeEventType;
use upkeep_core::tasks::{TaskId, TaskStatus};

const TOPIC: &str = "realtime:public:tasks";

#[derive(Debug, Clone)]
enum JoinBehavior {
    Accept,
    Reject(&'static str),
    Ignore,
}

/// Accepts one websocket, answers the join and then plays `frames`.
/// Heartbeats are answered like the hosted service does.
async fn start_mock_realtime(
    join: JoinBehavior,
    frames: Vec<Value>,
) -> (
    String,
    Arc<TokioMutex<Vec<Value>>>,
    tokio::task::JoinHandle<()>,
) {
    start_mock_realtime_with(join, frames, true).await
}

async fn start_mock_realtime_with(
    join: JoinBehavior,
    frames: Vec<Value>,
    answer_heartbeats: bool,
) -> (
    String,
    Arc<TokioMutex<Vec<Value>>>,
    tokio::task::JoinHandle<()>,
) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener addr");
    let received = Arc::new(TokioMutex::new(Vec::<Value>::new()));
    let received_clone = Arc::clone(&received);

    let handle = tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(mut ws) = accept_async(stream).await else {
            return;
        };

        let mut frames = Some(frames);
        while let Some(Ok(message)) = ws.next().await {
            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };
            let value: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            received_clone.lock().await.push(value.clone());

            if value["event"] == "heartbeat" && answer_heartbeats {
                let reply = json!({
                    "topic": "phoenix",
                    "event": "phx_reply",
                    "payload": { "status": "ok", "response": {} },
                    "ref": value["ref"],
                });
                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
                continue;
            }

            if value["event"] == "phx_join" {
                let reply = match join {
                    JoinBehavior::Accept => json!({
                        "topic": value["topic"],
                        "event": "phx_reply",
                        "payload": { "status": "ok", "response": { "postgres_changes": [{ "id": 1 }] } },
                        "ref": value["ref"],
                    }),
                    JoinBehavior::Reject(reason) => json!({
                        "topic": value["topic"],
                        "event": "phx_reply",
                        "payload": { "status": "error", "response": { "reason": reason } },
                        "ref": value["ref"],
                    }),
                    JoinBehavior::Ignore => continue,
                };
                if ws.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
                for frame in frames.take().unwrap_or_default() {
                    if ws.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    (format!("http://{}", addr), received, handle)
}

fn change_frame(data: Value) -> Value {
    json!({
        "topic": TOPIC,
        "event": "postgres_changes",
        "payload": { "ids": [1], "data": data },
        "ref": null,
    })
}

fn feed_for(base_url: &str, tweak: impl FnOnce(TaskSyncConfig) -> TaskSyncConfig) -> RealtimeChangeFeed {
    let config = tweak(TaskSyncConfig::new(base_url, "anon-key").with_access_token("user-jwt"));
    RealtimeChangeFeed::new(Arc::new(RemoteClient::new(config).expect("remote client")))
}

async fn open(feed: &RealtimeChangeFeed) -> Result<ChangeSubscription> {
    let token = CancellationToken::new();
    let rx = feed
        .open(&ChannelFilter::all_events("public", "tasks"), token.clone())
        .await?;
    Ok(ChangeSubscription::new(rx, token))
}

async fn wait_for_event(received: &Arc<TokioMutex<Vec<Value>>>, event: &str) -> bool {
    for _ in 0..100 {
        if received.lock().await.iter().any(|v| v["event"] == event) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn subscribe_delivers_normalized_events_in_order() {
    let (base_url, received, server) = start_mock_realtime(
        JoinBehavior::Accept,
        vec![
            change_frame(json!({
                "type": "INSERT", "schema": "public", "table": "tasks",
                "commit_timestamp": "2024-05-01T10:00:00Z",
                "record": { "id": 1, "description": "Fix leak", "status": "pending" },
                "old_record": null,
            })),
            json!({ "topic": "realtime:public:other", "event": "postgres_changes", "payload": {}, "ref": null }),
            change_frame(json!({ "type": "TRUNCATE", "schema": "public", "table": "tasks" })),
            json!({ "topic": TOPIC, "event": "postgres_changes", "payload": { "unexpected": true }, "ref": null }),
            change_frame(json!({
                "type": "UPDATE", "schema": "public", "table": "tasks",
                "record": { "id": 1, "description": "Fix leak", "status": "completed" },
                "old_record": { "id": 1 },
            })),
            change_frame(json!({
                "type": "DELETE", "schema": "public", "table": "tasks",
                "record": {},
                "old_record": { "id": 1 },
            })),
        ],
    )
    .await;

    let mut subscription = open(&feed_for(&base_url, |c| c)).await.expect("subscribe");
    let mut events = Vec::new();
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(2), subscription.next())
            .await
            .expect("event in time")
            .expect("stream open");
        events.push(event);
    }

    let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            ChangeEventType::Insert,
            ChangeEventType::Update,
            ChangeEventType::Delete
        ]
    );
    assert_eq!(
        events[1].new.as_ref().map(|t| t.status),
        Some(TaskStatus::Completed)
    );
    assert!(events[2].new.is_none());
    assert_eq!(events[2].task_id(), Some(&TaskId::from(1)));

    let join = received.lock().await[0].clone();
    assert_eq!(join["topic"], TOPIC);
    assert_eq!(join["payload"]["access_token"], "user-jwt");

    subscription.unsubscribe();
    server.abort();
}

#[tokio::test]
async fn rejected_join_fails_subscribe() {
    let (base_url, _received, server) =
        start_mock_realtime(JoinBehavior::Reject("Invalid JWT"), Vec::new()).await;

    let err = open(&feed_for(&base_url, |c| c)).await.err().expect("join error");

    match err {
        TaskSyncError::Channel(message) => assert!(message.contains("Invalid JWT")),
        other => panic!("expected channel error, got {:?}", other),
    }
    server.abort();
}

#[tokio::test]
async fn unanswered_join_times_out() {
    let (base_url, _received, server) = start_mock_realtime(JoinBehavior::Ignore, Vec::new()).await;

    let err = open(&feed_for(&base_url, |c| {
        c.with_join_timeout(Duration::from_millis(150))
    }))
    .await
    .err()
    .expect("timeout error");

    assert!(matches!(err, TaskSyncError::Channel(ref m) if m.contains("Timed out")));
    server.abort();
}

#[tokio::test]
async fn unsubscribe_leaves_channel_once() {
    let (base_url, received, server) = start_mock_realtime(JoinBehavior::Accept, Vec::new()).await;

    let mut subscription = open(&feed_for(&base_url, |c| c)).await.expect("subscribe");
    subscription.unsubscribe();
    subscription.unsubscribe();

    assert!(subscription.next().await.is_none());
    assert!(wait_for_event(&received, "phx_leave").await);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let leaves = received
        .lock()
        .await
        .iter()
        .filter(|v| v["event"] == "phx_leave")
        .count();
    assert_eq!(leaves, 1);
    server.abort();
}

#[tokio::test]
async fn heartbeats_keep_the_socket_alive() {
    let (base_url, received, server) = start_mock_realtime(JoinBehavior::Accept, Vec::new()).await;

    let subscription = open(&feed_for(&base_url, |c| {
        c.with_heartbeat_interval(Duration::from_millis(40))
    }))
    .await
    .expect("subscribe");

    assert!(wait_for_event(&received, "heartbeat").await);
    let heartbeat = received
        .lock()
        .await
        .iter()
        .find(|v| v["event"] == "heartbeat")
        .cloned()
        .expect("heartbeat frame");
    assert_eq!(heartbeat["topic"], "phoenix");

    drop(subscription);
    assert!(wait_for_event(&received, "phx_leave").await);
    server.abort();
}

#[tokio::test]
async fn server_close_ends_the_stream() {
    let (base_url, _received, server) = start_mock_realtime(
        JoinBehavior::Accept,
        vec![json!({ "topic": TOPIC, "event": "phx_close", "payload": {}, "ref": null })],
    )
    .await;

    let mut subscription = open(&feed_for(&base_url, |c| c)).await.expect("subscribe");
    let next = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("stream ended in time");

    assert!(next.is_none());
    server.abort();
}

#[tokio::test]
async fn answered_heartbeats_keep_the_stream_open() {
    let (base_url, received, server) = start_mock_realtime(JoinBehavior::Accept, Vec::new()).await;

    let mut subscription = open(&feed_for(&base_url, |c| {
        c.with_heartbeat_interval(Duration::from_millis(30))
    }))
    .await
    .expect("subscribe");

    let next = tokio::time::timeout(Duration::from_millis(250), subscription.next()).await;
    assert!(next.is_err(), "stream should still be pending");
    let heartbeats = received
        .lock()
        .await
        .iter()
        .filter(|v| v["event"] == "heartbeat")
        .count();
    assert!(heartbeats >= 3);

    subscription.unsubscribe();
    server.abort();
}

#[tokio::test]
async fn unanswered_heartbeat_ends_the_stream() {
    let (base_url, received, server) =
        start_mock_realtime_with(JoinBehavior::Accept, Vec::new(), false).await;

    let mut subscription = open(&feed_for(&base_url, |c| {
        c.with_heartbeat_interval(Duration::from_millis(40))
    }))
    .await
    .expect("subscribe");

    let next = tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("stream ended in time");

    assert!(next.is_none());
    assert!(!subscription.is_cancelled());
    assert!(wait_for_event(&received, "heartbeat").await);
    server.abort();
}
