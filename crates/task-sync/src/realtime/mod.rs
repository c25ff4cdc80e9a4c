//! Change feed over the hosted realtime websocket.
//!
//! Every `open` call gets its own socket and channel. A background task owns
//! the socket, keeps it alive with heartbeats and forwards normalized events
//! until the subscription is cancelled or the server ends the channel. A
//! heartbeat still unanswered when the next one is due ends the channel too.

mod protocol;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use upkeep_core::sync::ChangeEvent;

use crate::error::{Result, TaskSyncError};
use crate::feed::{ChangeFeed, ChannelFilter};
use crate::remote::RemoteClient;

use protocol::{classify, Inbound, PhoenixMessage, RefCounter, PHOENIX_TOPIC, PHX_REPLY};

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`ChangeFeed`] backed by Phoenix channels on the realtime service.
#[derive(Debug, Clone)]
pub struct RealtimeChangeFeed {
    remote: Arc<RemoteClient>,
}

impl RealtimeChangeFeed {
    pub fn new(remote: Arc<RemoteClient>) -> Self {
        Self { remote }
    }
}

#[async_trait]
impl ChangeFeed for RealtimeChangeFeed {
    async fn open(
        &self,
        filter: &ChannelFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>> {
        let config = self.remote.config();
        let url = config.realtime_url()?;
        let topic = format!("realtime:{}", filter.channel_name());
        debug!("[TaskSync] Connecting realtime channel {}", topic);

        let (mut socket, _) = connect_async(url.as_str()).await?;
        let mut refs = RefCounter::default();
        let join_ref = refs.next_ref();
        let join = PhoenixMessage::join(&topic, filter, config.bearer_token(), &join_ref);
        socket.send(Message::Text(join.to_text()?)).await?;

        let joined = match timeout(
            config.join_timeout,
            await_join_reply(&mut socket, &topic, &join_ref),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TaskSyncError::channel(format!(
                "Timed out joining {} after {:?}",
                topic, config.join_timeout
            ))),
        };
        if let Err(err) = joined {
            let _ = socket.close(None).await;
            return Err(err);
        }
        debug!("[TaskSync] Joined realtime channel {}", topic);

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = JoinedChannel {
            socket,
            topic,
            join_ref,
            refs,
            heartbeat_interval: config.heartbeat_interval,
            pending_heartbeat: None,
        };
        tokio::spawn(channel.run(tx, cancel));
        Ok(rx)
    }
}

async fn await_join_reply(socket: &mut RealtimeSocket, topic: &str, join_ref: &str) -> Result<()> {
    while let Some(frame) = socket.next().await {
        let text = match frame? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let message = match PhoenixMessage::parse(&text) {
            Ok(message) => message,
            Err(err) => {
                warn!("[TaskSync] Ignoring unparseable realtime frame: {}", err);
                continue;
            }
        };
        match classify(message, topic) {
            Inbound::Reply {
                msg_ref,
                ok,
                reason,
            } if msg_ref.as_deref() == Some(join_ref) => {
                return if ok {
                    Ok(())
                } else {
                    Err(TaskSyncError::channel(format!(
                        "Join of {} rejected: {}",
                        topic, reason
                    )))
                };
            }
            Inbound::ChannelError(reason) => {
                return Err(TaskSyncError::channel(format!(
                    "Channel {} errored during join: {}",
                    topic, reason
                )));
            }
            Inbound::ChannelClosed => break,
            _ => {}
        }
    }
    Err(TaskSyncError::channel(format!(
        "Socket closed before join of {} was acknowledged",
        topic
    )))
}

struct JoinedChannel {
    socket: RealtimeSocket,
    topic: String,
    join_ref: String,
    refs: RefCounter,
    heartbeat_interval: Duration,
    /// Ref of the last heartbeat the server has not answered yet.
    pending_heartbeat: Option<String>,
}

impl JoinedChannel {
    async fn run(mut self, tx: mpsc::UnboundedSender<ChangeEvent>, cancel: CancellationToken) {
        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.leave().await;
                    break;
                }
                _ = tx.closed() => {
                    self.leave().await;
                    break;
                }
                _ = heartbeat.tick() => {
                    if let Some(missed) = self.pending_heartbeat.take() {
                        warn!(
                            "[TaskSync] Heartbeat {} on {} was not answered, dropping connection",
                            missed, self.topic
                        );
                        break;
                    }
                    let heartbeat_ref = self.refs.next_ref();
                    let frame = PhoenixMessage::heartbeat(&heartbeat_ref);
                    if let Err(err) = self.send(&frame).await {
                        warn!("[TaskSync] Heartbeat on {} failed: {}", self.topic, err);
                        break;
                    }
                    self.pending_heartbeat = Some(heartbeat_ref);
                }
                frame = self.socket.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => {
                            debug!("[TaskSync] Realtime socket for {} closed", self.topic);
                            break;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(err)) => {
                            warn!("[TaskSync] Realtime socket for {} failed: {}", self.topic, err);
                            break;
                        }
                    };
                    if !self.forward(&text, &tx) {
                        break;
                    }
                }
            }
        }
        debug!("[TaskSync] Realtime channel {} stopped", self.topic);
    }

    /// Handle one text frame. Returns false when the channel is over.
    fn forward(&mut self, text: &str, tx: &mpsc::UnboundedSender<ChangeEvent>) -> bool {
        let message = match PhoenixMessage::parse(text) {
            Ok(message) => message,
            Err(err) => {
                warn!("[TaskSync] Ignoring unparseable realtime frame: {}", err);
                return true;
            }
        };
        if message.topic == PHOENIX_TOPIC && message.event == PHX_REPLY {
            if message.msg_ref.is_some() && message.msg_ref == self.pending_heartbeat {
                self.pending_heartbeat = None;
            }
            return true;
        }
        match classify(message, &self.topic) {
            Inbound::Change(change) => match change.normalize() {
                Ok(event) => tx.send(event).is_ok(),
                Err(err) => {
                    warn!("[TaskSync] Dropping change notification: {}", err);
                    true
                }
            },
            Inbound::MalformedChange(reason) => {
                warn!("[TaskSync] Dropping malformed change notification: {}", reason);
                true
            }
            Inbound::ChannelError(reason) => {
                warn!("[TaskSync] Channel {} errored: {}", self.topic, reason);
                false
            }
            Inbound::ChannelClosed => {
                debug!("[TaskSync] Channel {} closed by server", self.topic);
                false
            }
            Inbound::Reply { .. } | Inbound::Other => true,
        }
    }

    async fn send(&mut self, message: &PhoenixMessage) -> Result<()> {
        self.socket.send(Message::Text(message.to_text()?)).await?;
        Ok(())
    }

    async fn leave(&mut self) {
        let leave = PhoenixMessage::leave(&self.topic, &self.refs.next_ref(), &self.join_ref);
        if let Err(err) = self.send(&leave).await {
            debug!("[TaskSync] Leaving {} failed: {}", self.topic, err);
        }
        let _ = self.socket.close(None).await;
        debug!("[TaskSync] Left realtime channel {}", self.topic);
    }
}

#[cfg(test)]
mod tests;
