//! Change feed seam and the subscription stream handed to callers.

use async_trait::async_trait;
use futures::Stream;
use log::debug;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use upkeep_core::sync::ChangeEvent;

use crate::error::Result;

/// Which row changes a channel listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    /// `*`, `INSERT`, `UPDATE` or `DELETE`.
    pub event: String,
    pub schema: String,
    pub table: String,
}

impl ChannelFilter {
    pub fn all_events(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            event: "*".to_string(),
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Channel topic name, e.g. `public:tasks`.
    pub fn channel_name(&self) -> String {
        format!("{}:{}", self.schema, self.table)
    }
}

/// Source of normalized change events.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Open a dedicated channel for `filter`.
    ///
    /// Returns once the channel is ready. Events are forwarded in the order the
    /// source emits them until `cancel` fires, after which the channel is
    /// released and the sender dropped.
    async fn open(
        &self,
        filter: &ChannelFilter,
        cancel: CancellationToken,
    ) -> Result<mpsc::UnboundedReceiver<ChangeEvent>>;
}

/// Cancels a subscription from anywhere. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!("[TaskSync] Subscription cancelled");
        }
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the subscription has been cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

/// Ordered stream of change events for one channel.
///
/// Once cancelled the stream ends immediately, even if events were already
/// buffered. Dropping the subscription cancels it.
pub struct ChangeSubscription {
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    handle: SubscriptionHandle,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl ChangeSubscription {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<ChangeEvent>,
        token: CancellationToken,
    ) -> Self {
        Self {
            events,
            cancelled: Box::pin(token.clone().cancelled_owned()),
            handle: SubscriptionHandle { token },
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        self.handle.clone()
    }

    /// Stop delivery and release the channel. Safe to call more than once.
    pub fn unsubscribe(&self) {
        self.handle.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_cancelled()
    }
}

impl Stream for ChangeSubscription {
    type Item = ChangeEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled.as_mut().poll(cx).is_ready() {
            return Poll::Ready(None);
        }
        this.events.poll_recv(cx)
    }
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.handle.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::time::Duration;
    use upkeep_core::tasks::{Task, TaskId};

    fn event(id: i64) -> ChangeEvent {
        ChangeEvent::insert(Task {
            id: Some(TaskId::from(id)),
            ..Task::new("task")
        })
    }

    #[tokio::test]
    async fn delivers_in_order_until_sender_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscription = ChangeSubscription::new(rx, CancellationToken::new());
        tx.send(event(1)).unwrap();
        tx.send(event(2)).unwrap();
        drop(tx);

        let ids: Vec<_> = subscription
            .by_ref()
            .map(|e| e.task_id().cloned())
            .collect()
            .await;
        assert_eq!(ids, vec![Some(TaskId::from(1)), Some(TaskId::from(2))]);
    }

    #[tokio::test]
    async fn buffered_events_are_not_delivered_after_cancel() {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let mut subscription = ChangeSubscription::new(rx, token.clone());
        tx.send(event(1)).unwrap();

        subscription.unsubscribe();
        subscription.unsubscribe();

        assert!(subscription.next().await.is_none());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_wakes_a_pending_consumer() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let mut subscription = ChangeSubscription::new(rx, CancellationToken::new());
        let handle = subscription.handle();

        let waiter = tokio::spawn(async move { subscription.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();

        let next = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("consumer woke up")
            .expect("join");
        assert!(next.is_none());
    }

    #[test]
    fn drop_cancels_token() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        drop(ChangeSubscription::new(rx, token.clone()));
        assert!(token.is_cancelled());
    }
}
