//! Per-resource change feed.
//!
//! One broadcast channel per [`ChannelKey`], created lazily on first
//! subscribe or publish. Publishing never fails the caller: with no
//! subscribers the event is simply dropped.

use super::ChannelKey;
use crate::models::{Contribution, ContributionMessage, Gift, Suggestion, Wishlist};
use chrono::NaiveDateTime;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row carried by a change event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum ChangeRow {
    Gift(Gift),
    Wishlist(Wishlist),
    Contribution(Contribution),
    Suggestion(Suggestion),
    Message(ContributionMessage),
}

impl ChangeRow {
    pub fn id(&self) -> Uuid {
        match self {
            ChangeRow::Gift(g) => g.id,
            ChangeRow::Wishlist(w) => w.id,
            ChangeRow::Contribution(c) => c.id,
            ChangeRow::Suggestion(s) => s.id,
            ChangeRow::Message(m) => m.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub channel: ChannelKey,
    pub kind: ChangeKind,
    pub row: ChangeRow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Someone else asked for the same gift to be pooled
    SuggestionAdded,
    /// A gift the recipient suggested became a group gift
    GiftConverted,
}

/// Message addressed to one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub recipient: Uuid,
    pub gift_id: Uuid,
    pub kind: NoticeKind,
    pub text: String,
    pub created_at: NaiveDateTime,
}

impl Notice {
    pub fn new(recipient: Uuid, gift_id: Uuid, kind: NoticeKind, text: impl Into<String>) -> Self {
        Self {
            recipient,
            gift_id,
            kind,
            text: text.into(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FeedEvent {
    Change(ChangeEvent),
    Notice(Notice),
}

/// Broadcast hub keyed by resource
pub struct ChangeFeed {
    channels: RwLock<HashMap<ChannelKey, broadcast::Sender<FeedEvent>>>,
    buffer_size: usize,
}

impl ChangeFeed {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    async fn sender(&self, key: ChannelKey) -> broadcast::Sender<FeedEvent> {
        if let Some(tx) = self.channels.read().await.get(&key) {
            return tx.clone();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .clone()
    }

    /// Start receiving events published on `key` from now on
    pub async fn subscribe(&self, key: ChannelKey) -> Subscription {
        let rx = self.sender(key).await.subscribe();
        debug!("Subscribed to {}", key);
        Subscription {
            key,
            inner: Some(BroadcastStream::new(rx)),
        }
    }

    /// Returns the number of subscribers that received the event
    pub async fn publish(&self, key: ChannelKey, event: FeedEvent) -> usize {
        let tx = match self.channels.read().await.get(&key) {
            Some(tx) => tx.clone(),
            None => {
                debug!("No subscribers on {}, dropping event", key);
                return 0;
            }
        };

        match tx.send(event) {
            Ok(count) => {
                debug!("Published to {} subscribers on {}", count, key);
                count
            }
            Err(_) => 0,
        }
    }

    pub async fn publish_change(&self, key: ChannelKey, kind: ChangeKind, row: ChangeRow) -> usize {
        let event = FeedEvent::Change(ChangeEvent {
            channel: key,
            kind,
            row,
        });
        self.publish(key, event).await
    }

    pub async fn publish_notice(&self, notice: Notice) -> usize {
        let key = ChannelKey::UserNotices(notice.recipient);
        self.publish(key, FeedEvent::Notice(notice)).await
    }

    pub async fn subscriber_count(&self, key: ChannelKey) -> usize {
        self.channels
            .read()
            .await
            .get(&key)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    /// Drop channels nobody listens to any more; returns how many were removed
    pub async fn prune(&self) -> usize {
        let mut channels = self.channels.write().await;
        let before = channels.len();
        channels.retain(|_, tx| tx.receiver_count() > 0);
        before - channels.len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Live stream of one channel's events.
///
/// Dropping it, or calling [`Subscription::unsubscribe`], releases the
/// underlying receiver. A receiver that falls behind skips the events it
/// missed.
pub struct Subscription {
    key: ChannelKey,
    inner: Option<BroadcastStream<FeedEvent>>,
}

impl Subscription {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// Stop receiving; the stream ends
    pub fn unsubscribe(&mut self) {
        if self.inner.take().is_some() {
            debug!("Unsubscribed from {}", self.key);
        }
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        loop {
            match Pin::new(&mut *inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => return Poll::Ready(Some(event)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!("Subscriber on {} lagged, skipped {} events", this.key, skipped);
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Suggestion;
    use futures::StreamExt;

    fn suggestion_event(key: ChannelKey) -> (Suggestion, ChangeRow) {
        let suggestion = Suggestion::new(key.resource_id(), Uuid::new_v4());
        (suggestion.clone(), ChangeRow::Suggestion(suggestion))
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_change() {
        let feed = ChangeFeed::new(16);
        let key = ChannelKey::GiftSuggestions(Uuid::new_v4());
        let mut sub = feed.subscribe(key).await;

        let (suggestion, row) = suggestion_event(key);
        assert_eq!(feed.publish_change(key, ChangeKind::Insert, row).await, 1);

        match sub.next().await {
            Some(FeedEvent::Change(event)) => {
                assert_eq!(event.kind, ChangeKind::Insert);
                assert_eq!(event.row.id(), suggestion.id);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let feed = ChangeFeed::new(16);
        let key = ChannelKey::GiftMessages(Uuid::new_v4());
        let (_, row) = suggestion_event(key);
        assert_eq!(feed.publish_change(key, ChangeKind::Insert, row).await, 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream_and_prunes() {
        let feed = ChangeFeed::new(16);
        let key = ChannelKey::WishlistGifts(Uuid::new_v4());
        let mut sub = feed.subscribe(key).await;
        assert!(sub.is_active());

        sub.unsubscribe();
        assert!(!sub.is_active());
        assert!(sub.next().await.is_none());
        assert_eq!(feed.subscriber_count(key).await, 0);
        assert_eq!(feed.prune().await, 1);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_missed_events() {
        let feed = ChangeFeed::new(2);
        let key = ChannelKey::GiftSuggestions(Uuid::new_v4());
        let mut sub = feed.subscribe(key).await;

        let mut last = Uuid::nil();
        for _ in 0..5 {
            let (suggestion, row) = suggestion_event(key);
            last = suggestion.id;
            feed.publish_change(key, ChangeKind::Insert, row).await;
        }

        // Only the buffered tail survives
        let mut seen = Vec::new();
        while let Ok(Some(FeedEvent::Change(event))) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.next()).await
        {
            seen.push(event.row.id());
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen.last(), Some(&last));
    }
}
