//! Local reconciliation of change events into an ordered row list.

use super::{ChangeEvent, ChangeKind, ChangeRow, FeedEvent, Subscription};
use crate::models::{Contribution, ContributionMessage, Gift, Suggestion, Wishlist};
use chrono::NaiveDateTime;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

/// Row type a [`LiveView`] can hold
pub trait LiveRow: Clone + Send + Sync + 'static {
    fn id(&self) -> Uuid;

    /// Rows with an older revision never overwrite newer ones
    fn revision(&self) -> NaiveDateTime;

    fn from_change(row: &ChangeRow) -> Option<Self>;
}

impl LiveRow for Gift {
    fn id(&self) -> Uuid {
        self.id
    }

    fn revision(&self) -> NaiveDateTime {
        self.updated_at
    }

    fn from_change(row: &ChangeRow) -> Option<Self> {
        match row {
            ChangeRow::Gift(gift) => Some(gift.clone()),
            _ => None,
        }
    }
}

impl LiveRow for Wishlist {
    fn id(&self) -> Uuid {
        self.id
    }

    fn revision(&self) -> NaiveDateTime {
        self.updated_at
    }

    fn from_change(row: &ChangeRow) -> Option<Self> {
        match row {
            ChangeRow::Wishlist(wishlist) => Some(wishlist.clone()),
            _ => None,
        }
    }
}

impl LiveRow for Contribution {
    fn id(&self) -> Uuid {
        self.id
    }

    fn revision(&self) -> NaiveDateTime {
        self.updated_at
    }

    fn from_change(row: &ChangeRow) -> Option<Self> {
        match row {
            ChangeRow::Contribution(contribution) => Some(contribution.clone()),
            _ => None,
        }
    }
}

impl LiveRow for Suggestion {
    fn id(&self) -> Uuid {
        self.id
    }

    fn revision(&self) -> NaiveDateTime {
        self.created_at
    }

    fn from_change(row: &ChangeRow) -> Option<Self> {
        match row {
            ChangeRow::Suggestion(suggestion) => Some(suggestion.clone()),
            _ => None,
        }
    }
}

impl LiveRow for ContributionMessage {
    fn id(&self) -> Uuid {
        self.id
    }

    fn revision(&self) -> NaiveDateTime {
        self.created_at
    }

    fn from_change(row: &ChangeRow) -> Option<Self> {
        match row {
            ChangeRow::Message(message) => Some(message.clone()),
            _ => None,
        }
    }
}

/// Ordered rows kept in step with a change feed.
///
/// Inserts prepend when the id is new. Updates replace by id, or prepend when
/// the id is not held yet. Deletes remove by id, so applying the same event twice leaves the same state as
/// applying it once. Once detached, further events are ignored.
#[derive(Debug, Clone)]
pub struct LiveView<T> {
    items: Vec<T>,
    attached: bool,
}

impl<T: LiveRow> LiveView<T> {
    pub fn new(initial: Vec<T>) -> Self {
        Self {
            items: initial,
            attached: true,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    pub fn detach(&mut self) {
        self.attached = false;
    }

    /// Returns whether the view changed
    pub fn apply(&mut self, kind: ChangeKind, row: T) -> bool {
        if !self.attached {
            return false;
        }

        match kind {
            ChangeKind::Insert => {
                if self.get(row.id()).is_some() {
                    return false;
                }
                self.items.insert(0, row);
                true
            }
            ChangeKind::Update => {
                // The row may predate the snapshot this view started from
                let Some(slot) = self.items.iter_mut().find(|item| item.id() == row.id()) else {
                    self.items.insert(0, row);
                    return true;
                };
                if row.revision() < slot.revision() {
                    debug!("Ignoring stale update for {}", row.id());
                    return false;
                }
                *slot = row;
                true
            }
            ChangeKind::Delete => {
                let before = self.items.len();
                let id = row.id();
                self.items.retain(|item| item.id() != id);
                self.items.len() != before
            }
        }
    }

    /// Apply a feed event; events for other row types are ignored
    pub fn apply_event(&mut self, event: &ChangeEvent) -> bool {
        match T::from_change(&event.row) {
            Some(row) => self.apply(event.kind, row),
            None => false,
        }
    }
}

/// A [`LiveView`] folded from a subscription by a background task
pub struct ViewSession<T> {
    view: Arc<RwLock<LiveView<T>>>,
    task: JoinHandle<()>,
}

impl<T: LiveRow> ViewSession<T> {
    pub fn start(initial: Vec<T>, mut subscription: Subscription) -> Self {
        let view = Arc::new(RwLock::new(LiveView::new(initial)));
        let folded = view.clone();
        let key = subscription.key();

        let task = tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let FeedEvent::Change(change) = event else {
                    continue;
                };

                let mut view = folded.write().await;
                if !view.is_attached() {
                    break;
                }
                view.apply_event(&change);
            }
            debug!("View session on {} finished", key);
        });

        Self { view, task }
    }

    pub async fn snapshot(&self) -> Vec<T> {
        self.view.read().await.items().to_vec()
    }

    pub fn view(&self) -> Arc<RwLock<LiveView<T>>> {
        self.view.clone()
    }

    /// Detach the view and release the subscription
    pub async fn close(self) {
        self.view.write().await.detach();
        self.task.abort();
    }
}
