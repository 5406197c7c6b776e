use crate::error::AppResult;
use crate::realtime::{ChangeFeed, Notice};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Delivery of user-addressed notices.
///
/// Callers treat delivery as best effort: a failure is logged and the
/// operation that triggered it still succeeds.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notices: Vec<Notice>) -> AppResult<()>;
}

/// Publishes each notice on the recipient's `user:{id}:notices` channel
pub struct FeedNotifier {
    feed: Arc<ChangeFeed>,
}

impl FeedNotifier {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self { feed }
    }
}

#[async_trait]
impl Notifier for FeedNotifier {
    async fn notify(&self, notices: Vec<Notice>) -> AppResult<()> {
        for notice in notices {
            let recipient = notice.recipient;
            let delivered = self.feed.publish_notice(notice).await;
            debug!("Notice for {} delivered to {} sessions", recipient, delivered);
        }
        Ok(())
    }
}
