//! Giftpool Backend Library
//!
//! Group-gift funding and collaborative suggestions for shared wishlists,
//! exposed for the binary, tests and other consumers.

pub mod auth;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod realtime;
pub mod repositories;
pub mod services;
pub mod websocket;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult};

use config::PolicyConfig;
use realtime::{ChangeFeed, Projector};
use repositories::{MemoryStore, Repositories};
use services::{
    AuditTrailService, ContributionLedger, ConversionPolicy, FeedNotifier, MessagingService,
    Notifier, SuggestionRegistry, WishlistService,
};
use std::sync::Arc;

/// Application state containing the repositories and every service
#[derive(Clone)]
pub struct AppState {
    pub repos: Repositories,
    pub feed: Arc<ChangeFeed>,
    pub ledger: Arc<ContributionLedger>,
    pub suggestions: Arc<SuggestionRegistry>,
    pub conversion: Arc<ConversionPolicy>,
    pub messaging: Arc<MessagingService>,
    pub wishlists: Arc<WishlistService>,
    pub projector: Projector,
}

impl AppState {
    /// Wire the services over `repos`, delivering notices on the change feed
    pub fn new(
        repos: Repositories,
        policy: &PolicyConfig,
        audit: Option<Arc<AuditTrailService>>,
    ) -> Self {
        let feed = Arc::new(ChangeFeed::new(policy.feed_buffer_size));
        let notifier: Arc<dyn Notifier> = Arc::new(FeedNotifier::new(feed.clone()));
        Self::with_notifier(repos, feed, notifier, policy, audit)
    }

    pub fn with_notifier(
        repos: Repositories,
        feed: Arc<ChangeFeed>,
        notifier: Arc<dyn Notifier>,
        policy: &PolicyConfig,
        audit: Option<Arc<AuditTrailService>>,
    ) -> Self {
        let suggestions = Arc::new(SuggestionRegistry::new(repos.clone(), feed.clone(), notifier));

        let conversion = ConversionPolicy::new(repos.clone(), feed.clone(), suggestions.clone())
            .with_threshold(policy.conversion_threshold)
            .with_audit(audit.clone());

        let ledger = ContributionLedger::new(repos.clone(), feed.clone()).with_audit(audit);

        Self {
            ledger: Arc::new(ledger),
            suggestions,
            conversion: Arc::new(conversion),
            messaging: Arc::new(MessagingService::new(repos.clone(), feed.clone())),
            wishlists: Arc::new(WishlistService::new(repos.clone(), feed.clone())),
            projector: Projector::new(repos.clone()),
            repos,
            feed,
        }
    }

    /// State over a fresh in-memory store
    pub fn in_memory(policy: &PolicyConfig) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let state = Self::new(Repositories::in_memory(store.clone()), policy, None);
        (state, store)
    }
}
