use crate::auth::Caller;
use crate::error::{AppError, AppResult, RepositoryError};
use crate::models::Suggestion;
use crate::realtime::{ChangeFeed, ChangeKind, ChangeRow, ChannelKey, Notice, NoticeKind};
use crate::repositories::Repositories;
use crate::services::notifier::Notifier;
use crate::services::visibility::{can_view_wishlist, project_suggestion, SuggestionView, ViewerRole};
use crate::services::load_gift_with_wishlist;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// "Make this a group gift" proposals for ordinary gifts
pub struct SuggestionRegistry {
    repos: Repositories,
    feed: Arc<ChangeFeed>,
    notifier: Arc<dyn Notifier>,
}

impl SuggestionRegistry {
    pub fn new(repos: Repositories, feed: Arc<ChangeFeed>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            repos,
            feed,
            notifier,
        }
    }

    /// Records the caller's agreement to chip in.
    ///
    /// Everyone watching the gift learns of it through the change published on
    /// `gift:{id}:suggestions`. Direct notices only go to people who suggested
    /// the same gift earlier, so the first suggestion sends none.
    pub async fn suggest(&self, caller: &Caller, gift_id: Uuid) -> AppResult<Suggestion> {
        let user = caller.require_user()?;
        let (gift, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if gift.is_group_gift {
            return Err(AppError::AlreadyGroupGift);
        }
        if !wishlist.is_public {
            return Err(AppError::NotPublic);
        }
        if wishlist.is_owned_by(user.id) {
            return Err(AppError::OwnGift);
        }
        if self.repos.suggestions.exists(gift_id, user.id).await? {
            return Err(AppError::DuplicateSuggestion);
        }

        let suggestion = self
            .repos
            .suggestions
            .insert(gift_id, user.id)
            .await
            .map_err(|e| match e {
                RepositoryError::Duplicate(_) => AppError::DuplicateSuggestion,
                RepositoryError::Conflict(_) => AppError::AlreadyGroupGift,
                other => other.into(),
            })?;

        info!("Suggestion recorded: gift={}, user={}", gift_id, user.id);

        self.feed
            .publish_change(
                ChannelKey::GiftSuggestions(gift_id),
                ChangeKind::Insert,
                ChangeRow::Suggestion(suggestion.clone()),
            )
            .await;

        self.notify_other_suggesters(
            gift_id,
            &[user.id, wishlist.owner_id],
            NoticeKind::SuggestionAdded,
            format!("Someone else would also like to chip in on \"{}\"", gift.title),
        )
        .await;

        Ok(suggestion)
    }

    pub async fn count(&self, gift_id: Uuid) -> AppResult<usize> {
        Ok(self.repos.suggestions.count_by_gift(gift_id).await?)
    }

    pub async fn has_suggested(&self, gift_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        Ok(self.repos.suggestions.exists(gift_id, user_id).await?)
    }

    /// Withdraw the caller's own suggestion; a no-op when there is none
    pub async fn remove(&self, caller: &Caller, gift_id: Uuid) -> AppResult<()> {
        let user = caller.require_user()?;

        if let Some(removed) = self.repos.suggestions.delete(gift_id, user.id).await? {
            info!("Suggestion withdrawn: gift={}, user={}", gift_id, user.id);
            self.feed
                .publish_change(
                    ChannelKey::GiftSuggestions(gift_id),
                    ChangeKind::Delete,
                    ChangeRow::Suggestion(removed),
                )
                .await;
        }

        Ok(())
    }

    /// Suggestions oldest first; only the caller's own one is named
    pub async fn list_with_names(
        &self,
        caller: &Caller,
        gift_id: Uuid,
    ) -> AppResult<Vec<SuggestionView>> {
        let (_, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !can_view_wishlist(ViewerRole::for_wishlist(caller, &wishlist), &wishlist) {
            return Err(AppError::NotPublic);
        }

        let own_name = caller.current_user().map(|u| u.label());
        let suggestions = self.repos.suggestions.list_by_gift(gift_id).await?;

        Ok(suggestions
            .iter()
            .map(|s| project_suggestion(caller.user_id(), s, own_name.as_deref()))
            .collect())
    }

    /// Best effort: failures are logged and swallowed
    pub(crate) async fn notify_other_suggesters(
        &self,
        gift_id: Uuid,
        excluded: &[Uuid],
        kind: NoticeKind,
        text: String,
    ) {
        let suggestions = match self.repos.suggestions.list_by_gift(gift_id).await {
            Ok(suggestions) => suggestions,
            Err(e) => {
                warn!("Could not load suggesters of gift {} for notices: {}", gift_id, e);
                return;
            }
        };

        let notices: Vec<Notice> = suggestions
            .iter()
            .filter(|s| !excluded.contains(&s.user_id))
            .map(|s| Notice::new(s.user_id, gift_id, kind, text.clone()))
            .collect();

        if notices.is_empty() {
            return;
        }

        let count = notices.len();
        match self.notifier.notify(notices).await {
            Ok(()) => info!("Notified {} suggesters of gift {}", count, gift_id),
            Err(e) => warn!("Failed to notify suggesters of gift {}: {}", gift_id, e),
        }
    }
}
