use crate::auth::Caller;
use crate::error::{AppError, AppResult};
use crate::models::{Gift, Suggestion};
use crate::realtime::{ChangeFeed, ChangeKind, ChangeRow, ChannelKey, NoticeKind};
use crate::repositories::Repositories;
use crate::services::audit::AuditTrailService;
use crate::services::load_gift_with_wishlist;
use crate::services::suggestion_service::SuggestionRegistry;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const DEFAULT_CONVERSION_THRESHOLD: usize = 2;

/// True once enough distinct users asked for the gift to be pooled
pub fn should_convert(count: usize, threshold: usize) -> bool {
    count >= threshold
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Converted(Gift),
    /// Someone else flipped it first; nothing was written or published
    AlreadyConverted,
}

impl ConversionOutcome {
    pub fn is_converted(&self) -> bool {
        matches!(self, ConversionOutcome::Converted(_))
    }
}

/// Result of agreeing to a suggestion
#[derive(Debug, Clone)]
pub struct AgreeOutcome {
    pub suggestion: Suggestion,
    pub suggestion_count: usize,
    /// `None` when the threshold was not met, or when the conversion itself
    /// failed after the suggestion was stored
    pub conversion: Option<ConversionOutcome>,
}

/// Turns ordinary gifts into group gifts
pub struct ConversionPolicy {
    repos: Repositories,
    feed: Arc<ChangeFeed>,
    registry: Arc<SuggestionRegistry>,
    audit: Option<Arc<AuditTrailService>>,
    threshold: usize,
}

impl ConversionPolicy {
    pub fn new(repos: Repositories, feed: Arc<ChangeFeed>, registry: Arc<SuggestionRegistry>) -> Self {
        Self {
            repos,
            feed,
            registry,
            audit: None,
            threshold: DEFAULT_CONVERSION_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_audit(mut self, audit: Option<Arc<AuditTrailService>>) -> Self {
        self.audit = audit;
        self
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn should_convert(&self, count: usize) -> bool {
        should_convert(count, self.threshold)
    }

    /// One-way flip to a group gift; clears any reservation
    pub async fn convert(&self, gift_id: Uuid) -> AppResult<ConversionOutcome> {
        self.convert_as(gift_id, None, "suggestions").await
    }

    /// The wishlist owner pools a gift directly
    pub async fn convert_by_owner(&self, caller: &Caller, gift_id: Uuid) -> AppResult<ConversionOutcome> {
        let user = caller.require_user()?;
        let (_, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !wishlist.is_owned_by(user.id) {
            return Err(AppError::Forbidden(
                "Only the wishlist owner can turn a gift into a group gift".into(),
            ));
        }

        self.convert_as(gift_id, Some(user.id), "owner").await
    }

    /// Record the caller's suggestion, then convert if that met the threshold.
    ///
    /// The suggestion is stored before anything else happens, so a failed
    /// conversion leaves it in place.
    pub async fn agree(&self, caller: &Caller, gift_id: Uuid) -> AppResult<AgreeOutcome> {
        let suggestion = self.registry.suggest(caller, gift_id).await?;
        let suggestion_count = self.registry.count(gift_id).await?;

        let conversion = if self.should_convert(suggestion_count) {
            match self.convert(gift_id).await {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(
                        "Conversion of gift {} failed after {} suggestions: {}",
                        gift_id, suggestion_count, e
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(AgreeOutcome {
            suggestion,
            suggestion_count,
            conversion,
        })
    }

    async fn convert_as(
        &self,
        gift_id: Uuid,
        actor: Option<Uuid>,
        trigger: &str,
    ) -> AppResult<ConversionOutcome> {
        let Some(gift) = self.repos.gifts.mark_group_gift(gift_id).await? else {
            info!("Gift {} is already a group gift", gift_id);
            return Ok(ConversionOutcome::AlreadyConverted);
        };

        info!("Gift {} converted to a group gift ({})", gift_id, trigger);

        self.feed
            .publish_change(
                ChannelKey::WishlistGifts(gift.wishlist_id),
                ChangeKind::Update,
                ChangeRow::Gift(gift.clone()),
            )
            .await;

        let excluded: Vec<Uuid> = actor.into_iter().collect();
        self.registry
            .notify_other_suggesters(
                gift_id,
                &excluded,
                NoticeKind::GiftConverted,
                format!("\"{}\" is now a group gift; you can chip in", gift.title),
            )
            .await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_conversion(&gift, actor, trigger).await {
                warn!("Failed to audit conversion of gift {}: {}", gift_id, e);
            }
        }

        Ok(ConversionOutcome::Converted(gift))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_convert_at_threshold() {
        assert!(!should_convert(0, 2));
        assert!(!should_convert(1, 2));
        assert!(should_convert(2, 2));
        assert!(should_convert(5, 2));
        assert!(should_convert(1, 1));
    }
}
