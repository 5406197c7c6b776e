use crate::auth::Caller;
use crate::error::{AppError, AppResult, RepositoryError};
use crate::models::contribution::{remaining, total_excluding};
use crate::models::{
    Contribution, ContributionDraft, ContributionPatch, Gift, GroupGiftSummary, UpsertOutcome,
};
use crate::realtime::{ChangeFeed, ChangeKind, ChangeRow, ChannelKey};
use crate::repositories::Repositories;
use crate::services::audit::AuditTrailService;
use crate::services::visibility::{
    can_view_wishlist, project_contribution, ContributionView, ViewerRole,
};
use crate::services::{display_names, load_gift, load_gift_with_wishlist};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Money pledged toward group gifts.
///
/// Every write is checked twice: here against freshly read rows, and again
/// by the store while it holds the gift, which is what actually keeps the
/// total at or under the target when writers race.
pub struct ContributionLedger {
    repos: Repositories,
    feed: Arc<ChangeFeed>,
    audit: Option<Arc<AuditTrailService>>,
}

impl ContributionLedger {
    pub fn new(repos: Repositories, feed: Arc<ChangeFeed>) -> Self {
        Self {
            repos,
            feed,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Option<Arc<AuditTrailService>>) -> Self {
        self.audit = audit;
        self
    }

    /// Funding progress, recomputed from the current rows
    pub async fn get_summary(&self, gift_id: Uuid) -> AppResult<GroupGiftSummary> {
        let gift = load_gift(&self.repos, gift_id).await?;
        let contributions = self.repos.contributions.list_by_gift(gift_id).await?;

        Ok(GroupGiftSummary::compute(
            gift.id,
            gift.target_price,
            &gift.currency,
            &contributions,
        ))
    }

    /// Pledge `amount` toward a group gift.
    ///
    /// A second pledge by the same user replaces their first one.
    pub async fn contribute(
        &self,
        caller: &Caller,
        gift_id: Uuid,
        amount: Decimal,
        message: Option<String>,
        is_anonymous: bool,
    ) -> AppResult<Contribution> {
        let user = caller.require_user()?;
        validate_amount(amount)?;

        let (gift, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        if !can_view_wishlist(ViewerRole::for_wishlist(caller, &wishlist), &wishlist) {
            return Err(AppError::NotPublic);
        }
        if !gift.is_group_gift {
            return Err(AppError::NotGroupGift);
        }
        if wishlist.is_owned_by(user.id) {
            return Err(AppError::OwnerCannotContribute);
        }
        let target = gift.target_price.ok_or(AppError::MissingTarget)?;

        let existing = self.repos.contributions.list_by_gift(gift_id).await?;
        let others = total_excluding(&existing, user.id);
        if others + amount > target {
            return Err(AppError::ExceedsTarget {
                remaining: remaining(target, others),
                currency: gift.currency.clone(),
            });
        }

        let draft = ContributionDraft {
            gift_id,
            contributor_id: user.id,
            amount,
            message: normalize_message(message),
            is_anonymous,
        };

        let (contribution, outcome) = self
            .repos
            .contributions
            .upsert_checked(&draft)
            .await
            .map_err(|e| write_error(e, &gift))?;

        info!(
            "Contribution {:?}: gift={}, contributor={}, amount={} {}",
            outcome, gift_id, user.id, amount, gift.currency
        );

        let kind = match outcome {
            UpsertOutcome::Inserted => ChangeKind::Insert,
            UpsertOutcome::Updated => ChangeKind::Update,
        };
        self.publish(kind, &contribution).await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_contribution(&contribution, outcome).await {
                warn!("Failed to audit contribution {}: {}", contribution.id, e);
            }
        }

        Ok(contribution)
    }

    /// Edit the caller's own contribution
    pub async fn update_contribution(
        &self,
        caller: &Caller,
        contribution_id: Uuid,
        mut patch: ContributionPatch,
    ) -> AppResult<Contribution> {
        let user = caller.require_user()?;

        let current = self
            .repos
            .contributions
            .find_by_id(contribution_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Contribution not found".into()))?;

        if current.contributor_id != user.id {
            return Err(AppError::Forbidden(
                "Only the contributor can edit a contribution".into(),
            ));
        }

        let gift = load_gift(&self.repos, current.gift_id).await?;

        if let Some(amount) = patch.amount {
            validate_amount(amount)?;
            let target = gift.target_price.ok_or(AppError::MissingTarget)?;

            let existing = self.repos.contributions.list_by_gift(gift.id).await?;
            let others = total_excluding(&existing, user.id);
            if others + amount > target {
                return Err(AppError::ExceedsTarget {
                    remaining: remaining(target, others),
                    currency: gift.currency.clone(),
                });
            }
        }

        patch.message = patch.message.map(normalize_message);

        let updated = self
            .repos
            .contributions
            .update_checked(contribution_id, &patch)
            .await
            .map_err(|e| write_error(e, &gift))?;

        info!(
            "Contribution updated: id={}, gift={}, amount={}",
            updated.id, updated.gift_id, updated.amount
        );

        self.publish(ChangeKind::Update, &updated).await;

        Ok(updated)
    }

    /// Withdraw the caller's contribution. Withdrawing one that is already
    /// gone succeeds; the gift stays a group gift either way.
    pub async fn delete_contribution(&self, caller: &Caller, contribution_id: Uuid) -> AppResult<()> {
        let user = caller.require_user()?;

        let Some(current) = self.repos.contributions.find_by_id(contribution_id).await? else {
            return Ok(());
        };

        if current.contributor_id != user.id {
            return Err(AppError::Forbidden(
                "Only the contributor can withdraw a contribution".into(),
            ));
        }

        let Some(removed) = self.repos.contributions.delete(contribution_id).await? else {
            return Ok(());
        };

        info!(
            "Contribution withdrawn: id={}, gift={}, amount={}",
            removed.id, removed.gift_id, removed.amount
        );

        self.publish(ChangeKind::Delete, &removed).await;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_withdrawal(&removed).await {
                warn!("Failed to audit withdrawal {}: {}", removed.id, e);
            }
        }

        Ok(())
    }

    /// Contributions of a gift as the caller may see them, oldest first
    pub async fn list_contributions(
        &self,
        caller: &Caller,
        gift_id: Uuid,
    ) -> AppResult<Vec<ContributionView>> {
        let (_, wishlist) = load_gift_with_wishlist(&self.repos, gift_id).await?;

        let role = ViewerRole::for_wishlist(caller, &wishlist);
        if !can_view_wishlist(role, &wishlist) {
            return Err(AppError::NotPublic);
        }
        // Signed-out viewers only get the gift's coarse funding state
        if role == ViewerRole::Anonymous {
            return Err(AppError::Unauthenticated);
        }

        let contributions = self.repos.contributions.list_by_gift(gift_id).await?;
        let ids: Vec<Uuid> = contributions.iter().map(|c| c.contributor_id).collect();
        let names = display_names(&self.repos, &ids).await?;

        Ok(contributions
            .iter()
            .map(|c| project_contribution(caller.user_id(), c, &names))
            .collect())
    }

    async fn publish(&self, kind: ChangeKind, contribution: &Contribution) {
        self.feed
            .publish_change(
                ChannelKey::GiftContributions(contribution.gift_id),
                kind,
                ChangeRow::Contribution(contribution.clone()),
            )
            .await;
    }
}

/// Amounts are positive with at most two decimal places
fn validate_amount(amount: Decimal) -> AppResult<()> {
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidAmount(
            "Amount must be greater than zero".into(),
        ));
    }
    if amount.normalize().scale() > 2 {
        return Err(AppError::InvalidAmount(
            "Amount can have at most two decimal places".into(),
        ));
    }
    Ok(())
}

fn normalize_message(message: Option<String>) -> Option<String> {
    message
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

/// Translate a rejected write into what the caller did wrong
fn write_error(err: RepositoryError, gift: &Gift) -> AppError {
    match err {
        RepositoryError::TargetExceeded { remaining } => AppError::ExceedsTarget {
            remaining,
            currency: gift.currency.clone(),
        },
        RepositoryError::Duplicate(_) => AppError::DuplicateContribution,
        RepositoryError::Conflict(_) if gift.is_group_gift => AppError::MissingTarget,
        RepositoryError::Conflict(_) => AppError::NotGroupGift,
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(Decimal::new(150, 0)).is_ok());
        assert!(validate_amount(Decimal::new(9999, 2)).is_ok());
        assert!(matches!(
            validate_amount(Decimal::ZERO),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_amount(Decimal::new(-5, 0)),
            Err(AppError::InvalidAmount(_))
        ));
        assert!(matches!(
            validate_amount(Decimal::new(1005, 3)),
            Err(AppError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_blank_message_is_dropped() {
        assert_eq!(normalize_message(Some("   ".into())), None);
        assert_eq!(normalize_message(Some(" hi ".into())), Some("hi".into()));
    }
}
