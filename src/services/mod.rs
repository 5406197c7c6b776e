pub mod audit;
pub mod conversion_service;
pub mod ledger_service;
pub mod messaging_service;
pub mod notifier;
pub mod suggestion_service;
pub mod visibility;
pub mod wishlist_service;

pub use audit::AuditTrailService;
pub use conversion_service::{AgreeOutcome, ConversionOutcome, ConversionPolicy};
pub use ledger_service::ContributionLedger;
pub use messaging_service::MessagingService;
pub use notifier::{FeedNotifier, Notifier};
pub use suggestion_service::SuggestionRegistry;
pub use wishlist_service::WishlistService;

use crate::error::{option_to_result, AppError, AppResult};
use crate::models::{Gift, Wishlist};
use crate::repositories::Repositories;
use std::collections::HashMap;
use uuid::Uuid;

pub(crate) async fn load_gift(repos: &Repositories, gift_id: Uuid) -> AppResult<Gift> {
    option_to_result(repos.gifts.find_by_id(gift_id).await?, "Gift not found")
}

/// Gift plus the wishlist it sits on
pub(crate) async fn load_gift_with_wishlist(
    repos: &Repositories,
    gift_id: Uuid,
) -> AppResult<(Gift, Wishlist)> {
    let gift = load_gift(repos, gift_id).await?;
    let wishlist = repos
        .wishlists
        .find_by_id(gift.wishlist_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Wishlist not found".into()))?;

    Ok((gift, wishlist))
}

pub(crate) async fn display_names(
    repos: &Repositories,
    user_ids: &[Uuid],
) -> AppResult<HashMap<Uuid, String>> {
    let users = repos.users.find_many(user_ids).await?;
    Ok(users.into_iter().map(|u| (u.id, u.label())).collect())
}
