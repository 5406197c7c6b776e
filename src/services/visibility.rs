//! Redaction of gifts, contributions and suggestions per viewer.
//!
//! Everything here is a pure function of the viewer's role and the rows;
//! callers fetch the rows and decide the role.

use crate::auth::Caller;
use crate::models::{Contribution, Gift, GroupGiftSummary, Priority, Suggestion, Wishlist};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Name shown for other people's suggestions
pub const CIRCLE_PLACEHOLDER: &str = "someone from your circle";

/// Name shown when a contributor's user row is gone
pub const UNKNOWN_CONTRIBUTOR: &str = "former member";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerRole {
    Anonymous,
    /// Signed in, not the owner
    Guest(Uuid),
    Owner(Uuid),
}

impl ViewerRole {
    pub fn for_wishlist(caller: &Caller, wishlist: &Wishlist) -> Self {
        match caller.user_id() {
            None => ViewerRole::Anonymous,
            Some(id) if wishlist.is_owned_by(id) => ViewerRole::Owner(id),
            Some(id) => ViewerRole::Guest(id),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match *self {
            ViewerRole::Anonymous => None,
            ViewerRole::Guest(id) | ViewerRole::Owner(id) => Some(id),
        }
    }
}

/// Private lists are only visible to their owner
pub fn can_view_wishlist(role: ViewerRole, wishlist: &Wishlist) -> bool {
    wishlist.is_public || matches!(role, ViewerRole::Owner(_))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PriceView {
    /// Hidden until the viewer signs in
    Locked,
    Unpriced,
    Visible { amount: Decimal, currency: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkView {
    Locked,
    Missing,
    Visible { url: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GiftStatus {
    Available,
    /// `reserved_by` is only filled in for the reserver and for owners of
    /// managed lists
    Reserved {
        reserved_by: Option<Uuid>,
        by_you: bool,
    },
    Funding { fully_funded: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftView {
    pub id: Uuid,
    pub wishlist_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub is_group_gift: bool,
    pub price: PriceView,
    pub link: LinkView,
    pub status: GiftStatus,
    /// Funding progress for signed-in viewers of group gifts
    pub funding: Option<GroupGiftSummary>,
    pub updated_at: NaiveDateTime,
}

pub fn project_gift(
    role: ViewerRole,
    wishlist: &Wishlist,
    gift: &Gift,
    summary: Option<&GroupGiftSummary>,
) -> GiftView {
    let anonymous = role == ViewerRole::Anonymous;

    let price = match gift.target_price {
        _ if anonymous => PriceView::Locked,
        Some(amount) => PriceView::Visible {
            amount,
            currency: gift.currency.clone(),
        },
        None => PriceView::Unpriced,
    };

    let link = match &gift.product_url {
        _ if anonymous => LinkView::Locked,
        Some(url) => LinkView::Visible { url: url.clone() },
        None => LinkView::Missing,
    };

    let status = if gift.is_group_gift {
        GiftStatus::Funding {
            fully_funded: summary.map(|s| s.is_fully_funded).unwrap_or(false),
        }
    } else {
        match gift.reserved_by {
            None => GiftStatus::Available,
            Some(reserver) => {
                let by_you = role.user_id() == Some(reserver);
                let reserved_by = match role {
                    ViewerRole::Owner(_) if wishlist.mode.is_managed() => Some(reserver),
                    ViewerRole::Guest(_) if by_you => Some(reserver),
                    _ => None,
                };
                GiftStatus::Reserved { reserved_by, by_you }
            }
        }
    };

    let funding = match summary {
        Some(summary) if gift.is_group_gift && !anonymous => Some(summary.clone()),
        _ => None,
    };

    GiftView {
        id: gift.id,
        wishlist_id: gift.wishlist_id,
        title: gift.title.clone(),
        description: gift.description.clone(),
        priority: gift.priority,
        is_group_gift: gift.is_group_gift,
        price,
        link,
        status,
        funding,
        updated_at: gift.updated_at,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContributorView {
    Named { user_id: Uuid, name: String },
    Anonymous,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributionView {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub amount: Decimal,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub contributor: ContributorView,
    pub is_own: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Amounts and messages stay visible; the contributor's identity is hidden
/// when the row is anonymous, except from the contributor themself.
pub fn project_contribution(
    viewer: Option<Uuid>,
    contribution: &Contribution,
    names: &HashMap<Uuid, String>,
) -> ContributionView {
    let is_own = viewer == Some(contribution.contributor_id);

    let contributor = if contribution.is_anonymous && !is_own {
        ContributorView::Anonymous
    } else {
        ContributorView::Named {
            user_id: contribution.contributor_id,
            name: names
                .get(&contribution.contributor_id)
                .cloned()
                .unwrap_or_else(|| UNKNOWN_CONTRIBUTOR.to_string()),
        }
    };

    ContributionView {
        id: contribution.id,
        gift_id: contribution.gift_id,
        amount: contribution.amount,
        message: contribution.message.clone(),
        is_anonymous: contribution.is_anonymous,
        contributor,
        is_own,
        created_at: contribution.created_at,
        updated_at: contribution.updated_at,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionView {
    pub id: Uuid,
    pub gift_id: Uuid,
    pub name: String,
    pub is_own: bool,
    pub created_at: NaiveDateTime,
}

/// Only the viewer's own suggestion carries a real name
pub fn project_suggestion(
    viewer: Option<Uuid>,
    suggestion: &Suggestion,
    own_name: Option<&str>,
) -> SuggestionView {
    let is_own = viewer == Some(suggestion.user_id);
    let name = match own_name {
        Some(name) if is_own => name.to_string(),
        _ => CIRCLE_PLACEHOLDER.to_string(),
    };

    SuggestionView {
        id: suggestion.id,
        gift_id: suggestion.gift_id,
        name,
        is_own,
        created_at: suggestion.created_at,
    }
}
