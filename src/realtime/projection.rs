//! Per-viewer redaction of feed events before they leave the process.

use super::{ChangeKind, ChangeRow, ChannelKey, FeedEvent, Notice};
use crate::auth::Caller;
use crate::error::AppResult;
use crate::models::{ContributionMessage, Gift, GroupGiftSummary, Wishlist};
use crate::repositories::Repositories;
use crate::services::messaging_service::can_use_messages;
use crate::services::visibility::{
    can_view_wishlist, project_contribution, project_gift, project_suggestion, ContributionView,
    GiftView, SuggestionView, ViewerRole,
};
use crate::services::display_names;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "table", content = "row", rename_all = "snake_case")]
pub enum ViewPayload {
    Gift(GiftView),
    Wishlist(Wishlist),
    Contribution(ContributionView),
    Suggestion(SuggestionView),
    Message(ContributionMessage),
}

/// What a viewer is sent for one feed event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    Change {
        channel: ChannelKey,
        kind: ChangeKind,
        payload: ViewPayload,
    },
    Notice(Notice),
}

/// Applies the visibility rules to feed events, looking up whatever context
/// (wishlist, owner, names) a rule needs.
#[derive(Clone)]
pub struct Projector {
    repos: Repositories,
}

impl Projector {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// `None` when the viewer may not see the event at all
    pub async fn project(&self, caller: &Caller, event: &FeedEvent) -> AppResult<Option<ViewEvent>> {
        let change = match event {
            FeedEvent::Notice(notice) => {
                return Ok((caller.user_id() == Some(notice.recipient))
                    .then(|| ViewEvent::Notice(notice.clone())));
            }
            FeedEvent::Change(change) => change,
        };

        let payload = match &change.row {
            ChangeRow::Wishlist(wishlist) => {
                let role = ViewerRole::for_wishlist(caller, wishlist);
                can_view_wishlist(role, wishlist).then(|| ViewPayload::Wishlist(wishlist.clone()))
            }
            ChangeRow::Gift(gift) => self.project_gift(caller, gift).await?,
            ChangeRow::Contribution(contribution) => {
                if caller.is_anonymous() {
                    return Ok(None);
                }
                match self.visible_context(caller, contribution.gift_id).await? {
                    Some(_) => {
                        let names = display_names(&self.repos, &[contribution.contributor_id]).await?;
                        Some(ViewPayload::Contribution(project_contribution(
                            caller.user_id(),
                            contribution,
                            &names,
                        )))
                    }
                    None => None,
                }
            }
            ChangeRow::Suggestion(suggestion) => {
                match self.visible_context(caller, suggestion.gift_id).await? {
                    Some(_) => {
                        let own_name = caller.current_user().map(|u| u.label());
                        Some(ViewPayload::Suggestion(project_suggestion(
                            caller.user_id(),
                            suggestion,
                            own_name.as_deref(),
                        )))
                    }
                    None => None,
                }
            }
            ChangeRow::Message(message) => {
                let Some(user_id) = caller.user_id() else {
                    return Ok(None);
                };
                let Some((gift, wishlist)) = self.visible_context(caller, message.gift_id).await?
                else {
                    return Ok(None);
                };
                can_use_messages(&self.repos, user_id, &gift, &wishlist)
                    .await?
                    .then(|| ViewPayload::Message(message.clone()))
            }
        };

        Ok(payload.map(|payload| ViewEvent::Change {
            channel: change.channel,
            kind: change.kind,
            payload,
        }))
    }

    async fn project_gift(&self, caller: &Caller, gift: &Gift) -> AppResult<Option<ViewPayload>> {
        let Some(wishlist) = self.repos.wishlists.find_by_id(gift.wishlist_id).await? else {
            return Ok(None);
        };
        let role = ViewerRole::for_wishlist(caller, &wishlist);
        if !can_view_wishlist(role, &wishlist) {
            return Ok(None);
        }

        let summary = if gift.is_group_gift {
            let contributions = self.repos.contributions.list_by_gift(gift.id).await?;
            Some(GroupGiftSummary::compute(
                gift.id,
                gift.target_price,
                &gift.currency,
                &contributions,
            ))
        } else {
            None
        };

        Ok(Some(ViewPayload::Gift(project_gift(
            role,
            &wishlist,
            gift,
            summary.as_ref(),
        ))))
    }

    /// Gift and wishlist when the caller may see the gift; a gift deleted
    /// since the event was published counts as not visible
    async fn visible_context(
        &self,
        caller: &Caller,
        gift_id: Uuid,
    ) -> AppResult<Option<(Gift, Wishlist)>> {
        let Some(gift) = self.repos.gifts.find_by_id(gift_id).await? else {
            return Ok(None);
        };
        let Some(wishlist) = self.repos.wishlists.find_by_id(gift.wishlist_id).await? else {
            return Ok(None);
        };

        let role = ViewerRole::for_wishlist(caller, &wishlist);
        Ok(can_view_wishlist(role, &wishlist).then_some((gift, wishlist)))
    }
}
