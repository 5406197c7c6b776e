mod helpers;

use futures::StreamExt;
use giftpool_backend::auth::Caller;
use giftpool_backend::error::AppError;
use giftpool_backend::models::*;
use giftpool_backend::realtime::{ChannelKey, FeedEvent, NoticeKind};
use giftpool_backend::repositories::*;
use giftpool_backend::services::visibility::{
    ContributorView, GiftStatus, LinkView, PriceView, CIRCLE_PLACEHOLDER,
};
use giftpool_backend::services::ConversionOutcome;
use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Contribution ledger
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_pledges_never_exceed_target() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;

    let ledger = env.state.ledger.clone();
    let (alice, bob) = (caller(&fx.alice), caller(&fx.bob));

    let first = {
        let ledger = ledger.clone();
        let gift_id = gift.id;
        tokio::spawn(async move { ledger.contribute(&alice, gift_id, czk(700), None, false).await })
    };
    let second = {
        let ledger = ledger.clone();
        let gift_id = gift.id;
        tokio::spawn(async move { ledger.contribute(&bob, gift_id, czk(700), None, false).await })
    };

    let results = vec![first.await.unwrap(), second.await.unwrap()];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one 700 pledge fits a 1000 target");

    let rejection = results.into_iter().find_map(|r| r.err()).unwrap();
    match rejection {
        AppError::ExceedsTarget { remaining, currency } => {
            assert_eq!(remaining, czk(300));
            assert_eq!(currency, "CZK");
        }
        other => panic!("unexpected error: {other}"),
    }

    let summary = ledger.get_summary(gift.id).await.unwrap();
    assert_eq!(summary.total_contributed, czk(700));
    assert_eq!(summary.remaining_amount, Some(czk(300)));
    assert_eq!(summary.contributor_count, 1);
}

#[tokio::test]
async fn test_second_pledge_replaces_first() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let ledger = &env.state.ledger;
    let alice = caller(&fx.alice);

    let first = ledger.contribute(&alice, gift.id, czk(300), None, false).await.unwrap();
    let second = ledger
        .contribute(&alice, gift.id, czk(500), Some("  For the bike!  ".into()), false)
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.amount, czk(500));
    assert_eq!(second.message.as_deref(), Some("For the bike!"));

    let summary = ledger.get_summary(gift.id).await.unwrap();
    assert_eq!(summary.total_contributed, czk(500));
    assert_eq!(summary.contributor_count, 1);

    // Replacing her own 500 with 1000 fits because her old amount is excluded
    ledger.contribute(&alice, gift.id, czk(1000), None, false).await.unwrap();
    let summary = ledger.get_summary(gift.id).await.unwrap();
    assert!(summary.is_fully_funded);
}

#[tokio::test]
async fn test_edit_is_checked_against_others() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let ledger = &env.state.ledger;

    let mine = ledger
        .contribute(&caller(&fx.alice), gift.id, czk(100), None, false)
        .await
        .unwrap();
    ledger
        .contribute(&caller(&fx.bob), gift.id, czk(200), None, false)
        .await
        .unwrap();

    let err = ledger
        .update_contribution(&caller(&fx.alice), mine.id, ContributionPatch::amount(czk(900)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ExceedsTarget { remaining, .. } if remaining == czk(800)));

    let edited = ledger
        .update_contribution(&caller(&fx.alice), mine.id, ContributionPatch::amount(czk(800)))
        .await
        .unwrap();
    assert_eq!(edited.amount, czk(800));
    assert!(ledger.get_summary(gift.id).await.unwrap().is_fully_funded);

    let err = ledger
        .update_contribution(&caller(&fx.bob), mine.id, ContributionPatch::amount(czk(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
}

#[tokio::test]
async fn test_contribute_validation_errors() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let ledger = &env.state.ledger;
    let alice = caller(&fx.alice);

    let err = ledger
        .contribute(&Caller::anonymous(), fx.gift.id, czk(100), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated));

    let err = ledger.contribute(&alice, fx.gift.id, czk(0), None, false).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidAmount(_)));

    let err = ledger.contribute(&alice, fx.gift.id, czk(100), None, false).await.unwrap_err();
    assert!(matches!(err, AppError::NotGroupGift));

    let err = ledger
        .contribute(&alice, uuid::Uuid::new_v4(), czk(100), None, false)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let gift = fx.group_gift(&env).await;
    let err = ledger
        .contribute(&caller(&fx.owner), gift.id, czk(100), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::OwnerCannotContribute));

    let err = ledger.contribute(&alice, gift.id, czk(1001), None, false).await.unwrap_err();
    assert!(err.is_validation());
    assert!(!err.is_retryable());
    assert_eq!(err.to_string(), "Contribution exceeds the funding target: only 1000 CZK remaining");
}

#[tokio::test]
async fn test_group_gift_without_target() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let unpriced = create_test_gift(env.repos(), fx.wishlist.id, "Surprise", None).await;

    env.state
        .conversion
        .convert_by_owner(&caller(&fx.owner), unpriced.id)
        .await
        .unwrap();

    let err = env
        .state
        .ledger
        .contribute(&caller(&fx.alice), unpriced.id, czk(100), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::MissingTarget));

    let summary = env.state.ledger.get_summary(unpriced.id).await.unwrap();
    assert_eq!(summary.target_amount, None);
    assert_eq!(summary.remaining_amount, None);
    assert!(!summary.is_fully_funded);
}

#[tokio::test]
async fn test_withdrawal_is_idempotent_and_keeps_group_flag() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let ledger = &env.state.ledger;
    let alice = caller(&fx.alice);

    let pledge = ledger.contribute(&alice, gift.id, czk(400), None, false).await.unwrap();

    let err = ledger.delete_contribution(&caller(&fx.bob), pledge.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    ledger.delete_contribution(&alice, pledge.id).await.unwrap();
    ledger.delete_contribution(&alice, pledge.id).await.unwrap();

    let summary = ledger.get_summary(gift.id).await.unwrap();
    assert_eq!(summary.total_contributed, czk(0));
    assert_eq!(summary.contributor_count, 0);

    let reloaded = env.repos().gifts.find_by_id(gift.id).await.unwrap().unwrap();
    assert!(reloaded.is_group_gift);
}

#[tokio::test]
async fn test_anonymous_contribution_hides_identity() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let ledger = &env.state.ledger;

    ledger
        .contribute(&caller(&fx.alice), gift.id, czk(250), Some("Enjoy!".into()), true)
        .await
        .unwrap();
    ledger
        .contribute(&caller(&fx.bob), gift.id, czk(150), None, false)
        .await
        .unwrap();

    let for_bob = ledger.list_contributions(&caller(&fx.bob), gift.id).await.unwrap();
    assert_eq!(for_bob.len(), 2);
    assert_eq!(for_bob[0].contributor, ContributorView::Anonymous);
    assert_eq!(for_bob[0].amount, czk(250));
    assert_eq!(for_bob[0].message.as_deref(), Some("Enjoy!"));
    assert!(matches!(&for_bob[1].contributor, ContributorView::Named { name, .. } if name == "Bob"));

    let for_owner = ledger.list_contributions(&caller(&fx.owner), gift.id).await.unwrap();
    assert_eq!(for_owner[0].contributor, ContributorView::Anonymous);

    let for_alice = ledger.list_contributions(&caller(&fx.alice), gift.id).await.unwrap();
    assert!(for_alice[0].is_own);
    assert!(matches!(&for_alice[0].contributor, ContributorView::Named { name, .. } if name == "Alice"));

    let json = serde_json::to_string(&for_bob).unwrap();
    assert!(!json.contains(&fx.alice.id.to_string()));
}

#[tokio::test]
async fn test_signed_out_viewer_gets_no_contributions() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let ledger = &env.state.ledger;

    let mut feed = env
        .state
        .feed
        .subscribe(ChannelKey::GiftContributions(gift.id))
        .await;
    ledger
        .contribute(&caller(&fx.alice), gift.id, czk(1000), None, false)
        .await
        .unwrap();

    let err = ledger
        .list_contributions(&Caller::anonymous(), gift.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Unauthenticated));

    let event = tokio::time::timeout(Duration::from_secs(1), feed.next())
        .await
        .unwrap()
        .unwrap();
    let projector = &env.state.projector;
    assert!(projector.project(&Caller::anonymous(), &event).await.unwrap().is_none());
    assert!(projector.project(&caller(&fx.bob), &event).await.unwrap().is_some());
}

// ============================================================================
// Suggestions and conversion
// ============================================================================

#[tokio::test]
async fn test_conversion_after_two_agreements() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let conversion = &env.state.conversion;

    // Carol had reserved it as a single-owner gift
    env.state
        .wishlists
        .reserve_gift(&caller(&fx.carol), fx.gift.id)
        .await
        .unwrap();

    let first = conversion.agree(&caller(&fx.alice), fx.gift.id).await.unwrap();
    assert_eq!(first.suggestion_count, 1);
    assert!(first.conversion.is_none());

    let second = conversion.agree(&caller(&fx.bob), fx.gift.id).await.unwrap();
    assert_eq!(second.suggestion_count, 2);
    let converted = match second.conversion {
        Some(ConversionOutcome::Converted(gift)) => gift,
        other => panic!("expected a conversion, got {:?}", other),
    };
    assert!(converted.is_group_gift);
    assert_eq!(converted.reserved_by, None);
    assert_eq!(converted.reserved_at, None);

    // Further suggestions are rejected and a repeated flip is a no-op
    let err = conversion.agree(&caller(&fx.carol), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyGroupGift));
    assert_eq!(
        conversion.convert(fx.gift.id).await.unwrap(),
        ConversionOutcome::AlreadyConverted
    );

    // Suggestions stay on record after conversion
    assert_eq!(env.state.suggestions.count(fx.gift.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_threshold_is_configurable() {
    let env = TestEnv::with_threshold(3);
    let fx = TestFixtures::create(env.repos()).await;
    let conversion = &env.state.conversion;

    conversion.agree(&caller(&fx.alice), fx.gift.id).await.unwrap();
    let second = conversion.agree(&caller(&fx.bob), fx.gift.id).await.unwrap();
    assert!(second.conversion.is_none());

    let third = conversion.agree(&caller(&fx.carol), fx.gift.id).await.unwrap();
    assert!(third.conversion.map(|c| c.is_converted()).unwrap_or(false));
}

#[tokio::test]
async fn test_suggestion_rules() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let registry = &env.state.suggestions;

    let err = registry.suggest(&caller(&fx.owner), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::OwnGift));

    let hidden = create_test_gift(env.repos(), fx.private_wishlist.id, "Ring", Some(czk(5000))).await;
    let err = registry.suggest(&caller(&fx.alice), hidden.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotPublic));

    registry.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap();
    let err = registry.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::DuplicateSuggestion));
    assert_eq!(registry.count(fx.gift.id).await.unwrap(), 1);
    assert!(registry.has_suggested(fx.gift.id, fx.alice.id).await.unwrap());

    registry.remove(&caller(&fx.alice), fx.gift.id).await.unwrap();
    registry.remove(&caller(&fx.alice), fx.gift.id).await.unwrap();
    assert_eq!(registry.count(fx.gift.id).await.unwrap(), 0);
    assert!(!registry.has_suggested(fx.gift.id, fx.alice.id).await.unwrap());
}

#[tokio::test]
async fn test_suggestion_names_are_redacted() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let registry = &env.state.suggestions;

    registry.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap();
    registry.suggest(&caller(&fx.carol), fx.gift.id).await.unwrap();

    let for_carol = registry.list_with_names(&caller(&fx.carol), fx.gift.id).await.unwrap();
    assert_eq!(for_carol[0].name, CIRCLE_PLACEHOLDER);
    assert!(for_carol[1].is_own);
    // Carol has no display name, so her label comes from her email
    assert_eq!(for_carol[1].name, "carol");

    let for_guest = registry.list_with_names(&Caller::anonymous(), fx.gift.id).await.unwrap();
    assert!(for_guest.iter().all(|s| s.name == CIRCLE_PLACEHOLDER));
}

#[tokio::test]
async fn test_other_suggesters_are_notified() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;

    let mut alice_inbox = env.state.feed.subscribe(ChannelKey::UserNotices(fx.alice.id)).await;
    let mut owner_inbox = env.state.feed.subscribe(ChannelKey::UserNotices(fx.owner.id)).await;

    env.state.suggestions.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap();
    env.state.suggestions.suggest(&caller(&fx.bob), fx.gift.id).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(1), alice_inbox.next()).await {
        Ok(Some(FeedEvent::Notice(notice))) => {
            assert_eq!(notice.kind, NoticeKind::SuggestionAdded);
            assert_eq!(notice.gift_id, fx.gift.id);
        }
        other => panic!("alice expected a notice, got {:?}", other),
    }

    // The owner is never told about suggestions on their own gift
    let nothing = tokio::time::timeout(Duration::from_millis(50), owner_inbox.next()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_first_suggestion_reaches_gift_viewers() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;

    let mut viewers = env
        .state
        .feed
        .subscribe(ChannelKey::GiftSuggestions(fx.gift.id))
        .await;
    let mut bob_inbox = env.state.feed.subscribe(ChannelKey::UserNotices(fx.bob.id)).await;

    let suggestion = env.state.suggestions.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap();

    // No earlier suggesters, so nobody gets a notice, but the change still goes out
    let event = tokio::time::timeout(Duration::from_secs(1), viewers.next())
        .await
        .unwrap()
        .unwrap();
    match &event {
        FeedEvent::Change(change) => assert_eq!(change.row.id(), suggestion.id),
        other => panic!("expected a suggestion change, got {:?}", other),
    }
    let view = env.state.projector.project(&caller(&fx.bob), &event).await.unwrap();
    assert!(view.is_some());

    let nothing = tokio::time::timeout(Duration::from_millis(50), bob_inbox.next()).await;
    assert!(nothing.is_err());
}

#[tokio::test]
async fn test_notifier_failure_does_not_fail_suggest() {
    let notifier = Arc::new(FailingNotifier::default());
    let env = TestEnv::with_notifier(notifier.clone());
    let fx = TestFixtures::create(env.repos()).await;

    env.state.suggestions.suggest(&caller(&fx.alice), fx.gift.id).await.unwrap();
    let suggestion = env.state.suggestions.suggest(&caller(&fx.bob), fx.gift.id).await;

    assert!(suggestion.is_ok());
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(env.state.suggestions.count(fx.gift.id).await.unwrap(), 2);
}

// ============================================================================
// Visibility and reservations
// ============================================================================

#[tokio::test]
async fn test_anonymous_viewer_sees_locked_price() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;

    let views = env
        .state
        .wishlists
        .view_gifts(&Caller::anonymous(), fx.wishlist.id)
        .await
        .unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].price, PriceView::Locked);
    assert_eq!(views[0].link, LinkView::Locked);
    assert!(!serde_json::to_string(&views).unwrap().contains("shop.example"));
    assert_eq!(views[0].funding, None);

    let views = env
        .state
        .wishlists
        .view_gifts(&caller(&fx.alice), fx.wishlist.id)
        .await
        .unwrap();
    assert_eq!(
        views[0].price,
        PriceView::Visible {
            amount: czk(1000),
            currency: "CZK".into()
        }
    );
}

#[tokio::test]
async fn test_private_wishlist_is_owner_only() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;

    let err = env
        .state
        .wishlists
        .view_gifts(&caller(&fx.alice), fx.private_wishlist.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotPublic));

    assert!(env
        .state
        .wishlists
        .view_gifts(&caller(&fx.owner), fx.private_wishlist.id)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_reservation_visibility_by_list_mode() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let wishlists = &env.state.wishlists;

    wishlists.reserve_gift(&caller(&fx.alice), fx.gift.id).await.unwrap();

    let err = wishlists.reserve_gift(&caller(&fx.bob), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::AlreadyReserved));
    let err = wishlists.reserve_gift(&caller(&fx.owner), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::OwnGift));

    let owner_view = wishlists.view_gifts(&caller(&fx.owner), fx.wishlist.id).await.unwrap();
    assert_eq!(
        owner_view[0].status,
        GiftStatus::Reserved {
            reserved_by: None,
            by_you: false
        }
    );

    let managed = wishlists
        .convert_to_managed(&caller(&fx.owner), fx.wishlist.id)
        .await
        .unwrap();
    assert!(managed.mode.is_managed());

    let owner_view = wishlists.view_gifts(&caller(&fx.owner), fx.wishlist.id).await.unwrap();
    assert_eq!(
        owner_view[0].status,
        GiftStatus::Reserved {
            reserved_by: Some(fx.alice.id),
            by_you: false
        }
    );

    let err = wishlists
        .convert_to_managed(&caller(&fx.alice), fx.wishlist.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = wishlists.release_reservation(&caller(&fx.bob), fx.gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    let released = wishlists.release_reservation(&caller(&fx.alice), fx.gift.id).await.unwrap();
    assert_eq!(released.reserved_by, None);
}

#[tokio::test]
async fn test_list_own_wishlists() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;

    let lists = env
        .state
        .wishlists
        .list_own_wishlists(&caller(&fx.owner))
        .await
        .unwrap();
    assert_eq!(lists.len(), 2);

    let none = env
        .state
        .wishlists
        .list_own_wishlists(&caller(&fx.alice))
        .await
        .unwrap();
    assert!(none.is_empty());
}

// ============================================================================
// Messaging
// ============================================================================

#[tokio::test]
async fn test_messages_are_for_contributors_and_owner() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;
    let messaging = &env.state.messaging;

    let err = messaging
        .post_message(&caller(&fx.alice), gift.id, "Who buys the helmet?")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotContributor));

    env.state
        .ledger
        .contribute(&caller(&fx.alice), gift.id, czk(200), None, false)
        .await
        .unwrap();

    let err = messaging.post_message(&caller(&fx.alice), gift.id, "   ").await.unwrap_err();
    assert!(matches!(err, AppError::EmptyMessage));

    let posted = messaging
        .post_message(&caller(&fx.alice), gift.id, "  Who buys the helmet?  ")
        .await
        .unwrap();
    assert_eq!(posted.body, "Who buys the helmet?");

    messaging
        .post_message(&caller(&fx.owner), gift.id, "Thanks all")
        .await
        .unwrap();

    let thread = messaging.list_messages(&caller(&fx.alice), gift.id).await.unwrap();
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[0].id, posted.id);

    let err = messaging.list_messages(&caller(&fx.bob), gift.id).await.unwrap_err();
    assert!(matches!(err, AppError::NotContributor));
}

// ============================================================================
// Store failures
// ============================================================================

#[tokio::test]
async fn test_store_outage_is_retryable() {
    let env = TestEnv::new();
    let fx = TestFixtures::create(env.repos()).await;
    let gift = fx.group_gift(&env).await;

    env.store.set_unavailable(true);
    let err = env
        .state
        .ledger
        .contribute(&caller(&fx.alice), gift.id, czk(100), None, false)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);

    env.store.set_unavailable(false);
    assert!(env
        .state
        .ledger
        .contribute(&caller(&fx.alice), gift.id, czk(100), None, false)
        .await
        .is_ok());
}
