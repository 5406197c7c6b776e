//! Domain models for the giftpool backend.
//!
//! Rows that carry string-encoded enums or value rules are read into a
//! `*Row` struct first and converted with `TryFrom`, which rejects malformed
//! rows before they reach the services.

pub mod contribution;
pub mod gift;
pub mod message;
pub mod suggestion;
pub mod user;
pub mod wishlist;

// Re-export all models for convenient access
pub use contribution::{
    Contribution, ContributionDraft, ContributionPatch, ContributionRow, GroupGiftSummary,
    UpsertOutcome, remaining, total_excluding,
};
pub use gift::{Gift, GiftRow, NewGift, Priority};
pub use message::ContributionMessage;
pub use suggestion::Suggestion;
pub use user::User;
pub use wishlist::{VisibilityMode, Wishlist, WishlistRow};
