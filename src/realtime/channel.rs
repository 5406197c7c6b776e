use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Resource a subscriber listens to.
///
/// Renders as `wishlist:{id}:gifts`, `user:{id}:wishlists`,
/// `gift:{id}:contributions`, `gift:{id}:suggestions`, `gift:{id}:messages`
/// or `user:{id}:notices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ChannelKey {
    WishlistGifts(Uuid),
    UserWishlists(Uuid),
    GiftContributions(Uuid),
    GiftSuggestions(Uuid),
    GiftMessages(Uuid),
    UserNotices(Uuid),
}

impl ChannelKey {
    /// Id of the resource the channel is scoped to
    pub fn resource_id(&self) -> Uuid {
        match *self {
            ChannelKey::WishlistGifts(id)
            | ChannelKey::UserWishlists(id)
            | ChannelKey::GiftContributions(id)
            | ChannelKey::GiftSuggestions(id)
            | ChannelKey::GiftMessages(id)
            | ChannelKey::UserNotices(id) => id,
        }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::WishlistGifts(id) => write!(f, "wishlist:{}:gifts", id),
            ChannelKey::UserWishlists(id) => write!(f, "user:{}:wishlists", id),
            ChannelKey::GiftContributions(id) => write!(f, "gift:{}:contributions", id),
            ChannelKey::GiftSuggestions(id) => write!(f, "gift:{}:suggestions", id),
            ChannelKey::GiftMessages(id) => write!(f, "gift:{}:messages", id),
            ChannelKey::UserNotices(id) => write!(f, "user:{}:notices", id),
        }
    }
}

impl FromStr for ChannelKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let (Some(scope), Some(id), Some(topic), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("Invalid channel: {}", s));
        };

        let id = Uuid::parse_str(id).map_err(|_| format!("Invalid channel id: {}", s))?;

        match (scope, topic) {
            ("wishlist", "gifts") => Ok(ChannelKey::WishlistGifts(id)),
            ("user", "wishlists") => Ok(ChannelKey::UserWishlists(id)),
            ("gift", "contributions") => Ok(ChannelKey::GiftContributions(id)),
            ("gift", "suggestions") => Ok(ChannelKey::GiftSuggestions(id)),
            ("gift", "messages") => Ok(ChannelKey::GiftMessages(id)),
            ("user", "notices") => Ok(ChannelKey::UserNotices(id)),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

impl From<ChannelKey> for String {
    fn from(key: ChannelKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for ChannelKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_key_text_form() {
        let id = Uuid::new_v4();
        let key = ChannelKey::GiftContributions(id);
        assert_eq!(key.to_string(), format!("gift:{}:contributions", id));
        assert_eq!(key.to_string().parse::<ChannelKey>().unwrap(), key);
    }

    #[test]
    fn test_rejects_unknown_channels() {
        let id = Uuid::new_v4();
        assert!(format!("gift:{}:bets", id).parse::<ChannelKey>().is_err());
        assert!("gift:not-a-uuid:messages".parse::<ChannelKey>().is_err());
        assert!(format!("gift:{}:messages:extra", id).parse::<ChannelKey>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&ChannelKey::UserNotices(id)).unwrap();
        assert_eq!(json, format!("\"user:{}:notices\"", id));
    }
}
