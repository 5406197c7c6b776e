//! Near-real-time propagation of row changes.
//!
//! Services publish every committed change on the [`ChangeFeed`] under the
//! resource's [`ChannelKey`]. In-process consumers fold events into a
//! [`LiveView`]; remote viewers get them through the websocket edge after
//! [`Projector`] has redacted them.

mod channel;
mod feed;
mod live_view;
mod projection;

pub use channel::ChannelKey;
pub use feed::{
    ChangeEvent, ChangeFeed, ChangeKind, ChangeRow, FeedEvent, Notice, NoticeKind, Subscription,
};
pub use live_view::{LiveRow, LiveView, ViewSession};
pub use projection::{Projector, ViewEvent, ViewPayload};
