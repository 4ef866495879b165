//! Change-feed abstraction.
//!
//! A [`ChangeFeed`] delivers row-level change notifications for one
//! [`ChangeFilter`] scope per subscription. Subscribing returns an owned
//! [`Subscription`] whose receiver yields [`FeedMessage`]s: status
//! transitions of the underlying channel and the changes themselves.
//!
//! Releasing a subscription is explicit: pass its id to
//! [`ChangeFeed::unsubscribe`]. Dropping the receiver only stops delivery.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{ChangeEvent, ChangeFilter};

/// Identifier of a live subscription within one feed.
pub type SubscriptionId = u64;

/// Lifecycle of a subscription channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Join sent, not yet acknowledged.
    Connecting,
    /// The server acknowledged the subscription.
    Subscribed,
    /// The server rejected the subscription or reported a channel error.
    ChannelError(String),
    /// No acknowledgement arrived in time.
    TimedOut,
    /// The channel was closed by either side.
    Closed,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("CONNECTING"),
            Self::Subscribed => f.write_str("SUBSCRIBED"),
            Self::ChannelError(reason) => write!(f, "CHANNEL_ERROR ({reason})"),
            Self::TimedOut => f.write_str("TIMED_OUT"),
            Self::Closed => f.write_str("CLOSED"),
        }
    }
}

/// One item delivered on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    /// The subscription channel changed status.
    Status(SubscriptionStatus),
    /// A row changed within the subscribed scope.
    Change(ChangeEvent),
}

/// An owned, live subscription.
#[derive(Debug)]
pub struct Subscription {
    /// Id to pass to [`ChangeFeed::unsubscribe`].
    pub id: SubscriptionId,
    /// Scope this subscription was created for.
    pub filter: ChangeFilter,
    /// Delivered messages, in arrival order.
    pub messages: mpsc::UnboundedReceiver<FeedMessage>,
}

/// A source of row-level change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    /// Attach a subscription for `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the feed is shut down or the request cannot be sent.
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription>;

    /// Release a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Token used to authorize future subscriptions. Feeds that do not
    /// authorize ignore it.
    async fn set_access_token(&self, _token: Option<String>) -> Result<()> {
        Ok(())
    }

    /// Release every subscription and stop the feed.
    async fn shutdown(&self) {}
}
