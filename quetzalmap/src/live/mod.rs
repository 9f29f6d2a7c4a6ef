//! Live update streaming.
//!
//! The [`SubscriberHub`] owns one [`EventSink`] per connected client and fans
//! events out to them using the event-stream wire format. The HTTP layer that
//! accepts clients is not part of this crate; it only needs to hand the hub a
//! sink, typically a [`ChannelSink`] whose receiver it streams.

mod event;
mod hub;
mod sink;

pub use event::{comment_frame, event_frame, TileUpdate, CONNECTED_EVENT, TILE_UPDATE_EVENT};
pub use hub::{HubStats, SubscriberHub};
pub use sink::{ChannelSink, EventSink, SinkClosed};
