//! Event-stream framing.

use bytes::Bytes;
use serde::Serialize;

use crate::tile::TileCoord;

/// Event name used for tile refresh notifications.
pub const TILE_UPDATE_EVENT: &str = "tile_update";

/// Event name sent to a subscriber right after it registers.
pub const CONNECTED_EVENT: &str = "connected";

/// Frames a named event: `event: <name>\ndata: <data>\n\n`.
pub fn event_frame(name: &str, data: &str) -> Bytes {
    Bytes::from(format!("event: {}\ndata: {}\n\n", name, data))
}

/// Frames a comment line, ignored by clients but keeping the stream open.
pub fn comment_frame(text: &str) -> Bytes {
    Bytes::from(format!(": {}\n\n", text))
}

/// Payload of a `tile_update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TileUpdate<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub world: &'a str,
    pub zoom: u8,
    pub x: i32,
    pub z: i32,
}

impl<'a> TileUpdate<'a> {
    pub fn new(coord: &'a TileCoord) -> Self {
        Self {
            kind: TILE_UPDATE_EVENT,
            world: &coord.world,
            zoom: coord.zoom,
            x: coord.x,
            z: coord.z,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct Connected {
    pub id: u64,
}
