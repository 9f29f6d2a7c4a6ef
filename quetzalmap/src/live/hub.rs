//! Fan-out of live events to registered subscribers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::event::{
    comment_frame, event_frame, Connected, TileUpdate, CONNECTED_EVENT, TILE_UPDATE_EVENT,
};
use super::sink::EventSink;
use crate::config::MIN_INTERVAL;
use crate::tile::TileCoord;

/// Subscriber counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HubStats {
    pub active: usize,
    /// Subscribers ever registered.
    pub total: u64,
}

impl fmt::Display for HubStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscribers active={} total={}", self.active, self.total)
    }
}

/// Registry of live event channels.
///
/// Safe to broadcast from any thread. Channels that fail a write are closed
/// and dropped from the registry on the next broadcast or count query.
pub struct SubscriberHub {
    sinks: DashMap<u64, Arc<dyn EventSink>>,
    next_id: AtomicU64,
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberHub {
    pub fn new() -> Self {
        Self {
            sinks: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a channel and sends it a `connected` event carrying its id.
    pub fn register(&self, sink: Arc<dyn EventSink>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let greeting = serde_json::to_string(&Connected { id }).unwrap_or_default();
        if sink.send(event_frame(CONNECTED_EVENT, &greeting)).is_err() {
            sink.close();
        }
        self.sinks.insert(id, sink);
        debug!(id, active = self.sinks.len(), "Subscriber registered");
        id
    }

    /// Removes a channel without closing it. Returns whether it was registered.
    pub fn unregister(&self, id: u64) -> bool {
        let removed = self.sinks.remove(&id).is_some();
        if removed {
            debug!(id, active = self.sinks.len(), "Subscriber unregistered");
        }
        removed
    }

    fn prune(&self) {
        self.sinks.retain(|_, sink| !sink.is_closed());
    }

    /// Writes a frame to every open channel. Returns how many accepted it.
    fn send_all(&self, frame: &Bytes) -> usize {
        self.prune();
        let mut sent = 0;
        for entry in self.sinks.iter() {
            match entry.value().send(frame.clone()) {
                Ok(()) => sent += 1,
                Err(_) => {
                    debug!(id = *entry.key(), "Subscriber write failed, closing");
                    entry.value().close();
                }
            }
        }
        sent
    }

    /// Sends a named event with a raw data payload to every subscriber.
    pub fn broadcast(&self, event: &str, data: &str) -> usize {
        let sent = self.send_all(&event_frame(event, data));
        debug!(event, sent, "Broadcast");
        sent
    }

    /// Sends a named event with a JSON-serialized payload.
    pub fn broadcast_json<T: Serialize>(&self, event: &str, payload: &T) -> usize {
        match serde_json::to_string(payload) {
            Ok(data) => self.broadcast(event, &data),
            Err(e) => {
                warn!(event, error = %e, "Event payload could not be serialized");
                0
            }
        }
    }

    /// Announces that a tile has been re-rendered.
    pub fn broadcast_tile_update(&self, coord: &TileCoord) -> usize {
        self.broadcast_json(TILE_UPDATE_EVENT, &TileUpdate::new(coord))
    }

    pub fn send_keepalive(&self) -> usize {
        self.send_all(&comment_frame("keepalive"))
    }

    /// Spawns a task that sends keepalives every `interval` until cancelled.
    pub fn spawn_keepalive(
        self: &Arc<Self>,
        interval: Duration,
        cancellation: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = cancellation.cancelled() => break,

                    _ = ticker.tick() => {
                        hub.send_keepalive();
                    }
                }
            }
            debug!("Keepalive task stopped");
        })
    }

    /// Open channels, after dropping closed ones.
    pub fn active_count(&self) -> usize {
        self.prune();
        self.sinks.len()
    }

    /// Closes and removes every channel.
    pub fn shutdown(&self) {
        info!(active = self.sinks.len(), "Closing all subscribers");
        for entry in self.sinks.iter() {
            entry.value().close();
        }
        self.sinks.clear();
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            active: self.active_count(),
            total: self.next_id.load(Ordering::Relaxed) - 1,
        }
    }
}

impl fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("active", &self.sinks.len())
            .finish()
    }
}
