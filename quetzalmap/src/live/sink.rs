//! Outbound event channels.

use bytes::Bytes;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;

/// Write to a closed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event channel is closed")]
pub struct SinkClosed;

/// A live channel that accepts framed events.
///
/// Implemented by whatever carries the stream to a client. A sink that fails a
/// write is expected to report itself closed afterwards.
pub trait EventSink: Send + Sync {
    fn send(&self, frame: Bytes) -> Result<(), SinkClosed>;

    fn is_closed(&self) -> bool;

    /// Closes the channel. Further sends fail.
    fn close(&self);
}

/// [`EventSink`] over a tokio unbounded channel.
///
/// The HTTP layer holds the receiver and streams each `Bytes` frame to the
/// client. Dropping the receiver closes the sink.
#[derive(Debug)]
pub struct ChannelSink {
    sender: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn new(sender: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }
}

impl EventSink for ChannelSink {
    fn send(&self, frame: Bytes) -> Result<(), SinkClosed> {
        let mut guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(SinkClosed);
        };
        if sender.send(frame).is_err() {
            *guard = None;
            return Err(SinkClosed);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .as_ref()
            .map_or(true, |sender| sender.is_closed())
    }

    fn close(&self) {
        self.sender.lock().take();
    }
}
