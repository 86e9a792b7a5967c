//! Events published by the supervisor and the observer.
//!
//! All events flow through one unbounded mpsc channel, so a single consumer
//! sees them in the order they were generated.

use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::TrafficStatus;

/// Something the rest of the application may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagementEvent {
    /// A control channel is open.
    Connected,
    /// The control channel went away (socket error or explicit disconnect).
    Disconnected,
    /// A retry loop ran out of attempts. No further automatic retries.
    Aborted,
    /// A daemon log line not seen before.
    LogLine(String),
    /// The daemon's status step changed.
    StateChanged(String),
    /// Traffic counters changed.
    TrafficUpdate(TrafficStatus),
}

/// Sending half of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ManagementEvent>,
}

impl EventSink {
    /// Publish an event. A dropped receiver is not an error.
    pub fn emit(&self, event: ManagementEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    /// A sink whose events go nowhere.
    pub fn discard() -> Self {
        let (sink, _rx) = event_channel();
        sink
    }
}

/// Create a connected sink/receiver pair.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<ManagementEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

/// Receives each novel daemon log line.
pub trait Watcher: Send + Sync {
    fn watch(&self, message: &str);
}

impl<F> Watcher for F
where
    F: Fn(&str) + Send + Sync,
{
    fn watch(&self, message: &str) {
        self(message)
    }
}
