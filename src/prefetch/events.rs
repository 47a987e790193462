//! Prefetch progress events and their broadcast bus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Observer notification about an area prefetch.
///
/// Serialised as JSON tagged by `type`:
///
/// ```json
/// {"type":"progress","areaName":"centro","completed":25,"total":120,"percent":20}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PrefetchEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        area_name: String,
        completed: usize,
        total: usize,
        percent: u8,
    },

    #[serde(rename_all = "camelCase")]
    Complete {
        area_name: String,
        cached: usize,
        failed: usize,
        total: usize,
        cancelled: bool,
    },

    #[serde(rename_all = "camelCase")]
    Error { area_name: String, message: String },
}

impl PrefetchEvent {
    pub fn area_name(&self) -> &str {
        match self {
            PrefetchEvent::Progress { area_name, .. }
            | PrefetchEvent::Complete { area_name, .. }
            | PrefetchEvent::Error { area_name, .. } => area_name,
        }
    }

    /// Whether this is the last event a job emits.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PrefetchEvent::Progress { .. })
    }
}

/// Integer percentage, rounded down.
pub fn percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    (completed.min(total) * 100 / total) as u8
}

/// Fan-out of prefetch events to every connected observer.
///
/// Delivery is at-most-once: an observer that falls behind by more than the
/// channel capacity skips the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PrefetchEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrefetchEvent> {
        self.sender.subscribe()
    }

    /// Send to all current observers. Returns how many received it.
    pub fn publish(&self, event: PrefetchEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!(area = event.area_name(), "No observers for prefetch event");
                0
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
