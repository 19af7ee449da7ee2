//! Live event bus for session listeners
//!
//! Tokio broadcast pub/sub. Listeners that fall behind lose the oldest
//! events; the log remains the authoritative record.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::types::SessionEvent;
use crate::message_log::MessageLog;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

/// Broadcast bus for [`SessionEvent`]s
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all subscribers. Returns the receiver count.
    pub fn publish(&self, event: SessionEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            // No receivers is fine; the log keeps the record.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward every committed log entry to the bus as `entry_appended`, in
/// commit order, until cancelled. Resolves to the number forwarded.
pub fn spawn_entry_relay(
    log: &MessageLog,
    bus: SharedEventBus,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    let mut subscription = log.subscribe("live-relay");
    tokio::spawn(async move {
        let mut forwarded = 0u64;
        loop {
            tokio::select! {
                biased;
                entry = subscription.recv() => match entry {
                    Some(entry) => {
                        bus.publish(SessionEvent::from(&entry));
                        forwarded += 1;
                    }
                    None => break,
                },
                _ = cancel.cancelled() => {
                    // Flush what is already buffered so listeners see the tail.
                    for entry in subscription.drain() {
                        bus.publish(SessionEvent::from(&entry));
                        forwarded += 1;
                    }
                    break;
                }
            }
        }
        debug!(forwarded, dropped = subscription.dropped(), "Entry relay stopped");
        forwarded
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_log::EntryDraft;
    use crate::moderator::phase::SessionPhase;
    use chrono::Utc;

    fn phase_event() -> SessionEvent {
        SessionEvent::PhaseChanged {
            phase: SessionPhase::Opening,
            time_remaining_secs: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new().shared();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.publish(phase_event()), 2);
        assert_eq!(rx1.recv().await.unwrap().event_type(), "phase_changed");
        assert_eq!(rx2.recv().await.unwrap().event_type(), "phase_changed");
    }

    #[test]
    fn test_publish_without_listeners_is_fine() {
        assert_eq!(EventBus::new().publish(phase_event()), 0);
    }

    #[tokio::test]
    async fn test_relay_forwards_in_commit_order() {
        let log = MessageLog::new().shared();
        let bus = EventBus::new().shared();
        let mut entries = bus.subscribe();
        let cancel = CancellationToken::new();
        let relay = spawn_entry_relay(&log, bus.clone(), cancel.clone());

        for i in 0..5 {
            log.append(EntryDraft::statement("ada", format!("m{i}")));
        }
        for expected in 1..=5 {
            assert_eq!(entries.recv().await.unwrap().sequence(), Some(expected));
        }
        cancel.cancel();
        assert_eq!(relay.await.unwrap(), 5);
    }
}
