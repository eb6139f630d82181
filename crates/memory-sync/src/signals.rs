//! UI-facing sync notifications

use tokio::sync::broadcast;
use tracing::trace;

use crate::transfer::RemoteSettings;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Local data changed; views should refresh.
    SyncCompleted,
    /// Dependent views (e.g. smart playlists) should recompute.
    DependentUpdateRequested,
    SettingsRefreshed(RemoteSettings),
}

/// Broadcast bus for [`SyncEvent`]s. Emitting with no subscribers is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SyncEvent) {
        trace!("Emitting {:?}", event);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_receive_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(SyncEvent::SyncCompleted);
        bus.emit(SyncEvent::DependentUpdateRequested);

        assert_eq!(rx.recv().await.unwrap(), SyncEvent::SyncCompleted);
        assert_eq!(rx.recv().await.unwrap(), SyncEvent::DependentUpdateRequested);
    }

    #[test]
    fn test_emit_without_subscribers() {
        EventBus::new().emit(SyncEvent::SyncCompleted);
    }
}
