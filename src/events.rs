//! Process-wide signals as explicit broadcast channels.
//!
//! Views and controllers subscribe to these instead of sharing mutable
//! state: a character list and a modal showing the same character stay
//! consistent by both observing [`ProgressEvent`] broadcasts.

use tokio::sync::broadcast;

use crate::types::{Affinity, CharacterId, StoryId};

/// Session lifecycle signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Credential refresh failed terminally; stored credentials are already
    /// cleared. The session controller reacts with a logout.
    Expired,
    /// Local cleanup completed after a logout. Hosts redirect to the
    /// unauthenticated entry point on this.
    LoggedOut,
}

/// Progress mutations, broadcast on every ledger or server-value change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    AffinityChanged {
        character: CharacterId,
        progress: Affinity,
    },
    LastReadChanged {
        story: StoryId,
    },
}

const CHANNEL_CAPACITY: usize = 64;

/// Broadcast sender handle for session signals. Cheap to clone; emission
/// tolerates zero subscribers.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: SessionEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast sender handle for progress signals.
#[derive(Debug, Clone)]
pub struct ProgressEvents {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_without_subscribers_is_a_no_op() {
        let events = SessionEvents::new();
        events.emit(SessionEvent::Expired);
    }

    #[tokio::test]
    async fn subscribers_each_receive_every_event() {
        let events = ProgressEvents::new();
        let mut a = events.subscribe();
        let mut b = events.subscribe();

        events.emit(ProgressEvent::LastReadChanged {
            story: StoryId::new("s1"),
        });

        let expected = ProgressEvent::LastReadChanged {
            story: StoryId::new("s1"),
        };
        assert_eq!(a.recv().await.unwrap(), expected);
        assert_eq!(b.recv().await.unwrap(), expected);
    }
}
