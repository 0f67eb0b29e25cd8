use tokio::task::JoinHandle;

/// The four logical store subscriptions a session holds per room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Full participant list, delivered once.
    ParticipantSnapshot,
    /// Full message history ordered by timestamp, delivered once.
    MessageSnapshot,
    /// One event per participant joining after the snapshot.
    ParticipantAdded,
    /// Message added and changed events, each carrying the whole record.
    MessageFeed,
}

/// Registry key: at most one listener per `(room, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    pub room_id: String,
    pub kind: EventKind,
}

impl ListenerKey {
    pub fn new(room_id: &str, kind: EventKind) -> Self {
        Self { room_id: room_id.to_owned(), kind }
    }
}

/// Unsubscribe handle owned by the registry. Snapshots fire once and hold no
/// task; feeds own the forwarding task they spawned.
pub(crate) enum Listener {
    Snapshot,
    Feed(JoinHandle<()>),
}

impl Listener {
    pub(crate) fn cancel(self) {
        if let Listener::Feed(handle) = self {
            handle.abort();
        }
    }
}
