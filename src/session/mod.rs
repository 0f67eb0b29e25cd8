//! Room session manager.
//!
//! One session per connected client. It joins rooms, owns the store
//! subscriptions for the room it is in, mirrors participants and messages
//! from subscription events, and drives the send-message workflow:
//! optimistic insert, fire-and-forget translation, single patch-update.

mod listener;

pub use listener::{EventKind, ListenerKey};

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::{
    lang,
    store::{Message, Participant, Room, RoomStore, StoreEvent, Translations},
    translate::Translator,
    AppResult,
};

use listener::Listener;

/// Join a room by display name, creating it on first use. Room names are
/// case-insensitive; two concurrent creators of the same name end up in the
/// same room, each with their own participant record.
pub async fn join_or_create(
    store: &RoomStore,
    username: &str,
    lang_code: &str,
    room_name: &str,
) -> AppResult<(Room, Participant)> {
    let username = username.trim();
    let name = room_name.trim().to_lowercase();
    if username.is_empty() || name.is_empty() {
        return Err("username and room name must not be empty".into());
    }
    if !lang::is_supported(lang_code) {
        return Err(format!("unsupported language code {lang_code}").into());
    }

    let room = match store.room_by_name(&name).await? {
        Some(room) => room,
        None => store.create_room(&name).await?,
    };
    let participant = store.add_participant(&room.id, username, lang_code).await?;
    Ok((room, participant))
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ParticipantSnapshot { participants: Vec<Participant> },
    MessageSnapshot { messages: Vec<Message> },
    ParticipantAdded { participant: Participant },
    MessageAdded { message: Message },
    MessageChanged { message: Message },
}

pub struct RoomSession {
    store: RoomStore,
    translator: Arc<dyn Translator>,
    room_id: Option<String>,
    listeners: HashMap<ListenerKey, Listener>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    participants: HashMap<String, Participant>,
    messages: HashMap<String, Message>,
}

impl RoomSession {
    pub fn new(store: RoomStore, translator: Arc<dyn Translator>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            store,
            translator,
            room_id: None,
            listeners: HashMap::new(),
            events_tx,
            events_rx,
            participants: HashMap::new(),
            messages: HashMap::new(),
        }
    }

    /// Enter a room: register the four store subscriptions. The incremental
    /// feeds attach before the snapshots are read so no event can fall in
    /// between; the mirror dedups by id.
    pub async fn enter(&mut self, room_id: &str) -> AppResult<()> {
        self.room_id = Some(room_id.to_owned());
        self.register(room_id, EventKind::ParticipantAdded).await?;
        self.register(room_id, EventKind::MessageFeed).await?;
        self.register(room_id, EventKind::ParticipantSnapshot).await?;
        self.register(room_id, EventKind::MessageSnapshot).await?;
        Ok(())
    }

    /// Release every listener. Safe to call repeatedly; entering again after
    /// leaving registers a fresh set instead of stacking a second one.
    pub fn leave(&mut self) {
        for (_, listener) in self.listeners.drain() {
            listener.cancel();
        }
        self.room_id = None;
        self.participants.clear();
        self.messages.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    async fn register(&mut self, room_id: &str, kind: EventKind) -> AppResult<()> {
        let key = ListenerKey::new(room_id, kind);
        if self.listeners.contains_key(&key) {
            debug!(?key, "listener already registered");
            return Ok(());
        }

        let listener = match kind {
            EventKind::ParticipantSnapshot => {
                let participants = self.store.participants(room_id).await?;
                let _ = self.events_tx.send(SessionEvent::ParticipantSnapshot { participants });
                Listener::Snapshot
            }
            EventKind::MessageSnapshot => {
                let messages = self.store.messages(room_id).await?;
                let _ = self.events_tx.send(SessionEvent::MessageSnapshot { messages });
                Listener::Snapshot
            }
            EventKind::ParticipantAdded => self.spawn_feed(room_id, kind),
            EventKind::MessageFeed => self.spawn_feed(room_id, kind),
        };
        self.listeners.insert(key, listener);
        Ok(())
    }

    fn spawn_feed(&self, room_id: &str, kind: EventKind) -> Listener {
        let mut rx = self.store.feed(room_id);
        let tx = self.events_tx.clone();
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, ?kind, "store feed lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let forwarded = match (kind, event) {
                    (EventKind::ParticipantAdded, StoreEvent::ParticipantAdded(participant)) => {
                        Some(SessionEvent::ParticipantAdded { participant })
                    }
                    (EventKind::MessageFeed, StoreEvent::MessageAdded(message)) => {
                        Some(SessionEvent::MessageAdded { message })
                    }
                    (EventKind::MessageFeed, StoreEvent::MessageChanged(message)) => {
                        Some(SessionEvent::MessageChanged { message })
                    }
                    _ => None,
                };
                if let Some(event) = forwarded {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            }
        });
        Listener::Feed(handle)
    }

    /// Next event from the subscriptions. `None` once the session is gone.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Fold an event into the local mirror. Whole-record replacement, last
    /// write wins per record.
    pub fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::ParticipantSnapshot { participants } => {
                for p in participants {
                    self.participants.insert(p.id.clone(), p.clone());
                }
            }
            SessionEvent::ParticipantAdded { participant } => {
                self.participants.insert(participant.id.clone(), participant.clone());
            }
            SessionEvent::MessageSnapshot { messages } => {
                for m in messages {
                    self.messages.insert(m.id.clone(), m.clone());
                }
            }
            SessionEvent::MessageAdded { message } | SessionEvent::MessageChanged { message } => {
                self.messages.insert(message.id.clone(), message.clone());
            }
        }
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.get(id)
    }

    /// Send-message workflow. Whitespace-only text is rejected without any
    /// store write and `None` is returned. Otherwise the message is persisted
    /// untranslated, a translation task is spawned for the room's other
    /// languages as of right now, and the message id is returned immediately.
    pub async fn send_message(&self, sender: &Participant, text: &str) -> AppResult<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let room_id = self.room_id.clone().ok_or("send_message outside a room")?;

        let message = self
            .store
            .append_message(&room_id, &sender.id, text, &sender.lang)
            .await?;

        let targets = fanout_targets(self.participants.values(), &sender.lang);
        let store = self.store.clone();
        let translator = self.translator.clone();
        let (id, text, source) = (
            message.id.clone(),
            message.original_text.clone(),
            message.source_lang.clone(),
        );
        // Fire and forget: teardown never cancels this, a late patch against
        // a gone room is dropped by the store as a no-op.
        tokio::spawn(async move {
            let map = translator.translate(&text, &source, &targets).await;
            let patch = translation_patch(map, &source);
            match store.patch_translations(&room_id, &id, &patch).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!(%id, "translation patch found no message"),
                Err(e) => warn!(%id, error = %e.0, "translation patch failed"),
            }
        });

        Ok(Some(message.id))
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.leave();
    }
}

/// Distinct languages across a participant snapshot.
pub fn room_language_set<'a>(participants: impl IntoIterator<Item = &'a Participant>) -> BTreeSet<String> {
    participants.into_iter().map(|p| p.lang.clone()).collect()
}

/// Translation fan-out targets: every room language except the sender's own.
pub fn fanout_targets<'a>(
    participants: impl IntoIterator<Item = &'a Participant>,
    source: &str,
) -> Vec<String> {
    room_language_set(participants)
        .into_iter()
        .filter(|code| code != source)
        .collect()
}

/// What actually gets patched: the identity entry is dropped once real
/// translations exist (the source is rendered from `original_text`), but a
/// map that degenerated to the identity alone is stored as-is so failure
/// stays observable.
fn translation_patch(mut map: Translations, source: &str) -> Translations {
    if map.len() > 1 {
        map.remove(source);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageState;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    async fn test_store() -> RoomStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        RoomStore::new(pool)
    }

    /// Produces `"[code] text"` per target, plus the identity entry.
    struct StubTranslator;

    #[async_trait]
    impl Translator for StubTranslator {
        async fn translate(&self, text: &str, source: &str, targets: &[String]) -> Translations {
            let mut map = Translations::new();
            map.insert(source.to_owned(), text.to_owned());
            for target in crate::translate::dedup_targets(targets, source) {
                map.insert(target.clone(), format!("[{target}] {text}"));
            }
            map
        }
    }

    /// Total failure: identity map only.
    struct FailingTranslator;

    #[async_trait]
    impl Translator for FailingTranslator {
        async fn translate(&self, text: &str, source: &str, _targets: &[String]) -> Translations {
            let mut map = Translations::new();
            map.insert(source.to_owned(), text.to_owned());
            map
        }
    }

    /// Blocks until released, then behaves like [`StubTranslator`].
    struct GatedTranslator {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl Translator for GatedTranslator {
        async fn translate(&self, text: &str, source: &str, targets: &[String]) -> Translations {
            self.gate.notified().await;
            StubTranslator.translate(text, source, targets).await
        }
    }

    /// Room with es/en/fr participants, session entered as the Spanish one.
    async fn trilingual_session(
        store: &RoomStore,
        translator: Arc<dyn Translator>,
    ) -> (RoomSession, Room, Participant) {
        let (room, ana) = join_or_create(store, "ana", "es", "Lobby").await.unwrap();
        join_or_create(store, "bob", "en", "lobby").await.unwrap();
        join_or_create(store, "chloe", "fr", "LOBBY").await.unwrap();

        let mut session = RoomSession::new(store.clone(), translator);
        session.enter(&room.id).await.unwrap();
        while let Ok(Some(event)) = timeout(Duration::from_millis(100), session.next_event()).await {
            session.apply(&event);
        }
        (session, room, ana)
    }

    async fn wait_for_changed(feed: &mut broadcast::Receiver<StoreEvent>) -> Message {
        loop {
            let event = timeout(Duration::from_secs(2), feed.recv())
                .await
                .expect("timed out waiting for MessageChanged")
                .unwrap();
            if let StoreEvent::MessageChanged(message) = event {
                return message;
            }
        }
    }

    #[tokio::test]
    async fn concurrent_joins_share_one_room() {
        let store = test_store().await;
        let (a, b) = tokio::join!(
            join_or_create(&store, "ana", "es", "Lobby"),
            join_or_create(&store, "bob", "en", "lobby"),
        );
        let (room_a, _) = a.unwrap();
        let (room_b, _) = b.unwrap();
        assert_eq!(room_a.id, room_b.id);
        assert_eq!(store.participants(&room_a.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn join_rejects_unknown_language() {
        let store = test_store().await;
        assert!(join_or_create(&store, "ana", "tlh", "lobby").await.is_err());
    }

    #[tokio::test]
    async fn join_rejects_blank_names() {
        let store = test_store().await;
        assert!(join_or_create(&store, "   ", "es", "lobby").await.is_err());
        assert!(join_or_create(&store, "ana", "es", "  ").await.is_err());
    }

    #[tokio::test]
    async fn whitespace_send_writes_nothing() {
        let store = test_store().await;
        let (session, room, ana) = trilingual_session(&store, Arc::new(StubTranslator)).await;

        assert!(session.send_message(&ana, "   ").await.unwrap().is_none());
        assert!(store.messages(&room.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn message_is_persisted_untranslated_first() {
        let store = test_store().await;
        let gate = Arc::new(Notify::new());
        let (session, room, ana) =
            trilingual_session(&store, Arc::new(GatedTranslator { gate: gate.clone() })).await;

        let mut feed = store.feed(&room.id);
        let id = session.send_message(&ana, "hola").await.unwrap().unwrap();
        let stored = store.message(&room.id, &id).await.unwrap().unwrap();
        assert_eq!(stored.state, MessageState::Pending);
        assert!(stored.translations.is_empty());

        gate.notify_one();
        let changed = wait_for_changed(&mut feed).await;
        assert_eq!(changed.id, id);
        assert_eq!(changed.state, MessageState::Translated);
    }

    #[tokio::test]
    async fn roundtrip_translates_every_other_language() {
        let store = test_store().await;
        let (session, room, ana) = trilingual_session(&store, Arc::new(StubTranslator)).await;

        let mut feed = store.feed(&room.id);
        let id = session.send_message(&ana, "hola").await.unwrap().unwrap();
        let changed = wait_for_changed(&mut feed).await;
        assert_eq!(changed.id, id);
        assert!(!changed.translations.get("en").unwrap().is_empty());
        assert!(!changed.translations.get("fr").unwrap().is_empty());
        assert!(!changed.translations.contains_key("es"));
    }

    #[tokio::test]
    async fn failed_translation_keeps_identity_only() {
        let store = test_store().await;
        let (session, room, ana) = trilingual_session(&store, Arc::new(FailingTranslator)).await;

        let mut feed = store.feed(&room.id);
        session.send_message(&ana, "hola").await.unwrap().unwrap();
        let changed = wait_for_changed(&mut feed).await;
        assert_eq!(changed.state, MessageState::Translated);
        assert_eq!(changed.translations.len(), 1);
        assert_eq!(changed.translations.get("es").map(String::as_str), Some("hola"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_noop() {
        let store = test_store().await;
        let (room, _) = join_or_create(&store, "ana", "es", "lobby").await.unwrap();

        let mut session = RoomSession::new(store.clone(), Arc::new(StubTranslator));
        session.enter(&room.id).await.unwrap();
        session.enter(&room.id).await.unwrap();
        assert_eq!(session.listener_count(), 4);

        // Exactly one snapshot pair was delivered despite the double enter.
        let mut snapshots = 0;
        while let Ok(Some(event)) = timeout(Duration::from_millis(100), session.next_event()).await {
            if matches!(
                event,
                SessionEvent::ParticipantSnapshot { .. } | SessionEvent::MessageSnapshot { .. }
            ) {
                snapshots += 1;
            }
        }
        assert_eq!(snapshots, 2);
    }

    #[tokio::test]
    async fn leave_releases_listeners_and_reenter_is_clean() {
        let store = test_store().await;
        let (room, _) = join_or_create(&store, "ana", "es", "lobby").await.unwrap();

        let mut session = RoomSession::new(store.clone(), Arc::new(StubTranslator));
        session.enter(&room.id).await.unwrap();
        assert_eq!(session.listener_count(), 4);

        session.leave();
        assert_eq!(session.listener_count(), 0);

        session.enter(&room.id).await.unwrap();
        assert_eq!(session.listener_count(), 4);
    }

    #[tokio::test]
    async fn participant_added_reaches_the_mirror() {
        let store = test_store().await;
        let (mut session, room, _) = trilingual_session(&store, Arc::new(StubTranslator)).await;
        let expected: BTreeSet<String> = ["en", "es", "fr"].iter().map(|s| s.to_string()).collect();
        assert_eq!(room_language_set(session.participants()), expected);

        join_or_create(&store, "dieter", "de", &room.name).await.unwrap();
        loop {
            let event = timeout(Duration::from_secs(2), session.next_event())
                .await
                .expect("timed out waiting for ParticipantAdded")
                .unwrap();
            let added = matches!(event, SessionEvent::ParticipantAdded { .. });
            session.apply(&event);
            if added {
                break;
            }
        }
        assert!(room_language_set(session.participants()).contains("de"));
    }

    #[test]
    fn fanout_excludes_sender_and_dedups() {
        let participants = vec![
            Participant { id: "1".into(), name: "ana".into(), lang: "es".into() },
            Participant { id: "2".into(), name: "bob".into(), lang: "en".into() },
            Participant { id: "3".into(), name: "bill".into(), lang: "en".into() },
            Participant { id: "4".into(), name: "chloe".into(), lang: "fr".into() },
        ];
        assert_eq!(fanout_targets(&participants, "es"), vec!["en".to_owned(), "fr".to_owned()]);
    }

    #[test]
    fn translation_patch_strips_identity_when_translated() {
        let mut map = Translations::new();
        map.insert("es".to_owned(), "hola".to_owned());
        map.insert("en".to_owned(), "hello".to_owned());
        let patch = translation_patch(map, "es");
        assert!(!patch.contains_key("es"));
        assert!(patch.contains_key("en"));
    }

    #[test]
    fn translation_patch_keeps_lone_identity() {
        let mut map = Translations::new();
        map.insert("es".to_owned(), "hola".to_owned());
        let patch = translation_patch(map, "es");
        assert_eq!(patch.len(), 1);
        assert!(patch.contains_key("es"));
    }
}
