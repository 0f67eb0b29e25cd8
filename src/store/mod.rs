//! Sqlite-backed room store.
//!
//! Persisted layout follows the paths `rooms/{roomId}`,
//! `participants/{roomId}/{participantId}` and `messages/{roomId}/{messageId}`.
//! Every write fans out a whole-record change event on that room's broadcast
//! feed; the store is the single source of truth and arbitrates write order.

mod model;

pub use model::{Message, MessageState, Participant, Room, Translations};

use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::AppResult;

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum StoreEvent {
    ParticipantAdded(Participant),
    MessageAdded(Message),
    MessageChanged(Message),
}

#[derive(Clone)]
pub struct RoomStore {
    pool: SqlitePool,
    feeds: Arc<DashMap<String, broadcast::Sender<StoreEvent>>>,
}

impl RoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            feeds: Arc::new(DashMap::new()),
        }
    }

    pub async fn room(&self, room_id: &str) -> AppResult<Option<Room>> {
        let row: Option<(String, String, String, String)> =
            sqlx::query_as("SELECT id,name,participants_ref,messages_ref FROM rooms WHERE id=?")
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(row_to_room))
    }

    pub async fn room_by_name(&self, name: &str) -> AppResult<Option<Room>> {
        let row: Option<(String, String, String, String)> =
            sqlx::query_as("SELECT id,name,participants_ref,messages_ref FROM rooms WHERE name=?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(row_to_room))
    }

    /// Create a room under an already-normalized name. Two racing creators
    /// resolve to a single record through the unique name constraint; the
    /// loser reads back the winner's row.
    pub async fn create_room(&self, name: &str) -> AppResult<Room> {
        let room = Room::new(name);
        sqlx::query(
            "INSERT INTO rooms (id,name,participants_ref,messages_ref) VALUES (?,?,?,?) \
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&room.id)
        .bind(&room.name)
        .bind(&room.participants_ref)
        .bind(&room.messages_ref)
        .execute(&self.pool)
        .await?;

        self.room_by_name(name)
            .await?
            .ok_or_else(|| format!("room {name} vanished right after create").into())
    }

    pub async fn add_participant(&self, room_id: &str, name: &str, lang: &str) -> AppResult<Participant> {
        let participant = Participant::new(name, lang);
        sqlx::query("INSERT INTO participants (id,room_id,name,lang) VALUES (?,?,?,?)")
            .bind(&participant.id)
            .bind(room_id)
            .bind(&participant.name)
            .bind(&participant.lang)
            .execute(&self.pool)
            .await?;

        self.emit(room_id, StoreEvent::ParticipantAdded(participant.clone()));
        Ok(participant)
    }

    pub async fn participants(&self, room_id: &str) -> AppResult<Vec<Participant>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT id,name,lang FROM participants WHERE room_id=? ORDER BY id")
                .bind(room_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id, name, lang)| Participant { id, name, lang }).collect())
    }

    pub async fn participant(&self, room_id: &str, participant_id: &str) -> AppResult<Option<Participant>> {
        let row: Option<(String, String, String)> =
            sqlx::query_as("SELECT id,name,lang FROM participants WHERE room_id=? AND id=?")
                .bind(room_id)
                .bind(participant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(id, name, lang)| Participant { id, name, lang }))
    }

    /// Optimistic insert: the record lands with an empty translation map in
    /// the `pending` state, and the store assigns id and timestamp.
    pub async fn append_message(
        &self,
        room_id: &str,
        sender_id: &str,
        text: &str,
        source_lang: &str,
    ) -> AppResult<Message> {
        let message = Message {
            id: Uuid::now_v7().to_string(),
            sender_id: sender_id.to_owned(),
            original_text: text.to_owned(),
            source_lang: source_lang.to_owned(),
            translations: Translations::new(),
            state: MessageState::Pending,
            timestamp: now_ms(),
        };

        sqlx::query(
            "INSERT INTO messages (id,room_id,sender_id,original_text,source_lang,translations,state,timestamp) \
             VALUES (?,?,?,?,?,?,?,?)",
        )
        .bind(&message.id)
        .bind(room_id)
        .bind(&message.sender_id)
        .bind(&message.original_text)
        .bind(&message.source_lang)
        .bind(serde_json::to_string(&message.translations)?)
        .bind(message.state.as_str())
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        self.emit(room_id, StoreEvent::MessageAdded(message.clone()));
        Ok(message)
    }

    pub async fn messages(&self, room_id: &str) -> AppResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id,sender_id,original_text,source_lang,translations,state,timestamp \
             FROM messages WHERE room_id=? ORDER BY timestamp,id",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_message).collect()
    }

    pub async fn message(&self, room_id: &str, message_id: &str) -> AppResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id,sender_id,original_text,source_lang,translations,state,timestamp \
             FROM messages WHERE room_id=? AND id=?",
        )
        .bind(room_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_message).transpose()
    }

    /// The single follow-up update of the send workflow: set the translation
    /// map and flip the state. A missing record is a benign no-op (a patch
    /// arriving after the room went away updates nothing).
    pub async fn patch_translations(
        &self,
        room_id: &str,
        message_id: &str,
        translations: &Translations,
    ) -> AppResult<Option<Message>> {
        sqlx::query("UPDATE messages SET translations=?, state=? WHERE room_id=? AND id=?")
            .bind(serde_json::to_string(translations)?)
            .bind(MessageState::Translated.as_str())
            .bind(room_id)
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        let updated = self.message(room_id, message_id).await?;
        match &updated {
            Some(message) => self.emit(room_id, StoreEvent::MessageChanged(message.clone())),
            None => debug!(%message_id, "translation patch hit a missing message"),
        }
        Ok(updated)
    }

    /// Subscribe to a room's change feed. The channel is created lazily on
    /// first subscription.
    pub fn feed(&self, room_id: &str) -> broadcast::Receiver<StoreEvent> {
        self.feeds
            .entry(room_id.to_owned())
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    fn emit(&self, room_id: &str, event: StoreEvent) {
        if let Some(tx) = self.feeds.get(room_id) {
            let _ = tx.send(event);
        }
    }
}

type MessageRow = (String, String, String, String, String, String, i64);

fn row_to_room((id, name, participants_ref, messages_ref): (String, String, String, String)) -> Room {
    Room { id, name, participants_ref, messages_ref }
}

fn row_to_message(
    (id, sender_id, original_text, source_lang, translations, state, timestamp): MessageRow,
) -> AppResult<Message> {
    let state = match state.as_str() {
        "pending" => MessageState::Pending,
        "translated" => MessageState::Translated,
        other => return Err(format!("unknown message state {other} on message {id}").into()),
    };
    Ok(Message {
        id,
        sender_id,
        original_text,
        source_lang,
        translations: serde_json::from_str(&translations)?,
        state,
        timestamp,
    })
}

fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;
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

    #[tokio::test]
    async fn duplicate_create_yields_one_room() {
        let store = test_store().await;
        let a = store.create_room("lobby").await.unwrap();
        let b = store.create_room("lobby").await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.participants_ref, format!("participants/{}", a.id));
    }

    #[tokio::test]
    async fn message_starts_pending_with_empty_map() {
        let store = test_store().await;
        let room = store.create_room("lobby").await.unwrap();
        let sender = store.add_participant(&room.id, "ana", "es").await.unwrap();

        let message = store.append_message(&room.id, &sender.id, "hola", "es").await.unwrap();
        assert_eq!(message.state, MessageState::Pending);
        assert!(message.translations.is_empty());

        let stored = store.message(&room.id, &message.id).await.unwrap().unwrap();
        assert_eq!(stored.state, MessageState::Pending);
        assert!(stored.translations.is_empty());
        assert!(stored.timestamp > 0);
    }

    #[tokio::test]
    async fn patch_flips_state_and_emits_changed() {
        let store = test_store().await;
        let room = store.create_room("lobby").await.unwrap();
        let sender = store.add_participant(&room.id, "ana", "es").await.unwrap();
        let mut feed = store.feed(&room.id);

        let message = store.append_message(&room.id, &sender.id, "hola", "es").await.unwrap();
        let mut map = Translations::new();
        map.insert("en".to_owned(), "hello".to_owned());
        store.patch_translations(&room.id, &message.id, &map).await.unwrap();

        let mut changed = None;
        while changed.is_none() {
            match timeout(Duration::from_secs(2), feed.recv()).await.unwrap().unwrap() {
                StoreEvent::MessageChanged(m) => changed = Some(m),
                _ => {}
            }
        }
        let changed = changed.unwrap();
        assert_eq!(changed.state, MessageState::Translated);
        assert_eq!(changed.translations.get("en").map(String::as_str), Some("hello"));
    }

    #[tokio::test]
    async fn patch_of_missing_message_is_noop() {
        let store = test_store().await;
        let room = store.create_room("lobby").await.unwrap();
        let patched = store
            .patch_translations(&room.id, "nope", &Translations::new())
            .await
            .unwrap();
        assert!(patched.is_none());
    }

    #[tokio::test]
    async fn messages_come_back_in_timestamp_order() {
        let store = test_store().await;
        let room = store.create_room("lobby").await.unwrap();
        let sender = store.add_participant(&room.id, "ana", "es").await.unwrap();

        let first = store.append_message(&room.id, &sender.id, "one", "es").await.unwrap();
        let second = store.append_message(&room.id, &sender.id, "two", "es").await.unwrap();

        let ids: Vec<String> = store
            .messages(&room.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }
}
