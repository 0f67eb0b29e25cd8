use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Language code -> translated text.
pub type Translations = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub participants_ref: String,
    pub messages_ref: String,
}

impl Room {
    pub(crate) fn new(name: &str) -> Self {
        let id = Uuid::now_v7().to_string();
        Self {
            participants_ref: format!("participants/{id}"),
            messages_ref: format!("messages/{id}"),
            name: name.to_owned(),
            id,
        }
    }
}

/// One record per join; a rejoining user gets a fresh record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    pub name: String,
    pub lang: String,
}

impl Participant {
    pub(crate) fn new(name: &str, lang: &str) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            name: name.to_owned(),
            lang: lang.to_owned(),
        }
    }
}

/// Lifecycle of a message's translation map: written once with `Pending`,
/// flipped to `Translated` by the single follow-up patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Pending,
    Translated,
}

impl MessageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Pending => "pending",
            MessageState::Translated => "translated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub original_text: String,
    pub source_lang: String,
    pub translations: Translations,
    pub state: MessageState,
    /// Server-assigned, unix milliseconds.
    pub timestamp: i64,
}
