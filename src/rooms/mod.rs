mod join;
mod room;
mod voice;
mod ws;

pub use join::{join, join_page};

use axum::{routing::{get, post}, Router};

use crate::AppState;

/// Cookie key for the participant record created at join.
pub(crate) const PARTICIPANT_ID: &str = "participant_id";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{uuid}", get(room::room))
        .route("/{uuid}/ws", get(ws::room_ws))
        .route("/{uuid}/voice", post(voice::voice))
}
