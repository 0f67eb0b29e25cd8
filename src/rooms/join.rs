use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}, Form};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::{include_res, lang, session, store::RoomStore, AppResult};

use super::PARTICIPANT_ID;

#[derive(Debug, Deserialize)]
pub struct JoinQuery {
    username: String,
    language: String,
    room: String,
}

#[debug_handler]
pub async fn join_page() -> impl IntoResponse {
    let mut options = String::new();
    for (code, name) in lang::SUPPORTED_LANGUAGES {
        options += &format!("<option value=\"{code}\">{name}</option>\n");
    }
    Html(include_res!(str, "/pages/join.html").replace("{lang_options}", &options))
}

#[debug_handler]
pub async fn join(
    State(store): State<RoomStore>,
    session: Session,

    Form(JoinQuery { username, language, room }): Form<JoinQuery>,
) -> AppResult<Response> {
    let (room, participant) = match session::join_or_create(&store, &username, &language, &room).await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(error = %e.0, "join failed");
            return Ok(Redirect::to("/").into_response());
        }
    };

    session.insert(PARTICIPANT_ID, participant.id.clone()).await?;
    info!(room = %room.name, participant = %participant.id, lang = %participant.lang, "joined room");

    Ok(Redirect::to(&format!("/r/{}", room.id)).into_response())
}
