use axum::{debug_handler, extract::{Path, State}, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{include_res, res, store::RoomStore, AppResult};

use super::PARTICIPANT_ID;

#[debug_handler]
pub(crate) async fn room(
    State(store): State<RoomStore>,
    session: Session,
    Path(room_id): Path<Uuid>,
) -> AppResult<Response> {
    let Some(room) = store.room(&room_id.to_string()).await? else {
        return res::sorry("room");
    };

    let Some(participant_id) = session.get::<String>(PARTICIPANT_ID).await? else {
        return Ok(Redirect::to("/").into_response());
    };
    let Some(me) = store.participant(&room.id, &participant_id).await? else {
        return Ok(Redirect::to("/").into_response());
    };

    let body = include_res!(str, "/pages/room.html")
        .replace("{room_id}", &room.id)
        .replace("{room_name}", &room.name)
        .replace("{me_id}", &me.id)
        .replace("{me_name}", &me.name)
        .replace("{me_lang}", &me.lang);

    Ok(Html(body).into_response())
}
