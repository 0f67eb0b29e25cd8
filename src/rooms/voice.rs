use axum::{
    debug_handler,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{lang, AppResult, AppState};

use super::PARTICIPANT_ID;

/// Transcribe an uploaded audio blob for the calling participant. The client
/// sends the returned transcript as a normal message; an empty transcript
/// means nothing was said and nothing gets sent.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn voice(
    Path(room_id): Path<Uuid>,
    State(state): State<AppState>,
    session: Session,

    mut multipart: Multipart,
) -> AppResult<Response> {
    let Some(participant_id) = session.get::<String>(PARTICIPANT_ID).await? else {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    };
    if state.store.participant(&room_id.to_string(), &participant_id).await?.is_none() {
        return Ok(StatusCode::UNAUTHORIZED.into_response());
    }

    let mut audio = None;
    let mut language = lang::AUTO.to_owned();
    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("blob") => audio = Some(field.bytes().await?),
            Some("language") => language = field.text().await?,
            _ => {}
        }
    }
    let Some(audio) = audio else {
        return Ok(StatusCode::BAD_REQUEST.into_response());
    };

    let transcript = state.transcriber.transcribe(audio.to_vec(), &language).await;
    Ok(transcript.into_response())
}
