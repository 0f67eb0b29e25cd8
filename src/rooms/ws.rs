use axum::{
    debug_handler,
    extract::{Path, State, WebSocketUpgrade, ws::WebSocket},
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::warn;
use uuid::Uuid;

use crate::{res, session::RoomSession, store::Participant, AppResult, AppState};

use super::PARTICIPANT_ID;

#[derive(Deserialize)]
pub(crate) struct SendMessageQuery {
    text: String,
}

#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(state): State<AppState>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let room_id = room_id.to_string();

    let Some(participant_id) = session.get::<String>(PARTICIPANT_ID).await? else {
        return res::sorry("session");
    };
    let Some(me) = state.store.participant(&room_id, &participant_id).await? else {
        return res::sorry("participant");
    };

    Ok(ws
        .on_upgrade(move |socket| relay(state, room_id, me, socket))
        .into_response())
}

/// Per-connection relay: one session, one task. Store events and client
/// messages are multiplexed with `select!` so all session state is touched
/// from a single logical thread of control.
async fn relay(state: AppState, room_id: String, me: Participant, socket: WebSocket) {
    let mut session = RoomSession::new(state.store.clone(), state.translator.clone());
    if let Err(e) = session.enter(&room_id).await {
        warn!(error = %e.0, "failed to enter room");
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = session.next_event() => {
                let Some(event) = event else { break };
                session.apply(&event);
                let Ok(json) = serde_json::to_string(&event) else { continue };
                if sender.send(json.into()).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                let Some(Ok(message)) = incoming else { break };
                let Ok(SendMessageQuery { text }) = serde_json::from_slice(&message.into_data()) else {
                    continue;
                };
                if let Err(e) = session.send_message(&me, &text).await {
                    warn!(error = %e.0, "send failed");
                }
            }
        }
    }

    session.leave();
}
