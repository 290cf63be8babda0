use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

pub fn router() -> Router<AppState> {
	Router::new().route("/ws", get(websocket_handler))
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
	ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Forwards every Lock Event and Conflict Event to the client as a JSON
/// text frame, for as long as the connection stays open. A lagging
/// subscriber (spec.md §4.D) is reported to the client as a single
/// synthetic `lagged` message and resumes from the next live event,
/// matching the Event Recorder's "never block the publisher" guarantee.
///
/// Subscribes before sending the initial snapshot so no Lock Event
/// published in between is missed (spec.md §6: "push ... initial state
/// snapshot").
async fn handle_socket(mut socket: WebSocket, state: AppState) {
	let mut events = state.gcm.table().subscribe().await;

	let snapshot = state.gcm.snapshot().await;
	match serde_json::to_string(&serde_json::json!({ "snapshot": snapshot })) {
		Ok(payload) => {
			if socket.send(Message::Text(payload)).await.is_err() {
				return;
			}
		}
		Err(err) => warn!(error = %err, "failed to serialize initial snapshot for websocket"),
	}

	loop {
		tokio::select! {
			received = events.recv() => match received {
				Ok(item) => {
					let payload = match serde_json::to_string(&item) {
						Ok(payload) => payload,
						Err(err) => {
							warn!(error = %err, "failed to serialize event for websocket");
							continue;
						}
					};
					if socket.send(Message::Text(payload)).await.is_err() {
						break;
					}
				}
				Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
					state.gcm.table().note_dropped_events(n).await;
					let notice = serde_json::json!({ "lagged": n });
					if socket.send(Message::Text(notice.to_string())).await.is_err() {
						break;
					}
				}
				Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
			},
			incoming = socket.recv() => match incoming {
				Some(Ok(Message::Close(_))) | None => break,
				Some(Ok(_)) => {}
				Some(Err(err)) => {
					debug!(error = %err, "websocket receive error");
					break;
				}
			},
		}
	}
}
