use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::token::{MediaClaims, TokenScope, validate_media_token};
use crate::engine::envelope::Delivery;

use super::app_state::AppState;

#[derive(Deserialize)]
pub struct RelayQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /ws/channel?token=…: join the messaging channel named in the token.
pub async fn channel_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RelayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(token) = query.token.filter(|t| !t.is_empty()) else {
        return (StatusCode::UNAUTHORIZED, "token required").into_response();
    };
    let claims = match validate_media_token(&token, &state.rtc_config, TokenScope::Rtm) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "relay token rejected");
            return (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_relay(socket, state, claims))
}

async fn run_relay(socket: WebSocket, state: Arc<AppState>, claims: MediaClaims) {
    let channel = claims.channel;
    let uid = claims.sub;
    let (subscription, mut deliveries) = state.hub.subscribe(&channel, &uid);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            msg = stream.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if let Err(e) = state.hub.publish(&channel, &uid, text.as_str()) {
                            debug!(%channel, %uid, error = %e, "relay publish rejected");
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            delivery = deliveries.recv() => {
                let Some(delivery) = delivery else { break };
                if send_delivery(&mut sink, &delivery).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(subscription);
    info!(%channel, %uid, "relay connection closed");
}

async fn send_delivery(
    sink: &mut SplitSink<WebSocket, Message>,
    delivery: &Delivery,
) -> Result<(), ()> {
    let json = match serde_json::to_string(delivery) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "failed to serialize delivery");
            return Err(());
        }
    };
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
