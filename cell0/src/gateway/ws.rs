//! WebSocket `/events` endpoint (spec §4.3 event bus, §6 WS protocol):
//! client frames `subscribe`/`ping`/`get_history`/`get_stats`, server frames
//! `event`/`heartbeat`/`pong`/`history`/`stats`.

use super::GatewayState;
use crate::eventbus::{Event, EventKind};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe { kinds: Option<Vec<EventKind>> },
    Ping,
    GetHistory,
    GetStats,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Event { event: &'a Event },
    Heartbeat,
    Pong,
    History { events: Vec<Event> },
    Stats { subscriber_count: usize, dropped: u64 },
}

pub async fn events_ws(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

async fn handle_socket(mut socket: WebSocket, state: Arc<GatewayState>) {
    let mut subscription = state.bus.subscribe(None, 256);
    let mut missed_heartbeats: u32 = 0;
    let limit = state.bus.missed_heartbeats_before_close();

    loop {
        tokio::select! {
            maybe_event = subscription.rx.recv() => {
                let Some(event) = maybe_event else { break };
                if send_frame(&mut socket, &ServerFrame::Event { event: &event }).await.is_err() {
                    break;
                }
            }
            maybe_msg = socket.recv() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else { continue };
                        if handle_client_frame(frame, &mut socket, &state, &mut subscription, &mut missed_heartbeats)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                missed_heartbeats += 1;
                if missed_heartbeats >= limit {
                    break;
                }
                if send_frame(&mut socket, &ServerFrame::Heartbeat).await.is_err() {
                    break;
                }
            }
        }
    }
    state.bus.prune_closed();
}

async fn handle_client_frame(
    frame: ClientFrame,
    socket: &mut WebSocket,
    state: &Arc<GatewayState>,
    subscription: &mut crate::eventbus::Subscription,
    missed_heartbeats: &mut u32,
) -> Result<(), axum::Error> {
    match frame {
        ClientFrame::Subscribe { kinds } => {
            *subscription = state.bus.subscribe(kinds, 256);
            Ok(())
        }
        ClientFrame::Ping => {
            *missed_heartbeats = 0;
            send_frame(socket, &ServerFrame::Pong).await
        }
        ClientFrame::GetHistory => {
            let events = state.bus.history();
            send_frame(socket, &ServerFrame::History { events }).await
        }
        ClientFrame::GetStats => {
            let stats = ServerFrame::Stats {
                subscriber_count: state.bus.subscriber_count(),
                dropped: subscription.dropped_count(),
            };
            send_frame(socket, &stats).await
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame<'_>) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).unwrap_or_default();
    socket.send(Message::Text(text)).await
}
