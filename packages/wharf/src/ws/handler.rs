//! WebSocket connection handling.
//!
//! Each connection gets the full catch-up sequence on attach (session list,
//! raw terminal replay per active session, latest directory metrics), then a
//! single select loop interleaves inbound commands, broadcast events, and
//! the heartbeat. A connection that misses a whole heartbeat interval is
//! dropped.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::session_manager::{SessionEvent, SessionState};
use crate::state::AppState;

use super::dispatch::dispatch;
use super::protocol::{encode, ClientCommand, ServerMessage};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    // Subscribe before replay so nothing published in between is missed.
    let mut events = state.sessions.subscribe();
    let mut metrics = state.watches.subscribe();

    if let Err(e) = replay(&mut sink, &state).await {
        debug!(error = %e, "connection closed during replay");
        return;
    }

    info!("observer connected");
    let mut heartbeat = tokio::time::interval(state.gateway.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; it must not count as a miss.
    heartbeat.tick().await;
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let Some(Ok(msg)) = inbound else { break };
                awaiting_pong = false;
                match msg {
                    Message::Text(text) => {
                        let reply = handle_text(&state, text.as_str()).await;
                        if let Some(reply) = reply {
                            if sink.send(Message::Text(encode(reply).into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Ping(data) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Close(_) => break,
                    Message::Binary(_) => {
                        let err = ServerMessage::Error {
                            code: "invalid_message".into(),
                            message: "binary frames are not part of the protocol".into(),
                        };
                        if sink.send(Message::Text(encode(err).into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let msg = event_message(event);
                        if sink.send(Message::Text(encode(msg).into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "observer lagged behind session events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            update = metrics.recv() => {
                match update {
                    Ok(m) => {
                        let msg = ServerMessage::DirectoryMetricsUpdate {
                            session_id: m.session_id,
                            file_count: m.file_count,
                            context_estimate: m.context_estimate,
                        };
                        if sink.send(Message::Text(encode(msg).into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }

            _ = heartbeat.tick() => {
                if awaiting_pong {
                    warn!("heartbeat missed, dropping connection");
                    break;
                }
                awaiting_pong = true;
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    info!("observer disconnected");
}

/// Parse and dispatch one text frame, producing a direct reply if any.
/// Parse failures and command failures both come back as `error` messages;
/// they never tear the connection down.
async fn handle_text(state: &AppState, text: &str) -> Option<ServerMessage> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            return Some(ServerMessage::Error {
                code: "invalid_message".into(),
                message: e.to_string(),
            });
        }
    };

    match dispatch(state, command).await {
        Ok(reply) => reply,
        Err((code, message)) => Some(ServerMessage::Error { code, message }),
    }
}

/// Catch-up sequence for a fresh connection: every session's metadata, then
/// the raw replay (with recorded dimensions) for each active session, then
/// the latest metrics snapshot per session.
async fn replay(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    state: &AppState,
) -> Result<(), axum::Error> {
    let sessions = state.sessions.list_all().await;

    for meta in &sessions {
        let msg = ServerMessage::SessionUpdate {
            session: meta.clone(),
        };
        sink.send(Message::Text(encode(msg).into())).await?;
    }

    for meta in &sessions {
        if meta.state != SessionState::Active {
            continue;
        }
        if let Ok((raw, cols, rows)) = state.sessions.raw_replay(&meta.id).await {
            if raw.is_empty() {
                continue;
            }
            let msg = ServerMessage::TerminalReplay {
                session_id: meta.id.clone(),
                data: String::from_utf8_lossy(&raw).into_owned(),
                cols,
                rows,
            };
            sink.send(Message::Text(encode(msg).into())).await?;
        }
    }

    for meta in &sessions {
        if let Some(m) = state.watches.latest_metrics(&meta.id).await {
            let msg = ServerMessage::DirectoryMetricsUpdate {
                session_id: m.session_id,
                file_count: m.file_count,
                context_estimate: m.context_estimate,
            };
            sink.send(Message::Text(encode(msg).into())).await?;
        }
    }

    Ok(())
}

fn event_message(event: SessionEvent) -> ServerMessage {
    match event {
        SessionEvent::Update(meta) => ServerMessage::SessionUpdate { session: meta },
        SessionEvent::Line { session_id, record } => ServerMessage::SessionOutput {
            session_id,
            stream: record.stream,
            data: record.data,
            timestamp: record.timestamp,
        },
        SessionEvent::RawOutput {
            session_id,
            data,
            timestamp,
        } => ServerMessage::TerminalOutput {
            session_id,
            data: String::from_utf8_lossy(&data).into_owned(),
            timestamp,
        },
        SessionEvent::Terminated {
            session_id,
            exit_code,
        } => ServerMessage::SessionTerminated {
            session_id,
            exit_code,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentType;
    use crate::config::FileConfig;
    use crate::session_manager::{LineRecord, SessionEvent};
    use crate::test_helpers::test_state;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite;

    type WsClient = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    async fn serve(state: AppState) -> std::net::SocketAddr {
        let app = crate::handlers::app_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    async fn connect(addr: std::net::SocketAddr) -> WsClient {
        let (socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("ws connect failed");
        socket
    }

    /// Next text frame as parsed JSON, skipping control frames.
    async fn next_json(socket: &mut WsClient) -> serde_json::Value {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), socket.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed")
                .expect("websocket error");
            if let tungstenite::Message::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn connect_replays_sessions_then_terminal_state() {
        let (state, tmp) = test_state();
        let meta = state
            .create_session(tmp.path().to_str().unwrap(), "replayed", AgentType::Claude)
            .await
            .unwrap();
        state
            .sessions
            .send_prompt(&meta.id, "echo replay-marker")
            .await
            .unwrap();

        // Wait until the replay buffer holds the echoed output, so the
        // catch-up sequence has something to carry.
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let (raw, _, _) = state.sessions.raw_replay(&meta.id).await.unwrap();
                if String::from_utf8_lossy(&raw).contains("replay-marker") {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("echo never reached the replay buffer");

        let addr = serve(state.clone()).await;
        let mut socket = connect(addr).await;

        // Catch-up order is fixed: the session snapshot first, then the
        // terminal replay tagged with the recorded dimensions.
        let first = next_json(&mut socket).await;
        assert_eq!(first["type"], "session-update");
        assert_eq!(first["payload"]["session"]["id"], meta.id.as_str());
        assert_eq!(first["payload"]["session"]["state"], "active");

        let second = next_json(&mut socket).await;
        assert_eq!(second["type"], "terminal-replay");
        assert_eq!(second["payload"]["sessionId"], meta.id.as_str());
        assert_eq!(second["payload"]["cols"], 80);
        assert_eq!(second["payload"]["rows"], 24);
        assert!(second["payload"]["data"]
            .as_str()
            .unwrap()
            .contains("replay-marker"));

        state.sessions.shutdown().await;
    }

    #[tokio::test]
    async fn silent_connection_is_dropped_after_missed_heartbeat() {
        let mut config = FileConfig::default();
        config.sessions.auto_launch = false;
        config.gateway.heartbeat_secs = 1;
        let state = AppState::new(&config);

        let addr = serve(state).await;
        let mut socket = connect(addr).await;

        // Never poll the stream, so the client's automatic pong replies
        // are never flushed and the server's pings go unanswered.
        tokio::time::sleep(Duration::from_millis(2500)).await;

        let dropped = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match socket.next().await {
                    None | Some(Err(_)) => return true,
                    Some(Ok(tungstenite::Message::Close(_))) => return true,
                    // Buffered frames from before the drop.
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("server never dropped the silent connection");
        assert!(dropped);
    }

    #[test]
    fn events_map_to_their_wire_kinds() {
        let line = event_message(SessionEvent::Line {
            session_id: "s1".into(),
            record: LineRecord {
                stream: "stdout".into(),
                data: "hello".into(),
                timestamp: 1,
            },
        });
        assert!(matches!(line, ServerMessage::SessionOutput { ref data, .. } if data == "hello"));

        let raw = event_message(SessionEvent::RawOutput {
            session_id: "s1".into(),
            data: b"\x1b[2J".to_vec(),
            timestamp: 2,
        });
        assert!(matches!(raw, ServerMessage::TerminalOutput { .. }));

        let done = event_message(SessionEvent::Terminated {
            session_id: "s1".into(),
            exit_code: Some(0),
        });
        assert!(matches!(done, ServerMessage::SessionTerminated { .. }));
    }
}
