use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::gateway::RoomManager;
use crate::room::{OUTBOUND_QUEUE_CAPACITY, Outbound};
use crate::types::entities::Role;
use crate::types::events::{DecodeError, ErrorCode, ServerMessage, decode_client_message};

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub session_id: String,
    pub token: String,
    pub role: Role,
    pub user_name: Option<String>,
}

/// Extract connection parameters from the upgrade request. The token comes
/// from the query string or, failing that, a session cookie.
pub fn parse_connect_params(
    query: &HashMap<String, String>,
    cookie_header: Option<&str>,
) -> Option<ConnectParams> {
    let session_id = query
        .get("sessionId")
        .filter(|s| !s.is_empty())?
        .to_string();
    let token = query
        .get("token")
        .filter(|t| !t.is_empty())
        .cloned()
        .or_else(|| cookie_header.and_then(|h| cookie_value(h, "session-token")))
        .or_else(|| cookie_header.and_then(|h| cookie_value(h, "better-auth.session_token")))?;
    let role = query
        .get("role")
        .map(|r| Role::parse(r))
        .unwrap_or(Role::Observer);
    let user_name = query.get("userName").filter(|n| !n.is_empty()).cloned();
    Some(ConnectParams {
        session_id,
        token,
        role,
        user_name,
    })
}

fn cookie_value(header: &str, name: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (key, value) = pair.trim().split_once('=')?;
            (key == name).then(|| value.to_string())
        })
        .next()
        .filter(|v| !v.is_empty())
}

pub async fn handle_connection(
    manager: Arc<RoomManager>,
    socket: WebSocket,
    params: ConnectParams,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    // Bounded: a client that stops reading saturates this queue and is
    // dropped on the next heartbeat cycle instead of buffering forever.
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_QUEUE_CAPACITY);

    let client_id = manager.next_client_id();
    let room = manager.get_or_create_room(&params.session_id);

    if let Err(code) = room.add_client(&client_id, params.role, params.user_name.clone(), tx) {
        let frame = ServerMessage::session_error(
            code,
            "an interviewer is already connected to this session",
        );
        if let Ok(text) = serde_json::to_string(&frame) {
            let _ = ws_sender.send(Message::Text(text.into())).await;
        }
        let _ = ws_sender
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "unauthorized".into(),
            })))
            .await;
        manager.client_disconnected(&params.session_id);
        return;
    }

    // Sender task: drains the room's outbound queue into the socket.
    let sender_task = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Frame(text) => {
                    ws_sender
                        .send(Message::Text(text.to_string().into()))
                        .await
                }
                Outbound::Ping => ws_sender.send(Message::Ping(Default::default())).await,
                Outbound::Close => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Receive loop.
    while let Some(Ok(msg)) = ws_receiver.next().await {
        match msg {
            Message::Text(text) => match decode_client_message(&text) {
                Ok(message) => room.handle_message(&client_id, message).await,
                Err(e) => {
                    let description = match &e {
                        DecodeError::Invalid => "malformed message".to_string(),
                        DecodeError::Unknown(t) => format!("unknown message type: {t}"),
                    };
                    room.send_to_client(&client_id, &ServerMessage::error(e.code(), description));
                }
            },
            Message::Binary(_) => {
                room.send_to_client(
                    &client_id,
                    &ServerMessage::error(
                        ErrorCode::InvalidMessage,
                        "binary frames are not supported on this channel",
                    ),
                );
            }
            Message::Pong(_) => room.mark_pong(&client_id),
            Message::Close(_) => break,
            Message::Ping(_) => {
                // axum answers protocol pings itself
            }
        }
    }

    // Cleanup
    room.remove_client(&client_id);
    manager.client_disconnected(&params.session_id);
    sender_task.abort();
    tracing::info!(
        client_id = %client_id,
        session_id = %params.session_id,
        "Client disconnected"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_full_query() {
        let params = parse_connect_params(
            &query(&[
                ("sessionId", "s1"),
                ("token", "t"),
                ("role", "interviewer"),
                ("userName", "Dana"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(params.session_id, "s1");
        assert_eq!(params.token, "t");
        assert_eq!(params.role, Role::Interviewer);
        assert_eq!(params.user_name.as_deref(), Some("Dana"));
    }

    #[test]
    fn role_defaults_to_observer() {
        let params =
            parse_connect_params(&query(&[("sessionId", "s1"), ("token", "t")]), None).unwrap();
        assert_eq!(params.role, Role::Observer);
        assert!(params.user_name.is_none());
    }

    #[test]
    fn missing_session_or_token_is_rejected() {
        assert!(parse_connect_params(&query(&[("token", "t")]), None).is_none());
        assert!(parse_connect_params(&query(&[("sessionId", "s1")]), None).is_none());
        assert!(parse_connect_params(&query(&[("sessionId", ""), ("token", "t")]), None).is_none());
    }

    #[test]
    fn token_falls_back_to_cookies() {
        let params = parse_connect_params(
            &query(&[("sessionId", "s1")]),
            Some("theme=dark; session-token=abc"),
        )
        .unwrap();
        assert_eq!(params.token, "abc");

        let params = parse_connect_params(
            &query(&[("sessionId", "s1")]),
            Some("better-auth.session_token=xyz"),
        )
        .unwrap();
        assert_eq!(params.token, "xyz");
    }

    #[test]
    fn query_token_wins_over_cookie() {
        let params = parse_connect_params(
            &query(&[("sessionId", "s1"), ("token", "fromquery")]),
            Some("session-token=fromcookie"),
        )
        .unwrap();
        assert_eq!(params.token, "fromquery");
    }

    #[test]
    fn unknown_role_string_becomes_observer() {
        let params = parse_connect_params(
            &query(&[("sessionId", "s1"), ("token", "t"), ("role", "admin")]),
            None,
        )
        .unwrap();
        assert_eq!(params.role, Role::Observer);
    }
}
