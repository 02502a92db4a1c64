//! WebSocket server for real-time notification delivery
//!
//! Clients connect to `/ws` and authenticate with the same bearer token used
//! on the HTTP surface; until the handshake completes, no events are
//! delivered. Presence is observable through [`WsState::is_online`].

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::auth::verify_token;
use crate::notifications::model::Notification;

/// Event pushed to a single account's live subscriptions
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub account_id: Uuid,
    pub payload: ServerEvent,
}

/// Server-to-client messages
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "notification")]
    Notification(Notification),
    #[serde(rename = "notification:read")]
    NotificationRead { id: Uuid },
    #[serde(rename = "notifications:all-read")]
    AllRead,
    #[serde(rename = "authenticated")]
    Authenticated,
    #[serde(rename = "error")]
    Error { message: String },
    #[serde(rename = "pong")]
    Pong,
}

/// Client-to-server messages
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ClientMessage {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },
    #[serde(rename = "ping")]
    Ping,
}

/// Shared WebSocket state: one broadcast channel plus a presence registry
/// mapping account ids to live subscription ids.
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<OutboundEvent>,
    subscribers: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
    jwt_secret: String,
}

impl WsState {
    pub fn new(jwt_secret: String) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            jwt_secret,
        }
    }

    /// Push an event to every live subscription for the account. Offline
    /// accounts read the persisted notification history on reconnect, so a
    /// missing subscriber is not an error.
    pub fn push(&self, account_id: Uuid, payload: ServerEvent) {
        let _ = self.tx.send(OutboundEvent {
            account_id,
            payload,
        });
    }

    /// Whether the account currently has at least one live subscription
    pub async fn is_online(&self, account_id: Uuid) -> bool {
        self.subscribers
            .read()
            .await
            .get(&account_id)
            .map(|subs| !subs.is_empty())
            .unwrap_or(false)
    }

    async fn register(&self, account_id: Uuid, subscription_id: Uuid) {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(account_id)
            .or_default()
            .insert(subscription_id);
        tracing::info!(%account_id, %subscription_id, "Subscriber connected");
    }

    async fn unregister(&self, account_id: Uuid, subscription_id: Uuid) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(subs) = subscribers.get_mut(&account_id) {
            subs.remove(&subscription_id);
            if subs.is_empty() {
                subscribers.remove(&account_id);
            }
        }
        tracing::info!(%account_id, %subscription_id, "Subscriber disconnected");
    }
}

/// WebSocket handler - upgrades the HTTP connection
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    // First message must be the authentication handshake
    let account_id = loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Authenticate { token }) => {
                        match verify_token(&token, &state.jwt_secret) {
                            Ok(claims) if claims.token_type == "access" => {
                                match Uuid::parse_str(&claims.sub) {
                                    Ok(id) => break id,
                                    Err(_) => {
                                        send_event(
                                            &mut sender,
                                            &ServerEvent::Error {
                                                message: "invalid token subject".to_string(),
                                            },
                                        )
                                        .await;
                                        return;
                                    }
                                }
                            }
                            _ => {
                                send_event(
                                    &mut sender,
                                    &ServerEvent::Error {
                                        message: "authentication failed".to_string(),
                                    },
                                )
                                .await;
                                return;
                            }
                        }
                    }
                    Ok(ClientMessage::Ping) => {
                        send_event(&mut sender, &ServerEvent::Pong).await;
                    }
                    Err(_) => {
                        send_event(
                            &mut sender,
                            &ServerEvent::Error {
                                message: "expected an authenticate message".to_string(),
                            },
                        )
                        .await;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            _ => {}
        }
    };

    let subscription_id = Uuid::new_v4();
    state.register(account_id, subscription_id).await;
    send_event(&mut sender, &ServerEvent::Authenticated).await;

    let mut rx = state.tx.subscribe();

    // Forward matching broadcast events to this subscriber
    let mut send_task = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if event.account_id != account_id {
                continue;
            }
            if let Ok(text) = serde_json::to_string(&event.payload) {
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    // Drain client messages until the socket closes
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    state.unregister(account_id, subscription_id).await;
}

async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    event: &ServerEvent,
) {
    if let Ok(text) = serde_json::to_string(event) {
        let _ = sender.send(Message::Text(text)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_presence_tracking() {
        let state = WsState::new("secret".to_string());
        let account = Uuid::new_v4();
        let sub_a = Uuid::new_v4();
        let sub_b = Uuid::new_v4();

        assert!(!state.is_online(account).await);

        state.register(account, sub_a).await;
        state.register(account, sub_b).await;
        assert!(state.is_online(account).await);

        state.unregister(account, sub_a).await;
        assert!(state.is_online(account).await);

        state.unregister(account, sub_b).await;
        assert!(!state.is_online(account).await);
    }

    #[tokio::test]
    async fn test_push_without_subscribers_does_not_panic() {
        let state = WsState::new("secret".to_string());
        state.push(Uuid::new_v4(), ServerEvent::AllRead);
    }

    #[test]
    fn test_event_wire_names() {
        let event = ServerEvent::NotificationRead { id: Uuid::nil() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "notification:read");

        let event = ServerEvent::AllRead;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "notifications:all-read");
    }
}
