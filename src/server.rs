use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;
use warp::ws::WebSocket;

use crate::config::ServerConfig;
use crate::crypto::{CryptoError, MessageCrypto};
use crate::messages::{ClientEvent, ServerEvent};
use crate::presence::PresenceTable;
use crate::router::RoomRouter;
use crate::spam::{classify, RateLimiter, RateLimitViolation, SpamReason};
use crate::store::{
    MessageRecord, MessageType, OnlineStatus, SocialGraph, Storage, StorageError,
};

/// Why an inbound event was rejected. Every variant terminates at the
/// dispatcher as a single-recipient `error` event; none of them crash the
/// connection or leak into a broadcast.
#[derive(Error, Debug)]
pub enum EventError {
    #[error(transparent)]
    RateLimited(#[from] RateLimitViolation),
    #[error(transparent)]
    ContentRejected(#[from] SpamReason),
    #[error("You cannot send messages to this user.")]
    BlockedByRecipient,
    #[error("You have blocked this user. Unblock to send messages.")]
    RecipientBlocked,
    #[error("Conversation not found")]
    RoomNotFound,
    #[error("Internal server error")]
    Storage(#[from] StorageError),
    #[error("Internal server error")]
    Crypto(#[from] CryptoError),
}

/// The realtime core: one instance owns the presence table, room router and
/// rate limiter, and drives a session state machine per websocket
/// connection (`Unauthenticated -> Authenticated -> Closed`; connections
/// only reach [`ChatServer::handle_connection`] once authenticated, since
/// token verification happens at upgrade time).
pub struct ChatServer {
    presence: PresenceTable,
    router: RoomRouter,
    limiter: RateLimiter,
    crypto: MessageCrypto,
    storage: Arc<dyn Storage>,
    social: Arc<dyn SocialGraph>,
}

impl ChatServer {
    pub fn new(
        config: &ServerConfig,
        storage: Arc<dyn Storage>,
        social: Arc<dyn SocialGraph>,
    ) -> Result<Self, CryptoError> {
        let crypto = match &config.encryption_key {
            Some(key) => MessageCrypto::from_key(key)?,
            None => MessageCrypto::derive(&config.secret_key),
        };

        Ok(ChatServer {
            presence: PresenceTable::new(),
            router: RoomRouter::new(config.queue_capacity),
            limiter: RateLimiter::new(config.max_events_per_minute, config.max_events_per_hour),
            crypto,
            storage,
            social,
        })
    }

    /// Drive one authenticated websocket session until it disconnects.
    pub async fn handle_connection(&self, ws: WebSocket, user_id: String) {
        let connection_id = Uuid::new_v4().to_string();
        info!("connection {connection_id} established for user {user_id}");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut outbound = self.router.register(&connection_id).await;

        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if ws_tx.send(message).await.is_err() {
                    break;
                }
            }
        });

        self.establish(&connection_id, &user_id).await;

        while let Some(result) = ws_rx.next().await {
            match result {
                Ok(frame) => {
                    let Ok(text) = frame.to_str() else { continue };
                    match serde_json::from_str::<ClientEvent>(text) {
                        Ok(event) => self.handle_event(&connection_id, &user_id, event).await,
                        Err(e) => debug!("ignoring malformed frame on {connection_id}: {e}"),
                    }
                }
                Err(e) => {
                    debug!("websocket error on {connection_id}: {e}");
                    break;
                }
            }
        }

        self.handle_disconnect(&connection_id).await;
    }

    /// Register presence for a freshly authenticated connection, write
    /// through the durable status and announce the user globally.
    async fn establish(&self, connection_id: &str, user_id: &str) {
        self.presence.on_connect(connection_id, user_id).await;
        if let Err(e) = self
            .storage
            .set_user_status(user_id, OnlineStatus::Online)
            .await
        {
            warn!("failed to persist online status for {user_id}: {e}");
        }
        self.router
            .broadcast_all(
                &ServerEvent::UserOnline {
                    user_id: user_id.to_string(),
                },
                Some(connection_id),
            )
            .await;
    }

    async fn handle_event(&self, connection_id: &str, user_id: &str, event: ClientEvent) {
        match event {
            ClientEvent::JoinRoom { conversation_id } => {
                self.router.join(&conversation_id, connection_id).await;
            }

            ClientEvent::SendMessage {
                conversation_id,
                content,
                message_type,
                file_name,
            } => {
                if let Err(e) = self
                    .handle_send_message(user_id, conversation_id, content, message_type, file_name)
                    .await
                {
                    debug!("rejecting send_message from {user_id}: {e}");
                    self.reject(connection_id, &e).await;
                }
            }

            ClientEvent::Typing { conversation_id } => {
                self.router
                    .broadcast(
                        &conversation_id,
                        &ServerEvent::UserTyping {
                            user_id: user_id.to_string(),
                            conversation_id: conversation_id.clone(),
                        },
                        Some(connection_id),
                    )
                    .await;
            }

            ClientEvent::MessageRead {
                message_id,
                conversation_id,
            } => {
                if let Err(e) = self.storage.mark_read(&message_id, user_id).await {
                    warn!("failed to record read receipt for {message_id}: {e}");
                    self.reject(connection_id, &EventError::Storage(e)).await;
                    return;
                }
                self.router
                    .broadcast(
                        &conversation_id,
                        &ServerEvent::MessageRead {
                            message_id,
                            user_id: user_id.to_string(),
                        },
                        None,
                    )
                    .await;
            }

            ClientEvent::CallUser {
                callee_id,
                signal,
                call_type,
            } => {
                self.handle_call_user(user_id, &callee_id, signal, call_type)
                    .await;
            }

            ClientEvent::AcceptCall { caller_id, signal } => {
                self.relay_to_user(
                    &caller_id,
                    ServerEvent::CallAccepted {
                        callee_id: user_id.to_string(),
                        signal,
                    },
                )
                .await;
            }

            ClientEvent::RejectCall { caller_id } => {
                self.relay_to_user(&caller_id, ServerEvent::CallRejected).await;
            }

            ClientEvent::EndCall { peer_id } => {
                self.relay_to_user(&peer_id, ServerEvent::CallEnded).await;
            }
        }
    }

    async fn handle_send_message(
        &self,
        user_id: &str,
        conversation_id: String,
        content: String,
        message_type: MessageType,
        file_name: Option<String>,
    ) -> Result<(), EventError> {
        self.limiter.check_rate(user_id, Instant::now())?;

        let conversation = self
            .storage
            .get_conversation(&conversation_id)
            .await?
            .ok_or(EventError::RoomNotFound)?;

        if let Some(other_id) = conversation
            .participants
            .iter()
            .find(|p| p.as_str() != user_id)
        {
            if self.social.is_blocked(other_id, user_id).await? {
                return Err(EventError::BlockedByRecipient);
            }
            if self.social.is_blocked(user_id, other_id).await? {
                return Err(EventError::RecipientBlocked);
            }
        }

        // Attachment payloads are opaque blobs; only plain text goes
        // through the heuristic gate.
        if message_type == MessageType::Text {
            classify(&content)?;
        }

        let stored_content = if content.is_empty() {
            String::new()
        } else {
            self.crypto.encrypt(&content)?
        };

        let timestamp = Utc::now().to_rfc3339();
        let record = MessageRecord {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            conversation_id,
            sender_id: user_id.to_string(),
            content: stored_content,
            message_type,
            file_name,
            timestamp: timestamp.clone(),
            read_by: vec![user_id.to_string()],
        };

        // Persistence precedes broadcast: nobody sees a message the store
        // did not accept.
        self.storage.insert_message(&record).await?;
        self.storage
            .touch_conversation(&record.conversation_id, &timestamp)
            .await?;

        let mut message = record;
        message.content = content;
        let room_id = message.conversation_id.clone();
        self.router
            .broadcast(&room_id, &ServerEvent::NewMessage { message }, None)
            .await;
        Ok(())
    }

    async fn handle_call_user(
        &self,
        user_id: &str,
        callee_id: &str,
        signal: Value,
        call_type: String,
    ) {
        // An offline callee is a silent drop, not an error: reporting it
        // would leak the presence of a peer who may have blocked the caller.
        let Some(target) = self.presence.connection_for(callee_id).await else {
            debug!("dropping call_user from {user_id}: callee offline");
            return;
        };

        let caller = match self.storage.get_profile(user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!("failed to load caller profile for {user_id}: {e}");
                None
            }
        };

        self.router
            .send_to(
                &target,
                &ServerEvent::IncomingCall {
                    caller,
                    caller_id: user_id.to_string(),
                    signal,
                    call_type,
                },
            )
            .await;
    }

    /// Stateless signaling relay: forward `event` to the peer's connection,
    /// silently dropping it if the peer is offline.
    async fn relay_to_user(&self, peer_id: &str, event: ServerEvent) {
        let Some(target) = self.presence.connection_for(peer_id).await else {
            return;
        };
        self.router.send_to(&target, &event).await;
    }

    async fn reject(&self, connection_id: &str, error: &EventError) {
        self.router
            .send_to(
                connection_id,
                &ServerEvent::Error {
                    message: error.to_string(),
                },
            )
            .await;
    }

    async fn handle_disconnect(&self, connection_id: &str) {
        // Unregister first so no further delivery is attempted on a dead
        // pipe; anything still queued is dropped with the receiver.
        self.router.unregister(connection_id).await;

        let Some(user_id) = self.presence.on_disconnect(connection_id).await else {
            info!("connection {connection_id} closed");
            return;
        };

        if let Err(e) = self
            .storage
            .set_user_status(&user_id, OnlineStatus::Offline)
            .await
        {
            warn!("failed to persist offline status for {user_id}: {e}");
        }
        self.router
            .broadcast_all(&ServerEvent::UserOffline { user_id }, None)
            .await;
        info!("connection {connection_id} closed");
    }
}
