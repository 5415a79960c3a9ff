use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{MessageRecord, MessageType, UserProfile};

/// Events a client may send over its websocket. The auth credential is not
/// an event; it travels in the upgrade request.
#[derive(Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom { conversation_id: String },
    #[serde(rename = "send_message")]
    SendMessage {
        conversation_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        file_name: Option<String>,
    },
    #[serde(rename = "typing")]
    Typing { conversation_id: String },
    #[serde(rename = "message_read")]
    MessageRead {
        message_id: String,
        conversation_id: String,
    },
    #[serde(rename = "call_user")]
    CallUser {
        callee_id: String,
        #[serde(default)]
        signal: Value,
        #[serde(default)]
        call_type: String,
    },
    #[serde(rename = "accept_call")]
    AcceptCall {
        caller_id: String,
        #[serde(default)]
        signal: Value,
    },
    #[serde(rename = "reject_call")]
    RejectCall { caller_id: String },
    #[serde(rename = "end_call")]
    EndCall { peer_id: String },
}

/// Events the server pushes to clients.
#[derive(Serialize, Deserialize, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "user_online")]
    UserOnline { user_id: String },
    #[serde(rename = "user_offline")]
    UserOffline { user_id: String },
    #[serde(rename = "new_message")]
    NewMessage {
        #[serde(flatten)]
        message: MessageRecord,
    },
    #[serde(rename = "user_typing")]
    UserTyping {
        user_id: String,
        conversation_id: String,
    },
    #[serde(rename = "message_read")]
    MessageRead {
        message_id: String,
        user_id: String,
    },
    #[serde(rename = "incoming_call")]
    IncomingCall {
        caller: Option<UserProfile>,
        caller_id: String,
        signal: Value,
        call_type: String,
    },
    #[serde(rename = "call_accepted")]
    CallAccepted { callee_id: String, signal: Value },
    #[serde(rename = "call_rejected")]
    CallRejected,
    #[serde(rename = "call_ended")]
    CallEnded,
    #[serde(rename = "error")]
    Error { message: String },
}
