use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage backend unavailable: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Attachment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    Online,
    Offline,
}

/// Persisted message document; also the `new_message` broadcast payload,
/// where `content` carries the plaintext projection instead of the stored
/// ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub message_type: MessageType,
    pub file_name: Option<String>,
    pub timestamp: String,
    pub read_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub participants: Vec<String>,
    pub updated_at: String,
}

/// Public projection of a user document, as attached to `incoming_call`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub real_name: String,
    pub profile_photo: String,
    pub online_status: OnlineStatus,
}

/// Durable-store collaborator. The realtime core only ever touches history
/// through this seam; a production deployment backs it with the document
/// database, tests and the demo binary use [`MemoryStore`].
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StorageError>;
    async fn touch_conversation(
        &self,
        conversation_id: &str,
        timestamp: &str,
    ) -> Result<(), StorageError>;
    /// Idempotent set-add of `user_id` to the message's readers.
    async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<(), StorageError>;
    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StorageError>;
    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError>;
    async fn set_user_status(
        &self,
        user_id: &str,
        status: OnlineStatus,
    ) -> Result<(), StorageError>;
}

/// User/social-graph collaborator, queried both directions before a message
/// is allowed through.
#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Whether `blocker` has blocked `target`.
    async fn is_blocked(&self, blocker: &str, target: &str) -> Result<bool, StorageError>;
}

/// In-memory store used by tests and the standalone binary.
#[derive(Default)]
pub struct MemoryStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    messages: RwLock<HashMap<String, MessageRecord>>,
    profiles: RwLock<HashMap<String, UserProfile>>,
    blocked: RwLock<HashMap<String, HashSet<String>>>,
    statuses: RwLock<HashMap<String, OnlineStatus>>,
}

#[allow(dead_code)]
impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub async fn add_conversation(&self, conversation: Conversation) {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.conversation_id.clone(), conversation);
    }

    pub async fn add_profile(&self, profile: UserProfile) {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id.clone(), profile);
    }

    pub async fn block(&self, blocker: &str, target: &str) {
        let mut blocked = self.blocked.write().await;
        blocked
            .entry(blocker.to_string())
            .or_default()
            .insert(target.to_string());
    }

    pub async fn unblock(&self, blocker: &str, target: &str) {
        let mut blocked = self.blocked.write().await;
        if let Some(targets) = blocked.get_mut(blocker) {
            targets.remove(target);
        }
    }

    pub async fn message(&self, message_id: &str) -> Option<MessageRecord> {
        self.messages.read().await.get(message_id).cloned()
    }

    pub async fn status_of(&self, user_id: &str) -> Option<OnlineStatus> {
        self.statuses.read().await.get(user_id).copied()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn insert_message(&self, message: &MessageRecord) -> Result<(), StorageError> {
        let mut messages = self.messages.write().await;
        messages.insert(message.message_id.clone(), message.clone());
        Ok(())
    }

    async fn touch_conversation(
        &self,
        conversation_id: &str,
        timestamp: &str,
    ) -> Result<(), StorageError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(conversation_id) {
            conversation.updated_at = timestamp.to_string();
        }
        Ok(())
    }

    async fn mark_read(&self, message_id: &str, user_id: &str) -> Result<(), StorageError> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages.get_mut(message_id) {
            if !message.read_by.iter().any(|r| r == user_id) {
                message.read_by.push(user_id.to_string());
            }
        }
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<Conversation>, StorageError> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StorageError> {
        Ok(self.profiles.read().await.get(user_id).cloned())
    }

    async fn set_user_status(
        &self,
        user_id: &str,
        status: OnlineStatus,
    ) -> Result<(), StorageError> {
        let mut statuses = self.statuses.write().await;
        statuses.insert(user_id.to_string(), status);
        let mut profiles = self.profiles.write().await;
        if let Some(profile) = profiles.get_mut(user_id) {
            profile.online_status = status;
        }
        Ok(())
    }
}

#[async_trait]
impl SocialGraph for MemoryStore {
    async fn is_blocked(&self, blocker: &str, target: &str) -> Result<bool, StorageError> {
        let blocked = self.blocked.read().await;
        Ok(blocked
            .get(blocker)
            .is_some_and(|targets| targets.contains(target)))
    }
}
