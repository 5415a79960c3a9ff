use std::collections::HashMap;

use tokio::sync::RwLock;

/// In-memory user ↔ connection mapping. At most one connection per user;
/// a reconnect silently overwrites the previous entry and the stale
/// connection is left to disconnect on its own.
///
/// This only tracks the live mapping. Persisting durable online/offline
/// status is the caller's job, outside our lock.
#[derive(Default)]
pub struct PresenceTable {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_user: HashMap<String, String>,
    by_conn: HashMap<String, String>,
}

impl PresenceTable {
    pub fn new() -> Self {
        PresenceTable::default()
    }

    pub async fn on_connect(&self, connection_id: &str, user_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(stale) = inner
            .by_user
            .insert(user_id.to_string(), connection_id.to_string())
        {
            inner.by_conn.remove(&stale);
        }
        inner
            .by_conn
            .insert(connection_id.to_string(), user_id.to_string());
    }

    /// Remove the mapping for a closing connection. Returns the freed user
    /// id so the caller can broadcast `user_offline`; `None` when the
    /// connection never authenticated or was already overwritten by a
    /// reconnect.
    pub async fn on_disconnect(&self, connection_id: &str) -> Option<String> {
        let mut inner = self.inner.write().await;
        let user_id = inner.by_conn.remove(connection_id)?;
        if inner
            .by_user
            .get(&user_id)
            .is_some_and(|current| current.as_str() == connection_id)
        {
            inner.by_user.remove(&user_id);
            return Some(user_id);
        }
        None
    }

    #[allow(dead_code)]
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.inner.read().await.by_user.contains_key(user_id)
    }

    pub async fn connection_for(&self, user_id: &str) -> Option<String> {
        self.inner.read().await.by_user.get(user_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_disconnect_round_trip() {
        let table = PresenceTable::new();
        table.on_connect("c1", "u1").await;

        assert!(table.is_online("u1").await);
        assert_eq!(table.connection_for("u1").await.as_deref(), Some("c1"));

        assert_eq!(table.on_disconnect("c1").await.as_deref(), Some("u1"));
        assert!(!table.is_online("u1").await);
    }

    #[tokio::test]
    async fn reconnect_overwrites_and_stale_disconnect_frees_nobody() {
        let table = PresenceTable::new();
        table.on_connect("c1", "u1").await;
        table.on_connect("c2", "u1").await;

        assert_eq!(table.connection_for("u1").await.as_deref(), Some("c2"));

        // The orphaned first connection going away must not mark the user
        // offline.
        assert_eq!(table.on_disconnect("c1").await, None);
        assert!(table.is_online("u1").await);

        assert_eq!(table.on_disconnect("c2").await.as_deref(), Some("u1"));
        assert!(!table.is_online("u1").await);
    }

    #[tokio::test]
    async fn unknown_connection_disconnect_is_a_no_op() {
        let table = PresenceTable::new();
        assert_eq!(table.on_disconnect("never-registered").await, None);
    }
}
