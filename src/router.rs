use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use warp::ws::Message;

use crate::messages::ServerEvent;

/// Owns room membership and the outbound half of every live connection.
///
/// Each registered connection gets a bounded queue; fan-out is a
/// non-blocking `try_send` per member, so one slow or dead recipient never
/// delays the others. Overflow drops the newest event for that recipient.
pub struct RoomRouter {
    queue_capacity: usize,
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    senders: HashMap<String, mpsc::Sender<Message>>,
    rooms: HashMap<String, HashSet<String>>,
    joined: HashMap<String, HashSet<String>>,
}

impl RoomRouter {
    pub fn new(queue_capacity: usize) -> Self {
        RoomRouter {
            queue_capacity,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Register a connection's outbound queue. The returned receiver feeds
    /// the connection's writer task.
    pub async fn register(&self, connection_id: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut inner = self.inner.write().await;
        inner.senders.insert(connection_id.to_string(), tx);
        rx
    }

    /// Drop a connection: remove its sender and leave every joined room.
    /// Anything still queued is discarded with the receiver.
    pub async fn unregister(&self, connection_id: &str) {
        let mut inner = self.inner.write().await;
        inner.senders.remove(connection_id);
        if let Some(rooms) = inner.joined.remove(connection_id) {
            for room_id in rooms {
                if let Some(members) = inner.rooms.get_mut(&room_id) {
                    members.remove(connection_id);
                }
            }
        }
    }

    pub async fn join(&self, room_id: &str, connection_id: &str) {
        let mut inner = self.inner.write().await;
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        inner
            .joined
            .entry(connection_id.to_string())
            .or_default()
            .insert(room_id.to_string());
        debug!("connection {connection_id} joined room {room_id}");
    }

    /// Drop one membership without tearing the connection down. Room exit
    /// is otherwise implicit in [`RoomRouter::unregister`].
    #[allow(dead_code)]
    pub async fn leave(&self, room_id: &str, connection_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(connection_id);
        }
        if let Some(rooms) = inner.joined.get_mut(connection_id) {
            rooms.remove(room_id);
        }
    }

    /// Deliver `event` to every member of `room_id`, minus `exclude`.
    /// Fire-and-forget per recipient.
    pub async fn broadcast(&self, room_id: &str, event: &ServerEvent, exclude: Option<&str>) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };

        let inner = self.inner.read().await;
        let Some(members) = inner.rooms.get(room_id) else {
            return;
        };

        for connection_id in members {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            Self::deliver(&inner, connection_id, &text);
        }
    }

    /// Deliver `event` to every registered connection, minus `exclude`.
    /// Used for the room-independent `user_online`/`user_offline` events.
    pub async fn broadcast_all(&self, event: &ServerEvent, exclude: Option<&str>) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };

        let inner = self.inner.read().await;
        for connection_id in inner.senders.keys() {
            if Some(connection_id.as_str()) == exclude {
                continue;
            }
            Self::deliver(&inner, connection_id, &text);
        }
    }

    /// Deliver `event` to a single connection. Silently does nothing if the
    /// connection is gone.
    pub async fn send_to(&self, connection_id: &str, event: &ServerEvent) {
        let Ok(text) = serde_json::to_string(event) else {
            return;
        };

        let inner = self.inner.read().await;
        Self::deliver(&inner, connection_id, &text);
    }

    fn deliver(inner: &Inner, connection_id: &str, text: &str) {
        let Some(sender) = inner.senders.get(connection_id) else {
            return;
        };
        match sender.try_send(Message::text(text)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full for connection {connection_id}; dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv_text(rx: &mut mpsc::Receiver<Message>) -> String {
        rx.recv().await.unwrap().to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn broadcast_reaches_members_and_honors_exclude() {
        let router = RoomRouter::new(8);
        let mut rx_a = router.register("a").await;
        let mut rx_b = router.register("b").await;
        router.join("r1", "a").await;
        router.join("r1", "b").await;

        let event = ServerEvent::UserTyping {
            user_id: "u1".to_string(),
            conversation_id: "r1".to_string(),
        };
        router.broadcast("r1", &event, Some("a")).await;

        let text = recv_text(&mut rx_b).await;
        assert!(text.contains("user_typing"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_unknown_room_is_a_no_op() {
        let router = RoomRouter::new(8);
        let mut rx = router.register("a").await;
        router
            .broadcast(
                "nowhere",
                &ServerEvent::Error {
                    message: "x".to_string(),
                },
                None,
            )
            .await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_leaves_all_rooms() {
        let router = RoomRouter::new(8);
        let _rx_a = router.register("a").await;
        let mut rx_b = router.register("b").await;
        router.join("r1", "a").await;
        router.join("r2", "a").await;
        router.join("r1", "b").await;

        router.unregister("a").await;

        // Only b remains in r1; a's membership must be gone from both rooms.
        let event = ServerEvent::Error {
            message: "ping".to_string(),
        };
        router.broadcast("r1", &event, None).await;
        assert!(recv_text(&mut rx_b).await.contains("ping"));

        let inner = router.inner.read().await;
        assert!(!inner.rooms["r1"].contains("a"));
        assert!(inner.rooms["r2"].is_empty());
        assert!(!inner.joined.contains_key("a"));
    }

    #[tokio::test]
    async fn leave_removes_a_single_membership() {
        let router = RoomRouter::new(8);
        let mut rx_a = router.register("a").await;
        router.join("r1", "a").await;
        router.join("r2", "a").await;

        router.leave("r1", "a").await;

        let event = ServerEvent::Error {
            message: "ping".to_string(),
        };
        router.broadcast("r1", &event, None).await;
        assert!(rx_a.try_recv().is_err());
        router.broadcast("r2", &event, None).await;
        assert!(recv_text(&mut rx_a).await.contains("ping"));
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let router = RoomRouter::new(1);
        let mut rx_slow = router.register("slow").await;
        let mut rx_ok = router.register("ok").await;
        router.join("r1", "slow").await;
        router.join("r1", "ok").await;

        let event = ServerEvent::Error {
            message: "x".to_string(),
        };
        // Second broadcast overflows the slow recipient's single-slot queue
        // but must still reach the healthy one.
        router.broadcast("r1", &event, None).await;
        router.broadcast("r1", &event, None).await;

        assert!(rx_slow.recv().await.is_some());
        assert!(rx_slow.try_recv().is_err());
        assert!(rx_ok.recv().await.is_some());
        assert!(rx_ok.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_to_targets_one_connection() {
        let router = RoomRouter::new(8);
        let mut rx_a = router.register("a").await;
        let mut rx_b = router.register("b").await;

        router
            .send_to(
                "a",
                &ServerEvent::Error {
                    message: "just you".to_string(),
                },
            )
            .await;

        assert!(recv_text(&mut rx_a).await.contains("just you"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_all_excludes_origin() {
        let router = RoomRouter::new(8);
        let mut rx_a = router.register("a").await;
        let mut rx_b = router.register("b").await;

        let event = ServerEvent::UserOnline {
            user_id: "u1".to_string(),
        };
        router.broadcast_all(&event, Some("a")).await;

        assert!(recv_text(&mut rx_b).await.contains("user_online"));
        assert!(rx_a.try_recv().is_err());
    }
}
