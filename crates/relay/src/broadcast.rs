use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use picedit_common::protocol::ws::{encode_notification, EditNotification};
use picedit_common::types::ResourceId;
use tracing::{error, warn};

use crate::metrics;
use crate::registry::{ConnectionHandle, ConnectionId, SessionRegistry};

/// Serializes notifications once and queues the frame to every room member.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SessionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn encode(notification: &EditNotification) -> Option<Utf8Bytes> {
        match encode_notification(notification) {
            Ok(encoded) => Some(Utf8Bytes::from(encoded)),
            Err(error) => {
                error!(error = %error, kind = ?notification.kind, "failed to encode edit notification");
                None
            }
        }
    }

    /// Deliver `notification` to every live member of `resource_id` except `exclude`.
    ///
    /// Returns the number of members the frame was queued to. A member that
    /// closed since the snapshot is logged and skipped.
    pub fn broadcast(
        &self,
        resource_id: ResourceId,
        notification: &EditNotification,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let members = self.registry.snapshot(resource_id);
        if members.is_empty() {
            return 0;
        }
        let Some(frame) = Self::encode(notification) else {
            return 0;
        };

        let mut delivered = 0_usize;
        let mut failed = 0_usize;
        for member in members.iter().filter(|member| Some(member.id()) != exclude) {
            match member.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(error) => {
                    failed += 1;
                    warn!(
                        resource_id = %resource_id,
                        connection_id = %member.id(),
                        error = %error,
                        "dropping broadcast frame for closed connection"
                    );
                }
            }
        }

        metrics::record_broadcast(delivered as u64, failed as u64);
        delivered
    }

    /// Reply to a single connection. Returns false if it has already closed.
    pub fn unicast(&self, connection: &ConnectionHandle, notification: &EditNotification) -> bool {
        let Some(frame) = Self::encode(notification) else {
            return false;
        };
        match connection.send_frame(frame) {
            Ok(()) => {
                metrics::record_broadcast(1, 0);
                true
            }
            Err(error) => {
                metrics::record_broadcast(0, 1);
                warn!(
                    resource_id = %connection.resource_id(),
                    connection_id = %connection.id(),
                    error = %error,
                    "dropping unicast frame for closed connection"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{test_connection, test_user};
    use picedit_common::protocol::ws::NotificationType;

    const PICTURE: ResourceId = ResourceId(42);

    fn notification() -> EditNotification {
        EditNotification::new(
            NotificationType::Info,
            "alice joined editing",
            (*test_user(1_879_048_192_512_345_678, "alice")).clone(),
        )
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_with_identical_frame() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (a, mut ra) = test_connection(PICTURE, test_user(1, "alice"));
        let (b, mut rb) = test_connection(PICTURE, test_user(2, "bob"));
        registry.add(a);
        registry.add(b);

        assert_eq!(broadcaster.broadcast(PICTURE, &notification(), None), 2);

        let fa = ra.recv().await.expect("alice should receive a frame");
        let fb = rb.recv().await.expect("bob should receive a frame");
        assert_eq!(fa.as_str(), fb.as_str());
        let value: serde_json::Value = serde_json::from_str(fa.as_str()).expect("valid json");
        assert_eq!(value["user"]["id"], "1879048192512345678");
    }

    #[tokio::test]
    async fn broadcast_skips_excluded_connection() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (a, mut ra) = test_connection(PICTURE, test_user(1, "alice"));
        let (b, mut rb) = test_connection(PICTURE, test_user(2, "bob"));
        let excluded = a.id();
        registry.add(a);
        registry.add(b);

        assert_eq!(broadcaster.broadcast(PICTURE, &notification(), Some(excluded)), 1);
        assert!(rb.recv().await.is_some());
        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn one_closed_member_does_not_block_the_rest() {
        let registry = Arc::new(SessionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let mut receivers = Vec::new();
        for id in 1..=4 {
            let (conn, rx) = test_connection(PICTURE, test_user(id, "member"));
            registry.add(conn);
            receivers.push(rx);
        }
        let (closed, closed_rx) = test_connection(PICTURE, test_user(5, "gone"));
        registry.add(closed);
        drop(closed_rx);

        assert_eq!(broadcaster.broadcast(PICTURE, &notification(), None), 4);
        for rx in &mut receivers {
            assert!(rx.recv().await.is_some());
        }
    }

    #[tokio::test]
    async fn unicast_reports_closed_connection() {
        let broadcaster = Broadcaster::new(Arc::new(SessionRegistry::new()));
        let (conn, mut rx) = test_connection(PICTURE, test_user(1, "alice"));
        assert!(broadcaster.unicast(&conn, &notification()));
        assert!(rx.recv().await.is_some());

        drop(rx);
        assert!(!broadcaster.unicast(&conn, &notification()));
    }

    #[test]
    fn empty_room_broadcast_is_a_noop() {
        let broadcaster = Broadcaster::new(Arc::new(SessionRegistry::new()));
        assert_eq!(broadcaster.broadcast(PICTURE, &notification(), None), 0);
    }
}
