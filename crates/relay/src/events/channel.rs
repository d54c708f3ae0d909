use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use picedit_common::protocol::ws::EditRequest;
use picedit_common::types::ResourceId;
use tokio::sync::mpsc;

use super::EditEvent;
use crate::config::{ConfigError, EventChannelConfig};
use crate::metrics;
use crate::registry::ConnectionHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("edit event channel is closed")]
    Closed,
}

/// Bounded, sharded buffer between socket tasks and dispatcher workers.
///
/// Every event for a given picture lands on the same shard, so one worker
/// sees that picture's events in publish order. A full shard suspends the
/// publisher instead of dropping the event.
#[derive(Debug)]
pub struct EventChannel {
    shards: RwLock<Option<Vec<mpsc::Sender<EditEvent>>>>,
    shard_count: usize,
    sequence: AtomicU64,
}

impl EventChannel {
    pub fn new(
        config: EventChannelConfig,
    ) -> Result<(Arc<Self>, Vec<mpsc::Receiver<EditEvent>>), ConfigError> {
        config.validate()?;

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..config.workers).map(|_| mpsc::channel(config.shard_capacity())).unzip();

        let channel = Self {
            shards: RwLock::new(Some(senders)),
            shard_count: config.workers,
            sequence: AtomicU64::new(0),
        };
        Ok((Arc::new(channel), receivers))
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Shard owning `resource_id`.
    pub fn shard_for(resource_id: ResourceId, shard_count: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        resource_id.hash(&mut hasher);
        (hasher.finish() % shard_count.max(1) as u64) as usize
    }

    /// Queue `request` from `connection`, waiting for space if the shard is full.
    ///
    /// Returns the assigned sequence number.
    pub async fn publish(
        &self,
        connection: &ConnectionHandle,
        request: EditRequest,
    ) -> Result<u64, ChannelError> {
        let resource_id = connection.resource_id();
        let sender = {
            let shards = self.read_shards();
            let senders = shards.as_ref().ok_or(ChannelError::Closed)?;
            senders[Self::shard_for(resource_id, senders.len())].clone()
        };

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let kind = request.kind;
        let event = EditEvent {
            sequence,
            connection: connection.clone(),
            user: Arc::clone(connection.user()),
            resource_id,
            request,
        };
        sender.send(event).await.map_err(|_| ChannelError::Closed)?;
        metrics::record_event_published(kind.as_str());

        Ok(sequence)
    }

    /// Stop accepting events. Already-queued events are still delivered.
    pub fn close(&self) {
        self.write_shards().take();
    }

    pub fn is_closed(&self) -> bool {
        self.read_shards().is_none()
    }

    fn read_shards(&self) -> RwLockReadGuard<'_, Option<Vec<mpsc::Sender<EditEvent>>>> {
        self.shards.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_shards(&self) -> RwLockWriteGuard<'_, Option<Vec<mpsc::Sender<EditEvent>>>> {
        self.shards.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::{test_connection, test_user};
    use picedit_common::protocol::ws::RequestType;
    use std::time::Duration;

    fn small(capacity: usize, workers: usize) -> EventChannelConfig {
        EventChannelConfig { capacity, workers }
    }

    #[test]
    fn rejects_invalid_sizing() {
        assert!(EventChannel::new(small(100, 4)).is_err());
        assert!(EventChannel::new(small(8, 0)).is_err());
    }

    #[test]
    fn shard_assignment_is_stable() {
        for id in 1..100_i64 {
            let first = EventChannel::shard_for(ResourceId(id), 4);
            assert!(first < 4);
            assert_eq!(first, EventChannel::shard_for(ResourceId(id), 4));
        }
        assert_eq!(EventChannel::shard_for(ResourceId(7), 1), 0);
    }

    #[tokio::test]
    async fn same_resource_events_arrive_in_publish_order() {
        let (channel, mut receivers) = EventChannel::new(small(64, 4)).expect("valid sizing");
        let (conn, _rx) = test_connection(ResourceId(42), test_user(1, "alice"));
        let shard = EventChannel::shard_for(ResourceId(42), 4);

        let mut published = Vec::new();
        for action in ["ZOOM_IN", "ROTATE_LEFT", "ZOOM_OUT"] {
            published.push(
                channel.publish(&conn, EditRequest::edit_action(action)).await.expect("publish"),
            );
        }

        let receiver = &mut receivers[shard];
        for expected in published {
            let event = receiver.recv().await.expect("event should be queued");
            assert_eq!(event.sequence, expected);
            assert_eq!(event.resource_id, ResourceId(42));
            assert_eq!(event.user.id, conn.user().id);
        }
    }

    #[tokio::test]
    async fn full_shard_applies_backpressure() {
        let (channel, mut receivers) = EventChannel::new(small(1, 1)).expect("valid sizing");
        let (conn, _rx) = test_connection(ResourceId(1), test_user(1, "alice"));

        channel.publish(&conn, EditRequest::new(RequestType::EnterEdit)).await.expect("publish");
        let blocked = tokio::time::timeout(
            Duration::from_millis(50),
            channel.publish(&conn, EditRequest::new(RequestType::ExitEdit)),
        )
        .await;
        assert!(blocked.is_err(), "second publish should wait for space");

        let event = receivers[0].recv().await.expect("first event");
        assert_eq!(event.request.kind, RequestType::EnterEdit);
        channel
            .publish(&conn, EditRequest::new(RequestType::ExitEdit))
            .await
            .expect("publish after drain");
    }

    #[tokio::test]
    async fn publish_after_close_fails_and_queued_events_drain() {
        let (channel, mut receivers) = EventChannel::new(small(8, 1)).expect("valid sizing");
        let (conn, _rx) = test_connection(ResourceId(1), test_user(1, "alice"));

        channel.publish(&conn, EditRequest::new(RequestType::EnterEdit)).await.expect("publish");
        channel.close();
        assert!(channel.is_closed());
        assert_eq!(
            channel.publish(&conn, EditRequest::new(RequestType::ExitEdit)).await,
            Err(ChannelError::Closed)
        );

        assert!(receivers[0].recv().await.is_some());
        assert!(receivers[0].recv().await.is_none());
    }
}
