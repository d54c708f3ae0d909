use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use picedit_common::types::{ResourceId, UserView};
use tokio::sync::mpsc;
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug, thiserror::Error)]
#[error("connection {0} is closed")]
pub struct ConnectionClosed(pub ConnectionId);

/// Handle to a live edit connection.
///
/// Frames pushed through [`ConnectionHandle::send_frame`] are queued and
/// written by the connection's own socket task, so senders never block on I/O.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    resource_id: ResourceId,
    user: Arc<UserView>,
    outbound: mpsc::UnboundedSender<Utf8Bytes>,
}

impl ConnectionHandle {
    pub fn new(
        resource_id: ResourceId,
        user: Arc<UserView>,
        outbound: mpsc::UnboundedSender<Utf8Bytes>,
    ) -> Self {
        Self { id: Uuid::new_v4(), resource_id, user, outbound }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn resource_id(&self) -> ResourceId {
        self.resource_id
    }

    pub fn user(&self) -> &Arc<UserView> {
        &self.user
    }

    /// True while the socket task still drains the outbound queue.
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn send_frame(&self, frame: Utf8Bytes) -> Result<(), ConnectionClosed> {
        self.outbound.send(frame).map_err(|_| ConnectionClosed(self.id))
    }
}

/// Live connections grouped by picture.
///
/// A resource entry exists only while at least one connection references it.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    rooms: DashMap<ResourceId, HashMap<ConnectionId, ConnectionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, connection: ConnectionHandle) {
        self.rooms.entry(connection.resource_id).or_default().insert(connection.id, connection);
    }

    /// Remove a connection, dropping the resource entry once it is empty.
    ///
    /// Returns the removed handle, or `None` if it was not registered.
    pub fn remove(
        &self,
        resource_id: ResourceId,
        connection_id: ConnectionId,
    ) -> Option<ConnectionHandle> {
        match self.rooms.entry(resource_id) {
            Entry::Occupied(mut room) => {
                let removed = room.get_mut().remove(&connection_id);
                if room.get().is_empty() {
                    room.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        }
    }

    /// Copy of the current members of `resource_id`.
    ///
    /// Members may close between the snapshot and a send; callers treat a
    /// failed send as a normal outcome.
    pub fn snapshot(&self, resource_id: ResourceId) -> Vec<ConnectionHandle> {
        self.rooms
            .get(&resource_id)
            .map(|room| room.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(
        &self,
        resource_id: ResourceId,
        connection_id: ConnectionId,
    ) -> Option<ConnectionHandle> {
        self.rooms.get(&resource_id).and_then(|room| room.get(&connection_id).cloned())
    }

    pub fn resource_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn connection_count(&self, resource_id: ResourceId) -> usize {
        self.rooms.get(&resource_id).map(|room| room.len()).unwrap_or(0)
    }
}
