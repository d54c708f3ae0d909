use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};
use picedit_common::types::{ResourceId, UserId, UserView};

use crate::registry::ConnectionId;

/// Current exclusive editor of a picture.
#[derive(Debug, Clone)]
pub struct EditorAssignment {
    pub holder: Arc<UserView>,
    /// Connection that acquired the lock; its close releases the lock.
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone)]
pub enum EnterOutcome {
    Acquired,
    /// The requester already holds the lock; nothing changes.
    AlreadyHolding,
    HeldByOther { holder: Arc<UserView> },
}

#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Released(EditorAssignment),
    NotHolder,
}

/// Per-picture editor lock: either unlocked or held by exactly one user.
#[derive(Debug, Default)]
pub struct EditorLockTable {
    editors: DashMap<ResourceId, EditorAssignment>,
}

impl EditorLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(
        &self,
        resource_id: ResourceId,
        user: &Arc<UserView>,
        connection_id: ConnectionId,
    ) -> EnterOutcome {
        match self.editors.entry(resource_id) {
            Entry::Vacant(slot) => {
                slot.insert(EditorAssignment { holder: Arc::clone(user), connection_id });
                EnterOutcome::Acquired
            }
            Entry::Occupied(current) if current.get().holder.id == user.id => {
                EnterOutcome::AlreadyHolding
            }
            Entry::Occupied(current) => {
                EnterOutcome::HeldByOther { holder: Arc::clone(&current.get().holder) }
            }
        }
    }

    pub fn exit(&self, resource_id: ResourceId, user_id: UserId) -> ExitOutcome {
        match self.editors.remove_if(&resource_id, |_, assignment| assignment.holder.id == user_id)
        {
            Some((_, assignment)) => ExitOutcome::Released(assignment),
            None => ExitOutcome::NotHolder,
        }
    }

    /// Release the lock only if `connection_id` is the one that acquired it.
    pub fn release_for_connection(
        &self,
        resource_id: ResourceId,
        connection_id: ConnectionId,
    ) -> Option<EditorAssignment> {
        self.editors
            .remove_if(&resource_id, |_, assignment| assignment.connection_id == connection_id)
            .map(|(_, assignment)| assignment)
    }

    pub fn is_holder(&self, resource_id: ResourceId, user_id: UserId) -> bool {
        self.editors
            .get(&resource_id)
            .map(|assignment| assignment.holder.id == user_id)
            .unwrap_or(false)
    }

    pub fn holder(&self, resource_id: ResourceId) -> Option<Arc<UserView>> {
        self.editors.get(&resource_id).map(|assignment| Arc::clone(&assignment.holder))
    }

    pub fn len(&self) -> usize {
        self.editors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.editors.is_empty()
    }
}
