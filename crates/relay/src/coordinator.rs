// Edit coordination: lock transitions, room notifications, and session
// lifecycle for one relay process.

use std::sync::Arc;

use picedit_common::protocol::ws::{
    edit_action_label, EditNotification, NotificationType, RequestType,
};
use picedit_common::types::{ResourceId, UserView};
use tracing::{debug, info, warn};

use crate::broadcast::Broadcaster;
use crate::events::EditEvent;
use crate::lock_table::{EditorLockTable, EnterOutcome, ExitOutcome};
use crate::metrics;
use crate::registry::{ConnectionHandle, SessionRegistry};

pub const UNRECOGNIZED_TYPE_MESSAGE: &str = "unsupported message type";
pub const MALFORMED_MESSAGE: &str = "malformed message";
pub const SHUTTING_DOWN_MESSAGE: &str = "edit relay is shutting down, please reconnect";

#[derive(Debug)]
pub struct EditCoordinator {
    registry: Arc<SessionRegistry>,
    locks: EditorLockTable,
    broadcaster: Broadcaster,
}

impl EditCoordinator {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        Self { registry, locks: EditorLockTable::new(), broadcaster }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn locks(&self) -> &EditorLockTable {
        &self.locks
    }

    /// Register a freshly upgraded connection and announce it to the room.
    pub fn join(&self, connection: &ConnectionHandle) {
        self.registry.add(connection.clone());
        info!(
            resource_id = %connection.resource_id(),
            connection_id = %connection.id(),
            user_id = %connection.user().id,
            "edit session joined"
        );
        let user = connection.user();
        self.broadcaster.broadcast(
            connection.resource_id(),
            &notify(NotificationType::Info, format!("{} joined editing", user.name), user),
            None,
        );
    }

    /// Close-path cleanup. Runs on the connection's own task, never through the pipeline.
    ///
    /// The connection leaves the registry before its lock is released, so an
    /// event of this connection still queued in the pipeline finds it gone.
    pub fn leave(&self, connection: &ConnectionHandle) {
        let resource_id = connection.resource_id();
        let user = connection.user();

        self.registry.remove(resource_id, connection.id());

        if let Some(released) = self.locks.release_for_connection(resource_id, connection.id()) {
            debug!(
                resource_id = %resource_id,
                user_id = %released.holder.id,
                "editor lock released by closing connection"
            );
            self.announce_exit(resource_id, &released.holder);
        }

        info!(
            resource_id = %resource_id,
            connection_id = %connection.id(),
            user_id = %user.id,
            "edit session left"
        );
        self.broadcaster.broadcast(
            resource_id,
            &notify(NotificationType::Info, format!("{} left editing", user.name), user),
            None,
        );
    }

    pub fn handle_event(&self, event: &EditEvent) {
        debug!(
            sequence = event.sequence,
            resource_id = %event.resource_id,
            user_id = %event.user.id,
            kind = event.request.kind.as_str(),
            "dispatching edit event"
        );
        match event.request.kind {
            RequestType::EnterEdit => self.enter_edit(&event.connection),
            RequestType::ExitEdit => self.exit_edit(&event.connection),
            RequestType::EditAction => {
                self.edit_action(&event.connection, event.request.edit_action.as_deref())
            }
            RequestType::Unrecognized => self.reply_error(&event.connection, UNRECOGNIZED_TYPE_MESSAGE),
        }
        metrics::record_event_dispatched(event.request.kind.as_str());
    }

    pub fn enter_edit(&self, connection: &ConnectionHandle) {
        let resource_id = connection.resource_id();
        let user = connection.user();
        match self.locks.enter(resource_id, user, connection.id()) {
            EnterOutcome::Acquired => {
                if !self.is_registered(connection) {
                    // Closed while the event was queued; its close path may
                    // already have run and found nothing to release.
                    self.locks.release_for_connection(resource_id, connection.id());
                    debug!(
                        resource_id = %resource_id,
                        user_id = %user.id,
                        "enter from departed connection undone"
                    );
                    return;
                }
                self.broadcaster.broadcast(
                    resource_id,
                    &notify(
                        NotificationType::EnterEdit,
                        format!("{} started editing the picture", user.name),
                        user,
                    ),
                    None,
                );
            }
            EnterOutcome::AlreadyHolding => {
                debug!(resource_id = %resource_id, user_id = %user.id, "editor re-entered, ignoring");
            }
            EnterOutcome::HeldByOther { holder } => {
                self.broadcaster.unicast(
                    connection,
                    &notify(
                        NotificationType::Error,
                        format!(
                            "{} is editing this picture, please wait until they finish",
                            holder.name
                        ),
                        &holder,
                    ),
                );
            }
        }
    }

    pub fn exit_edit(&self, connection: &ConnectionHandle) {
        let resource_id = connection.resource_id();
        match self.locks.exit(resource_id, connection.user().id) {
            ExitOutcome::Released(assignment) => self.announce_exit(resource_id, &assignment.holder),
            ExitOutcome::NotHolder => {
                debug!(
                    resource_id = %resource_id,
                    user_id = %connection.user().id,
                    "exit from non-holder ignored"
                );
            }
        }
    }

    pub fn edit_action(&self, connection: &ConnectionHandle, action: Option<&str>) {
        let resource_id = connection.resource_id();
        let user = connection.user();
        let Some(action) = action.map(str::trim).filter(|action| !action.is_empty()) else {
            warn!(resource_id = %resource_id, user_id = %user.id, "edit action without a value dropped");
            return;
        };
        if !self.is_registered(connection) {
            debug!(
                resource_id = %resource_id,
                user_id = %user.id,
                action,
                "edit action from departed connection dropped"
            );
            return;
        }
        if !self.locks.is_holder(resource_id, user.id) {
            debug!(
                resource_id = %resource_id,
                user_id = %user.id,
                action,
                "edit action from non-holder dropped"
            );
            return;
        }

        let notification = notify(
            NotificationType::EditAction,
            format!("{} performed {}", user.name, edit_action_label(action)),
            user,
        )
        .with_edit_action(action);
        self.broadcaster.broadcast(resource_id, &notification, Some(connection.id()));
    }

    /// Unicast an ERROR frame carrying the connection's own user view.
    pub fn reply_error(&self, connection: &ConnectionHandle, message: &str) {
        self.broadcaster.unicast(
            connection,
            &notify(NotificationType::Error, message, connection.user()),
        );
    }

    fn is_registered(&self, connection: &ConnectionHandle) -> bool {
        self.registry.get(connection.resource_id(), connection.id()).is_some()
    }

    fn announce_exit(&self, resource_id: ResourceId, holder: &UserView) {
        self.broadcaster.broadcast(
            resource_id,
            &notify(
                NotificationType::ExitEdit,
                format!("{} stopped editing the picture", holder.name),
                holder,
            ),
            None,
        );
    }
}

fn notify(kind: NotificationType, message: impl Into<String>, user: &UserView) -> EditNotification {
    EditNotification::new(kind, message, user.clone())
}
