// Edit event pipeline: transport tasks publish, dispatcher workers consume.

pub mod channel;
pub mod dispatcher;

use std::sync::Arc;

use picedit_common::protocol::ws::EditRequest;
use picedit_common::types::{ResourceId, UserView};

use crate::registry::ConnectionHandle;

/// One inbound edit request, consumed exactly once by a dispatcher worker.
#[derive(Debug, Clone)]
pub struct EditEvent {
    /// Global publish order across all shards.
    pub sequence: u64,
    pub connection: ConnectionHandle,
    pub user: Arc<UserView>,
    pub resource_id: ResourceId,
    pub request: EditRequest,
}

pub use channel::{ChannelError, EventChannel};
pub use dispatcher::EventDispatcher;
