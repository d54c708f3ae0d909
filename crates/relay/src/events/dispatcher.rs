use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{EditEvent, EventChannel};
use crate::config::{ConfigError, EventChannelConfig};
use crate::coordinator::EditCoordinator;
use crate::metrics;

/// Fixed pool of workers, one per channel shard.
#[derive(Debug)]
pub struct EventDispatcher {
    channel: Arc<EventChannel>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventDispatcher {
    pub fn start(
        config: EventChannelConfig,
        coordinator: Arc<EditCoordinator>,
    ) -> Result<Self, ConfigError> {
        let (channel, receivers) = EventChannel::new(config)?;
        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(index, receiver)| {
                tokio::spawn(run_worker(index, receiver, Arc::clone(&coordinator)))
            })
            .collect();

        info!(
            workers = config.workers,
            capacity = config.capacity,
            "edit event dispatcher started"
        );
        Ok(Self { channel, workers: Mutex::new(workers) })
    }

    pub fn channel(&self) -> &Arc<EventChannel> {
        &self.channel
    }

    /// Stop accepting events, let workers drain what is queued, and wait for them.
    pub async fn shutdown(&self) {
        self.channel.close();
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for worker in workers {
            if let Err(error) = worker.await {
                error!(error = %error, "edit event worker terminated abnormally");
            }
        }
        info!("edit event dispatcher stopped");
    }
}

async fn run_worker(
    index: usize,
    mut receiver: mpsc::Receiver<EditEvent>,
    coordinator: Arc<EditCoordinator>,
) {
    while let Some(event) = receiver.recv().await {
        let outcome = catch_unwind(AssertUnwindSafe(|| coordinator.handle_event(&event)));
        if outcome.is_err() {
            metrics::record_event_handler_panic();
            error!(
                worker = index,
                sequence = event.sequence,
                resource_id = %event.resource_id,
                connection_id = %event.connection.id(),
                "edit event handler panicked; continuing"
            );
        }
    }
}
