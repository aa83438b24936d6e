//! Bounded write-behind queue in front of the event store

use crate::error::StorageError;
use crate::event_store::{append_with, EventStore};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use mantion_core::{DetectionEvent, EventSink};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// `EventSink` that never blocks the caller.
///
/// Events are pushed onto a bounded channel and written by one writer thread.
/// When the queue is full the newest event is dropped and logged; a write that
/// fails is logged and not retried.
pub struct QueuedEventSink {
    sender: Mutex<Option<Sender<DetectionEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl QueuedEventSink {
    pub fn spawn(store: EventStore, capacity: usize) -> Result<Self, StorageError> {
        let (tx, rx) = channel::bounded(capacity.max(1));
        // Open up front so a bad path fails here rather than on the writer thread
        let conn = Connection::open(store.path())?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

        let worker = std::thread::Builder::new()
            .name("event-writer".to_string())
            .spawn(move || run_writer(conn, rx))?;

        info!("Event writer started for {}", store.path().display());
        Ok(Self {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Close the queue and wait until every pending event is written
    pub fn shutdown(&self) {
        drop(self.sender.lock().take());
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Event writer thread panicked");
            }
        }
    }
}

impl EventSink for QueuedEventSink {
    fn record(&self, event: DetectionEvent) {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            warn!("Event sink closed, dropping event for {}", event.camera_id);
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                error!(
                    camera_id = %event.camera_id,
                    "Persistence fault: event queue full, dropping {} event",
                    event.detection_type
                );
            }
            Err(TrySendError::Disconnected(event)) => {
                error!(
                    camera_id = %event.camera_id,
                    "Persistence fault: event writer gone, dropping event"
                );
            }
        }
    }
}

impl Drop for QueuedEventSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_writer(conn: Connection, rx: Receiver<DetectionEvent>) {
    for event in rx.iter() {
        match append_with(&conn, &event) {
            Ok(id) => debug!(
                "Recorded {} event #{} for {}",
                event.detection_type, id, event.camera_id
            ),
            Err(e) => error!(
                camera_id = %event.camera_id,
                "Persistence fault: failed to write event: {}",
                e
            ),
        }
    }
    debug!("Event writer drained");
}
