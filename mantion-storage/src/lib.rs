//! mantion-storage: persisted detection events
//!
//! `EventStore` is the SQLite table itself; `QueuedEventSink` puts a bounded
//! queue and a writer thread in front of it so camera loops never wait on disk.

pub mod error;
pub mod event_store;
pub mod queue;

pub use error::StorageError;
pub use event_store::EventStore;
pub use queue::QueuedEventSink;
