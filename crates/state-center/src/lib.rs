//! Durable state of the booking pilot: the allow-listed domain, saved form
//! defaults, the `runInProgress` flag and the bounded log history.

pub mod log;
pub mod store;

pub use log::{LogRing, RunLog, LOG_CAPACITY};
pub use store::{FileKvStore, KvStore, MemoryKvStore, PilotStore, StoreError};
