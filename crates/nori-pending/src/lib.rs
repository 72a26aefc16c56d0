//! Durable log of pending operations with batched fsyncs.
//!
//! Each logical operation is first recorded as pending (`add`) and later as
//! resolved (`commit`). The log provides:
//! - Varint-framed entries appended to a single file
//! - An in-memory set of ids that were added but not committed
//! - Fsync batching driven by a background pulse timer and an unsynced-record cap
//! - Observability via nori-observe
//!
//! Replaying the log into a pending set on restart is not provided;
//! [`EntryScanner`] only decodes the file for inspection.
//!
//! # Example
//!
//! ```no_run
//! use nori_pending::{PendingConfig, PendingLog};
//! use std::time::{Duration, SystemTime};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PendingConfig {
//!         path: "tx.log".into(),
//!         pulse_interval: Duration::from_millis(5),
//!         max_unsynced: 1_000,
//!         ..Default::default()
//!     };
//!     let log = PendingLog::open_with_config(config).await?;
//!
//!     log.add(7, SystemTime::now(), 0, b"send-invoice".as_slice()).await?;
//!     println!("pending: {:?}", log.pending().await?);
//!
//!     log.commit(7, SystemTime::now()).await?;
//!     log.close().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod entry;
mod error;
pub mod log;
mod pending;
pub mod pending_set;
pub mod scheduler;

pub use entry::{CorruptEntry, EncodingError, Entry, Operation, MAX_PAYLOAD_LEN};
pub use error::PendingError;
pub use log::{read_entries, AppendLog, EntryScanner, ScanError};
pub use nori_observe::SyncTrigger;
pub use pending::{PendingConfig, PendingLog, SyncStats};
pub use pending_set::PendingSet;
