//! # sfpipe-bulk
//!
//! Salesforce Bulk API 1.0 client for asynchronous record jobs.
//!
//! ## Features
//!
//! - **Job lifecycle** - Create, close and abort one job per client
//! - **Batching** - [`BatchAccumulator`] turns a record stream into batches
//! - **Status polling** - Subscribe to [`JobEvent`]s or wait for the terminal snapshot
//! - **Query streaming** - [`QueryResultReader`] decodes result rows incrementally
//!
//! ## Example - Bulk Insert
//!
//! ```rust,ignore
//! use sfpipe_auth::LoginCredentials;
//! use sfpipe_bulk::{BatchAccumulator, BatchOptions, BulkJobClient, JobOptions, Operation};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sfpipe_bulk::Error> {
//!     let client = BulkJobClient::new(
//!         LoginCredentials::from_env()?.into(),
//!         JobOptions::new("Account", Operation::Insert),
//!     )?;
//!
//!     let mut accumulator = BatchAccumulator::new(client.clone(), BatchOptions::default())?;
//!     let mut record = sfpipe_bulk::Record::new();
//!     record.insert("Name".into(), "Acme Corp".into());
//!     accumulator.accept(record).await?;
//!     accumulator.finish().await?;
//!
//!     let snapshot = client.wait_for_completion().await;
//!     println!("{:?}", snapshot.progress());
//!     Ok(())
//! }
//! ```

mod accumulator;
mod client;
mod decode;
mod error;
mod monitor;
mod query;
mod state;
mod types;

pub use accumulator::{normalize_record, BatchAccumulator};
pub use client::{BulkJobClient, BulkJobClientBuilder, DEFAULT_POLL_INTERVAL};
pub use decode::RecordStream;
pub use error::{Error, ErrorKind, Result};
pub use monitor::{JobEvent, MonitorState};
pub use query::QueryResultReader;
pub use state::{FailedRecordPolicy, JobProgress, JobSnapshot, Transition};
pub use types::*;
