//! # sfpipe
//!
//! Move records between CSV streams and the Salesforce Bulk API (async jobs).
//!
//! ## Security
//!
//! - Session ids, passwords and refresh tokens are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages are sanitized before they are surfaced
//!
//! ## Crates
//!
//! - **sfpipe-client** - HTTP transport: session header, compression, remote error mapping
//! - **sfpipe-auth** - SOAP partner login, OAuth refresh-token login, pre-issued sessions
//! - **sfpipe-bulk** - Bulk API 1.0 jobs: batching, polling, query result streaming
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sfpipe::bulk::{BulkJobClient, JobOptions, Operation};
//! use sfpipe::pipeline::{load_csv, LoadOptions};
//! use sfpipe::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sfpipe::Error> {
//!     let config = Config::load(None)?;
//!     let client = BulkJobClient::new(
//!         config.authenticator()?,
//!         JobOptions::new("Account", Operation::Insert),
//!     )?;
//!
//!     let input = std::fs::File::open("accounts.csv")?;
//!     let snapshot = load_csv(&client, input, &LoadOptions::default(), std::io::sink()).await?;
//!     println!("{:?}", snapshot.progress());
//!     Ok(())
//! }
//! ```

// Re-export all crates for convenient access
pub use sfpipe_auth as auth;
pub use sfpipe_bulk as bulk;
pub use sfpipe_client as client;

pub mod config;
pub mod csv_io;
mod error;
pub mod pipeline;
pub mod soql;

pub use config::Config;
pub use csv_io::{csv_records, CsvRecordWriter};
pub use error::{Error, ErrorKind, Result};
pub use soql::soql_object_name;
