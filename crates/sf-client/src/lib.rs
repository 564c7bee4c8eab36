//! # sfpipe-client
//!
//! HTTP transport shared by the sfpipe crates.
//!
//! This crate provides the foundational HTTP plumbing for the Salesforce
//! SOAP login endpoint and the asynchronous Bulk API:
//! - Session-header authentication (`X-SFDC-Session`)
//! - Compression support (gzip, deflate)
//! - Remote exception mapping (`exceptionCode` / `exceptionMessage`)
//! - Streaming response bodies for large result sets
//! - Request/response tracing
//!
//! There is no retry layer: every call is issued exactly once and
//! failures propagate to the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Application Layer                        │
//! │  (sfpipe-auth login, sfpipe-bulk job/batch client)          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SessionClient                             │
//! │  - Holds session id + instance URL + API version            │
//! │  - Builds /services/async/{version}/... URLs                │
//! │  - Typed JSON methods (get_json, post_json, post_soql_json) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    SfHttpClient                             │
//! │  - Raw HTTP with compression                                │
//! │  - Request building, error mapping                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use sfpipe_client::SessionClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sfpipe_client::Error> {
//!     let client = SessionClient::new("https://na1.salesforce.com", "00D...!AQ...")?
//!         .with_api_version("62.0");
//!
//!     let job: serde_json::Value = client.get_json(&client.async_url("job/750xx0000000001")).await?;
//!     println!("{}", job["state"]);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
mod request;
mod response;
mod session_client;

pub use client::SfHttpClient;
pub use config::{ClientConfig, ClientConfigBuilder};
pub use error::{Error, ErrorKind, Result};
pub use request::{RequestBuilder, RequestMethod};
pub use response::{sanitize_error_message, BodyStream, Response, ResponseExt};
pub use session_client::{instance_url_from_server_url, SessionClient};

/// Default Salesforce API version
pub const DEFAULT_API_VERSION: &str = "62.0";

/// Header carrying the session id on every asynchronous API call.
pub const SESSION_HEADER: &str = "X-SFDC-Session";

/// User-Agent string for the client
pub const USER_AGENT: &str = concat!("sfpipe/", env!("CARGO_PKG_VERSION"));
