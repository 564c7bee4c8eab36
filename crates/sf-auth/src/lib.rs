//! # sfpipe-auth
//!
//! Session acquisition for the Salesforce asynchronous (Bulk 1.0) API.
//!
//! ## Security
//!
//! - Sensitive data (passwords, tokens, session ids) are redacted in Debug output
//! - Tracing skips credential parameters
//! - Error messages sanitize any credential data
//!
//! ## Supported Authentication Methods
//!
//! - **SOAP partner login** - username, password and security token
//! - **OAuth 2.0 Refresh Token** - e.g. from an sfdx auth URL (`force://...`)
//! - **Pre-issued session** - an existing session id and instance URL
//!
//! ## Example
//!
//! ```rust,ignore
//! use sfpipe_auth::{Authenticator, LoginCredentials};
//! use sfpipe_client::SfHttpClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sfpipe_auth::Error> {
//!     let auth = Authenticator::from(LoginCredentials::from_env()?);
//!     let http = SfHttpClient::default_client()?;
//!     let session = auth.login(&http).await?;
//!     println!("logged in to {}", session.instance_url);
//!     Ok(())
//! }
//! ```

mod credentials;
mod error;
mod oauth;
mod session;
mod soap;

pub use credentials::LoginCredentials;
pub use error::{Error, ErrorKind, Result};
pub use oauth::RefreshTokenLogin;
pub use session::{Authenticator, SessionInfo};

/// Default Salesforce login URL for production.
pub const PRODUCTION_LOGIN_URL: &str = "https://login.salesforce.com";

/// Default Salesforce login URL for sandbox.
pub const SANDBOX_LOGIN_URL: &str = "https://test.salesforce.com";
