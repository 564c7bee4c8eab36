//! Username/password credentials for the SOAP partner login.
//!
//! All credential types implement custom Debug to redact sensitive data.

use crate::error::{Error, ErrorKind, Result};
use crate::PRODUCTION_LOGIN_URL;

/// Credentials exchanged for a session at `{login_url}/services/Soap/u/{v}`.
///
/// The password and security token are redacted in Debug output.
#[derive(Clone)]
pub struct LoginCredentials {
    login_url: String,
    username: String,
    password: String,
    security_token: String,
    api_version: String,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("security_token", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl LoginCredentials {
    /// Create credentials for the production login endpoint.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login_url: PRODUCTION_LOGIN_URL.to_string(),
            username: username.into(),
            password: password.into(),
            security_token: String::new(),
            api_version: sfpipe_client::DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Set the login URL (e.g. `https://test.salesforce.com` or a My Domain URL).
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the security token appended to the password.
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = token.into();
        self
    }

    /// Set the API version (e.g., "62.0").
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Load credentials from environment variables.
    ///
    /// Required environment variables:
    /// - `SF_USERNAME`
    /// - `SF_PASSWORD`
    ///
    /// Optional:
    /// - `SF_LOGIN_URL` (default: production login URL)
    /// - `SF_SECURITY_TOKEN`
    /// - `SF_API_VERSION` (default: "62.0")
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load credentials through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let username = lookup("SF_USERNAME")
            .ok_or_else(|| Error::new(ErrorKind::EnvVar("SF_USERNAME".to_string())))?;
        let password = lookup("SF_PASSWORD")
            .ok_or_else(|| Error::new(ErrorKind::EnvVar("SF_PASSWORD".to_string())))?;

        let mut creds = Self::new(username, password);
        if let Some(login_url) = lookup("SF_LOGIN_URL") {
            creds = creds.with_login_url(login_url);
        }
        if let Some(token) = lookup("SF_SECURITY_TOKEN") {
            creds = creds.with_security_token(token);
        }
        if let Some(version) = lookup("SF_API_VERSION") {
            creds = creds.with_api_version(version);
        }

        creds.validate()?;
        Ok(creds)
    }

    /// Check that the credentials are usable.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCredentials(
                "username is empty".to_string(),
            )));
        }
        if self.login_url.is_empty() {
            return Err(Error::new(ErrorKind::InvalidCredentials(
                "login URL is empty".to_string(),
            )));
        }
        Ok(())
    }

    /// Get the login URL.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Get the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Get the API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// The password value sent to the login call: password followed by the
    /// security token.
    pub(crate) fn login_password(&self) -> String {
        format!("{}{}", self.password, self.security_token)
    }

    /// The SOAP partner endpoint for these credentials.
    pub fn soap_endpoint(&self) -> String {
        format!("{}/services/Soap/u/{}", self.login_url, self.api_version)
    }
}
