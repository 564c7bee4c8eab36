//! OAuth 2.0 refresh-token login.
//!
//! A refresh token (typically taken from an sfdx auth URL) is exchanged at
//! `/services/oauth2/token` for an access token, which the asynchronous API
//! accepts as a session id.

use std::collections::HashMap;

use serde::Deserialize;
use sfpipe_client::SfHttpClient;
use tracing::instrument;

use crate::error::{Error, ErrorKind, Result};
use crate::session::SessionInfo;
use crate::{PRODUCTION_LOGIN_URL, SANDBOX_LOGIN_URL};

/// Refresh-token grant for a connected app.
///
/// The client secret and refresh token are redacted in Debug output.
#[derive(Clone)]
pub struct RefreshTokenLogin {
    client_id: String,
    client_secret: Option<String>,
    refresh_token: String,
    login_url: String,
    api_version: String,
}

impl std::fmt::Debug for RefreshTokenLogin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTokenLogin")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &"[REDACTED]")
            .field("login_url", &self.login_url)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl RefreshTokenLogin {
    /// Create a refresh-token login against the given login URL.
    pub fn new(
        client_id: impl Into<String>,
        refresh_token: impl Into<String>,
        login_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            refresh_token: refresh_token.into(),
            login_url: login_url.into().trim_end_matches('/').to_string(),
            api_version: sfpipe_client::DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Set the consumer secret.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    /// Set the API version (e.g., "62.0").
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Get the API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Get the token endpoint base URL.
    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Parse an sfdx auth URL.
    ///
    /// Accepted forms:
    /// - `force://<client_id>:<client_secret>:<refresh_token>@<instance_url>`
    /// - `force://<client_id>::<refresh_token>@<instance_url>` (empty client_secret)
    /// - `force://<client_id>:<client_secret>:<refresh_token>:<username>@<instance_url>`
    pub fn from_sfdx_auth_url(auth_url: &str) -> Result<Self> {
        let url = auth_url.strip_prefix("force://").ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput(
                "Auth URL must start with force://".to_string(),
            ))
        })?;

        // Usernames contain '@'; the instance follows the last one
        let (credentials_part, instance_url) = url.rsplit_once('@').ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput(
                "Invalid auth URL format: missing @".to_string(),
            ))
        })?;

        let cred_parts: Vec<&str> = credentials_part.splitn(4, ':').collect();
        if cred_parts.len() < 3 || cred_parts[0].is_empty() || cred_parts[2].is_empty() {
            return Err(Error::new(ErrorKind::InvalidInput(
                "Invalid auth URL format: expected client_id:client_secret:refresh_token[:username]"
                    .to_string(),
            )));
        }

        let instance_url = if instance_url.starts_with("http://")
            || instance_url.starts_with("https://")
        {
            instance_url.to_string()
        } else {
            format!("https://{instance_url}")
        };

        let mut login = Self::new(cred_parts[0], cred_parts[2], token_login_url(&instance_url));
        if !cred_parts[1].is_empty() {
            login = login.with_secret(cred_parts[1]);
        }
        Ok(login)
    }

    /// Exchange the refresh token for a session.
    ///
    /// The refresh token is not logged.
    #[instrument(skip(self, http), fields(login_url = %self.login_url))]
    pub async fn login(&self, http: &SfHttpClient) -> Result<SessionInfo> {
        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "refresh_token".to_string());
        form.insert("refresh_token".to_string(), self.refresh_token.clone());
        form.insert("client_id".to_string(), self.client_id.clone());
        if let Some(ref secret) = self.client_secret {
            form.insert("client_secret".to_string(), secret.clone());
        }

        let request = http
            .post(format!("{}/services/oauth2/token", self.login_url))
            .form(form);
        let response = http.execute_raw(&request).await?;

        if !response.is_success() {
            let body = response.text().await?;
            let error = serde_json::from_str::<OAuthErrorResponse>(&body).unwrap_or_else(|_| {
                OAuthErrorResponse {
                    error: "unknown_error".to_string(),
                    error_description: sfpipe_client::sanitize_error_message(&body),
                }
            });
            let description = if error.error == "invalid_grant" {
                format!(
                    "Refresh token expired or invalid. Generate a fresh auth URL using: \
                     `sf org display --verbose --json`. Original error: {}",
                    error.error_description
                )
            } else {
                error.error_description
            };
            return Err(Error::new(ErrorKind::OAuth {
                error: error.error,
                description,
            }));
        }

        let token: TokenResponse = serde_json::from_str(&response.text().await?)?;
        Ok(token.into_session())
    }
}

/// Pick the token endpoint for an instance.
fn token_login_url(instance_url: &str) -> String {
    if instance_url.contains("localhost") || instance_url.contains("127.0.0.1") {
        instance_url.trim_end_matches('/').to_string()
    } else if instance_url.contains("test.salesforce.com")
        || instance_url.contains("sandbox")
        || instance_url.contains(".scratch.")
    {
        SANDBOX_LOGIN_URL.to_string()
    } else {
        PRODUCTION_LOGIN_URL.to_string()
    }
}

/// Token response from OAuth.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    /// Identity URL: `https://login.salesforce.com/id/{orgId}/{userId}`.
    #[serde(default)]
    id: Option<String>,
}

impl TokenResponse {
    fn into_session(self) -> SessionInfo {
        let mut session = SessionInfo::new(self.instance_url, self.access_token);
        if let Some(id) = self.id {
            let mut segments = id.rsplit('/');
            session.user_id = segments.next().map(str::to_string);
            session.organization_id = segments.next().map(str::to_string);
        }
        session
    }
}

/// OAuth error response.
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: String,
}
