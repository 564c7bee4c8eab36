//! Session state and the authenticator that produces it.

use sfpipe_client::SfHttpClient;
use tracing::{info, instrument};

use crate::credentials::LoginCredentials;
use crate::error::Result;
use crate::oauth::RefreshTokenLogin;

/// An authenticated session.
///
/// The session id is redacted in Debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Session id sent as `X-SFDC-Session`.
    pub session_id: String,
    /// Server URL returned by the login call.
    pub server_url: String,
    /// Scheme and host of `server_url`; base for every asynchronous API call.
    pub instance_url: String,
    /// Authenticated user id.
    pub user_id: Option<String>,
    /// Organization id.
    pub organization_id: Option<String>,
    /// Whether the org is a sandbox.
    pub sandbox: bool,
    /// Whether the user's password has expired.
    pub password_expired: bool,
}

impl std::fmt::Debug for SessionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInfo")
            .field("session_id", &"[REDACTED]")
            .field("server_url", &self.server_url)
            .field("instance_url", &self.instance_url)
            .field("user_id", &self.user_id)
            .field("organization_id", &self.organization_id)
            .field("sandbox", &self.sandbox)
            .field("password_expired", &self.password_expired)
            .finish()
    }
}

impl SessionInfo {
    /// A pre-issued session for an instance (no login call).
    pub fn new(instance_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        let instance_url = instance_url.into().trim_end_matches('/').to_string();
        Self {
            session_id: session_id.into(),
            server_url: instance_url.clone(),
            instance_url,
            user_id: None,
            organization_id: None,
            sandbox: false,
            password_expired: false,
        }
    }
}

/// How a bulk client obtains its session.
#[derive(Debug, Clone)]
pub enum Authenticator {
    /// SOAP partner login with username, password and security token.
    Password(LoginCredentials),
    /// OAuth refresh-token grant (e.g. from an sfdx auth URL).
    RefreshToken(RefreshTokenLogin),
    /// An already issued session.
    Session {
        session: SessionInfo,
        api_version: String,
    },
}

impl Authenticator {
    /// Wrap a pre-issued session using the default API version.
    pub fn session(session: SessionInfo) -> Self {
        Authenticator::Session {
            session,
            api_version: sfpipe_client::DEFAULT_API_VERSION.to_string(),
        }
    }

    /// API version used for the asynchronous API.
    pub fn api_version(&self) -> &str {
        match self {
            Authenticator::Password(creds) => creds.api_version(),
            Authenticator::RefreshToken(login) => login.api_version(),
            Authenticator::Session { api_version, .. } => api_version,
        }
    }

    /// Obtain a session.
    #[instrument(skip(self, http))]
    pub async fn login(&self, http: &SfHttpClient) -> Result<SessionInfo> {
        let session = match self {
            Authenticator::Password(creds) => creds.login(http).await?,
            Authenticator::RefreshToken(login) => login.login(http).await?,
            Authenticator::Session { session, .. } => return Ok(session.clone()),
        };
        info!(
            instance_url = %session.instance_url,
            organization_id = session.organization_id.as_deref().unwrap_or(""),
            "Session established"
        );
        Ok(session)
    }
}

impl From<LoginCredentials> for Authenticator {
    fn from(creds: LoginCredentials) -> Self {
        Authenticator::Password(creds)
    }
}

impl From<RefreshTokenLogin> for Authenticator {
    fn from(login: RefreshTokenLogin) -> Self {
        Authenticator::RefreshToken(login)
    }
}
