//! Configuration file loading.
//!
//! The file is JSON with a `bulkApi` section:
//!
//! ```json
//! {
//!   "bulkApi": {
//!     "loginUrl": "https://test.salesforce.com",
//!     "apiVersion": "62.0",
//!     "username": "user@example.com",
//!     "password": "secret",
//!     "token": "securitytoken",
//!     "concurrencyMode": "Parallel",
//!     "batchSize": 500
//!   },
//!   "http": {
//!     "timeoutSecs": 600,
//!     "connectTimeoutSecs": 10,
//!     "compression": true
//!   }
//! }
//! ```
//!
//! `authUrl` (an SFDX `force://` URL) may replace the username/password
//! fields. Without credentials in the file, `SF_AUTH_URL` and then the
//! `SF_USERNAME`/`SF_PASSWORD` family of environment variables are used.
//! The `http` section is optional; unset fields keep the client defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sfpipe_auth::{Authenticator, LoginCredentials, RefreshTokenLogin};
use sfpipe_bulk::{BatchOptions, ConcurrencyMode, DEFAULT_BATCH_SIZE};
use sfpipe_client::{ClientConfig, SfHttpClient};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// File read when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "sfpipe.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub bulk_api: Option<BulkApiConfig>,
    #[serde(default)]
    pub http: Option<HttpConfig>,
}

/// The `http` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HttpConfig {
    pub timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub pool_idle_timeout_secs: Option<u64>,
    pub pool_max_idle_per_host: Option<usize>,
    pub compression: Option<bool>,
    pub user_agent: Option<String>,
    pub trace_requests: Option<bool>,
}

/// The `bulkApi` section. Secrets are redacted in Debug output.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkApiConfig {
    pub login_url: Option<String>,
    #[serde(default, deserialize_with = "deserialize_version")]
    pub api_version: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub auth_url: Option<String>,
    pub concurrency_mode: Option<String>,
    pub batch_size: Option<usize>,
}

impl std::fmt::Debug for BulkApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redacted = |value: &Option<String>| value.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("BulkApiConfig")
            .field("login_url", &self.login_url)
            .field("api_version", &self.api_version)
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("token", &redacted(&self.token))
            .field("auth_url", &redacted(&self.auth_url))
            .field("concurrency_mode", &self.concurrency_mode)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// `apiVersion` may be written as `62.0` or `"62.0"`.
fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) => Ok(Some(format!("{v:.1}"))),
            None => Err(serde::de::Error::custom("invalid apiVersion")),
        },
        Some(other) => Err(serde::de::Error::custom(format!(
            "apiVersion must be a string or number, found {other}"
        ))),
    }
}

impl Config {
    /// Load `path`, or `./sfpipe.json` if it exists, or an empty config.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    debug!("No config file, using environment");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::with_source(
                ErrorKind::Config(format!("cannot read {}: {e}", path.display())),
                e,
            )
        })?;
        debug!(path = %path.display(), "Config file loaded");
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| {
            Error::with_source(ErrorKind::Config(format!("invalid config file: {e}")), e)
        })
    }

    fn section(&self) -> BulkApiConfig {
        self.bulk_api.clone().unwrap_or_default()
    }

    /// Resolve how to log in, falling back to the process environment.
    pub fn authenticator(&self) -> Result<Authenticator> {
        self.authenticator_with(|name| std::env::var(name).ok())
    }

    /// [`authenticator`](Self::authenticator) with an explicit variable lookup.
    pub fn authenticator_with(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Authenticator> {
        let section = self.section();

        if let Some(auth_url) = &section.auth_url {
            return refresh_token_login(auth_url, section.api_version.as_deref());
        }

        if let (Some(username), Some(password)) = (&section.username, &section.password) {
            let mut creds = LoginCredentials::new(username, password);
            if let Some(login_url) = &section.login_url {
                creds = creds.with_login_url(login_url);
            }
            if let Some(token) = &section.token {
                creds = creds.with_security_token(token);
            }
            if let Some(version) = &section.api_version {
                creds = creds.with_api_version(version);
            }
            creds.validate().map_err(config_error)?;
            return Ok(creds.into());
        }

        if let Some(auth_url) = lookup("SF_AUTH_URL") {
            return refresh_token_login(&auth_url, section.api_version.as_deref());
        }

        let creds = LoginCredentials::from_lookup(&lookup).map_err(config_error)?;
        Ok(creds.into())
    }

    /// Concurrency mode from the file, Parallel if unset.
    pub fn concurrency_mode(&self) -> Result<ConcurrencyMode> {
        match self.section().concurrency_mode {
            Some(mode) => Ok(mode.parse()?),
            None => Ok(ConcurrencyMode::default()),
        }
    }

    /// HTTP client settings from the `http` section.
    pub fn client_config(&self) -> ClientConfig {
        let http = self.http.clone().unwrap_or_default();
        let mut builder = ClientConfig::builder();
        if let Some(secs) = http.timeout_secs {
            builder = builder.with_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = http.connect_timeout_secs {
            builder = builder.with_connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = http.pool_idle_timeout_secs {
            builder = builder.with_pool_idle_timeout(Duration::from_secs(secs));
        }
        if let Some(max) = http.pool_max_idle_per_host {
            builder = builder.with_pool_max_idle(max);
        }
        if let Some(enabled) = http.compression {
            builder = builder.with_compression(enabled);
        }
        if let Some(agent) = http.user_agent {
            builder = builder.with_user_agent(agent);
        }
        if let Some(enabled) = http.trace_requests {
            builder = builder.with_request_tracing(enabled);
        }
        builder.build()
    }

    /// An HTTP client built from [`client_config`](Self::client_config).
    pub fn http_client(&self) -> Result<SfHttpClient> {
        SfHttpClient::new(self.client_config())
            .map_err(|e| Error::with_source(ErrorKind::Config(e.to_string()), e))
    }

    /// Batch options from the file.
    pub fn batch_options(&self) -> Result<BatchOptions> {
        let options =
            BatchOptions::with_batch_size(self.section().batch_size.unwrap_or(DEFAULT_BATCH_SIZE));
        options.validate()?;
        Ok(options)
    }
}

fn refresh_token_login(auth_url: &str, api_version: Option<&str>) -> Result<Authenticator> {
    let mut login = RefreshTokenLogin::from_sfdx_auth_url(auth_url).map_err(config_error)?;
    if let Some(version) = api_version {
        login = login.with_api_version(version);
    }
    Ok(login.into())
}

fn config_error(err: sfpipe_auth::Error) -> Error {
    Error::with_source(ErrorKind::Config(err.to_string()), err)
}
