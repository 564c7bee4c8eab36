//! Session-authenticated client for the asynchronous (Bulk 1.0) API.
//!
//! `SessionClient` pairs an [`SfHttpClient`] with a session id and the
//! instance URL, and exposes typed JSON methods for the job and batch
//! resources under `/services/async/{version}/`.
//!
//! ## Security
//!
//! - The session id is redacted in Debug output
//! - Request bodies are skipped in tracing spans

use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use crate::client::SfHttpClient;
use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::request::RequestBuilder;
use crate::response::BodyStream;
use crate::DEFAULT_API_VERSION;

/// Client for session-authenticated asynchronous API calls.
#[derive(Clone)]
pub struct SessionClient {
    http: SfHttpClient,
    instance_url: String,
    session_id: String,
    api_version: String,
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("instance_url", &self.instance_url)
            .field("session_id", &"[REDACTED]")
            .field("api_version", &self.api_version)
            .finish_non_exhaustive()
    }
}

impl SessionClient {
    /// Create a client for the given instance URL and session id.
    pub fn new(instance_url: impl Into<String>, session_id: impl Into<String>) -> Result<Self> {
        Self::with_config(instance_url, session_id, ClientConfig::default())
    }

    /// Create a client with custom HTTP configuration.
    pub fn with_config(
        instance_url: impl Into<String>,
        session_id: impl Into<String>,
        config: ClientConfig,
    ) -> Result<Self> {
        Ok(Self::with_http(
            SfHttpClient::new(config)?,
            instance_url,
            session_id,
        ))
    }

    /// Create a client reusing an existing HTTP client (and its pool).
    pub fn with_http(
        http: SfHttpClient,
        instance_url: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            http,
            instance_url: instance_url.into().trim_end_matches('/').to_string(),
            session_id: session_id.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }

    /// Set the API version (e.g., "62.0").
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Get the instance URL.
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Get the session id.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the API version.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Get the underlying HTTP client.
    pub fn http(&self) -> &SfHttpClient {
        &self.http
    }

    /// Build the asynchronous API URL for a path.
    ///
    /// Example: `async_url("job/750x/batch")` -> `{instance}/services/async/62.0/job/750x/batch`
    pub fn async_url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!(
            "{}/services/async/{}/{}",
            self.instance_url, self.api_version, path
        )
    }

    /// Create a GET request builder carrying the session header.
    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).session(&self.session_id)
    }

    /// Create a POST request builder carrying the session header.
    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url).session(&self.session_id)
    }

    /// GET a JSON document.
    #[instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.http.send_json(self.get(url)).await
    }

    /// POST a JSON body and decode the JSON reply.
    #[instrument(skip(self, body))]
    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T> {
        let request = self.post(url).json(body)?;
        self.http.send_json(request).await
    }

    /// POST a raw SOQL body (query batches) and decode the JSON reply.
    #[instrument(skip(self, soql))]
    pub async fn post_soql_json<T: DeserializeOwned>(&self, url: &str, soql: &str) -> Result<T> {
        self.http.send_json(self.post(url).soql(soql)).await
    }

    /// GET a resource and stream its body.
    #[instrument(skip(self))]
    pub async fn get_stream(&self, url: &str) -> Result<BodyStream> {
        let response = self.http.execute(self.get(url)).await?;
        Ok(response.bytes_stream())
    }
}

/// Derive the instance base URL (scheme, host and port) from a SOAP
/// `serverUrl` such as `https://na1.salesforce.com/services/Soap/u/62.0/00D...`.
pub fn instance_url_from_server_url(server_url: &str) -> Result<String> {
    let parsed = url::Url::parse(server_url)?;
    let host = parsed.host_str().ok_or_else(|| {
        Error::new(ErrorKind::Config(format!(
            "server URL has no host: {server_url}"
        )))
    })?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    })
}
