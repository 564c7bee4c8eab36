//! HTTP response handling with Salesforce-specific extensions.

use std::pin::Pin;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;

use crate::error::{Error, ErrorKind, Result};

/// A streamed response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Wrapper around HTTP response with additional functionality.
#[derive(Debug)]
pub struct Response {
    inner: reqwest::Response,
}

impl Response {
    pub(crate) fn new(inner: reqwest::Response) -> Self {
        Self { inner }
    }

    /// Get the HTTP status code.
    pub fn status(&self) -> u16 {
        self.inner.status().as_u16()
    }

    /// Returns true if the response status is successful (2xx).
    pub fn is_success(&self) -> bool {
        self.inner.status().is_success()
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers().get(name)?.to_str().ok()
    }

    /// Get the Content-Type header.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the response body as text.
    pub async fn text(self) -> Result<String> {
        self.inner.text().await.map_err(Into::into)
    }

    /// Get the response body as bytes.
    pub async fn bytes(self) -> Result<Bytes> {
        self.inner.bytes().await.map_err(Into::into)
    }

    /// Deserialize the response body as JSON.
    ///
    /// The asynchronous API sometimes reports failures inside a 2xx body, so
    /// an object carrying `exceptionCode` is turned into a remote error
    /// instead of being handed to the caller's type.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let body = self.inner.bytes().await?;
        let value: serde_json::Value = serde_json::from_slice(&body)?;
        if let Some(err) = remote_exception(&value) {
            return Err(err);
        }
        serde_json::from_value(value).map_err(Into::into)
    }

    /// Stream the response body chunk by chunk.
    pub fn bytes_stream(self) -> BodyStream {
        Box::pin(self.inner.bytes_stream().map(|chunk| chunk.map_err(Error::from)))
    }

    /// Get access to the inner reqwest::Response.
    pub fn into_inner(self) -> reqwest::Response {
        self.inner
    }
}

/// Extension trait for processing Salesforce API responses.
pub trait ResponseExt {
    /// Convert a non-2xx response into the matching error.
    fn check_remote_error(self) -> impl std::future::Future<Output = Result<Response>> + Send;
}

impl ResponseExt for Response {
    async fn check_remote_error(self) -> Result<Response> {
        if self.is_success() {
            return Ok(self);
        }

        let status = self.status();
        let body = self.text().await.unwrap_or_default();
        Err(parse_error_response(status, &body))
    }
}

/// Error payload of the asynchronous API.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExceptionResponse {
    exception_code: String,
    #[serde(default)]
    exception_message: String,
}

fn remote_exception(value: &serde_json::Value) -> Option<Error> {
    let obj = value.as_object()?;
    if !obj.contains_key("exceptionCode") {
        return None;
    }
    let parsed: ExceptionResponse = serde_json::from_value(value.clone()).ok()?;
    Some(Error::new(ErrorKind::Remote {
        exception_code: parsed.exception_code,
        message: sanitize_error_message(&parsed.exception_message),
    }))
}

/// Parse error response body and convert to appropriate error kind.
pub(crate) fn parse_error_response(status: u16, body: &str) -> Error {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Some(err) = remote_exception(&value) {
            return err;
        }
    }

    // Sanitized to avoid echoing credentials from response bodies
    let sanitized = sanitize_error_message(body);
    let kind = match status {
        401 => ErrorKind::Authentication(sanitized),
        404 => ErrorKind::NotFound(sanitized),
        _ => ErrorKind::Http {
            status,
            message: sanitized,
        },
    };

    Error::new(kind)
}

/// Sanitize an error message to prevent exposing sensitive data.
///
/// This function:
/// - Truncates messages longer than 500 characters
/// - Removes potential session ids (`00D...!...`)
/// - Removes `sid=` parameters
pub fn sanitize_error_message(message: &str) -> String {
    const MAX_LENGTH: usize = 500;

    let mut sanitized = message.to_string();

    // Session ids start with the 15/18 char org id followed by "!"
    if let Ok(token_pattern) = regex_lite::Regex::new(r"00[A-Za-z0-9]{13,}[!][A-Za-z0-9_.]+") {
        sanitized = token_pattern
            .replace_all(&sanitized, "[REDACTED_TOKEN]")
            .to_string();
    }

    if let Ok(session_pattern) = regex_lite::Regex::new(r"sid=[A-Za-z0-9]{20,}") {
        sanitized = session_pattern
            .replace_all(&sanitized, "sid=[REDACTED]")
            .to_string();
    }

    if sanitized.len() > MAX_LENGTH {
        let mut cut = MAX_LENGTH;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str("...[truncated]");
    }

    sanitized
}
