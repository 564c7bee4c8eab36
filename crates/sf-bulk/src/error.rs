//! Error types for sfpipe-bulk.

use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[error("{kind}")]
pub struct Error {
    pub kind: ErrorKind,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self { kind, source: None }
    }

    pub fn with_source(
        kind: ErrorKind,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a failed status refresh.
    pub fn polling(source: Error) -> Self {
        Self::with_source(ErrorKind::Polling(source.to_string()), source)
    }

    /// The remote exception code, if the API reported one.
    ///
    /// Polling errors report the code of the refresh that failed.
    pub fn exception_code(&self) -> Option<&str> {
        match &self.kind {
            ErrorKind::Remote { code, .. } => Some(code),
            ErrorKind::Polling(_) => {
                let source = self.source.as_deref()?;
                source
                    .downcast_ref::<Error>()
                    .or_else(|| source.downcast_ref::<Arc<Error>>().map(|shared| &**shared))
                    .and_then(Error::exception_code)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    /// Job or batch options are unusable; raised before any network call.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    /// The API answered with `exceptionCode`/`exceptionMessage`.
    #[error("Remote error: {code} - {message}")]
    Remote { code: String, message: String },
    /// The operation is not allowed in the current job or accumulator state.
    #[error("Invalid state: {0}")]
    InvalidState(String),
    /// A status refresh failed while monitoring the job.
    #[error("Polling error: {0}")]
    Polling(String),
    #[error("Client error: {0}")]
    Client(String),
    /// A response or input record could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<sfpipe_client::Error> for Error {
    fn from(err: sfpipe_client::Error) -> Self {
        let kind = match &err.kind {
            sfpipe_client::ErrorKind::Remote {
                exception_code,
                message,
            } => ErrorKind::Remote {
                code: exception_code.clone(),
                message: message.clone(),
            },
            sfpipe_client::ErrorKind::Json(message) => ErrorKind::Decode(message.clone()),
            _ => ErrorKind::Client(err.to_string()),
        };
        Error::with_source(kind, err)
    }
}

impl From<sfpipe_auth::Error> for Error {
    fn from(err: sfpipe_auth::Error) -> Self {
        Error::with_source(ErrorKind::Auth(err.to_string()), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Decode(err.to_string()), err)
    }
}
