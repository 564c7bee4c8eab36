//! Error types for the sfpipe facade and binary.

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

    /// True for usage and configuration problems.
    pub fn is_config(&self) -> bool {
        matches!(self.kind, ErrorKind::Config(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// Bad arguments, config file or credentials setup.
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Auth error: {0}")]
    Auth(String),
    #[error("Bulk API error: {0}")]
    Bulk(String),
    /// The job finished with failed batches or records.
    #[error("Job failed: {0}")]
    JobFailed(String),
    #[error("CSV error: {0}")]
    Csv(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<sfpipe_bulk::Error> for Error {
    fn from(err: sfpipe_bulk::Error) -> Self {
        let kind = match &err.kind {
            sfpipe_bulk::ErrorKind::Config(message) => ErrorKind::Config(message.clone()),
            _ => ErrorKind::Bulk(err.to_string()),
        };
        Error::with_source(kind, err)
    }
}

impl From<sfpipe_auth::Error> for Error {
    fn from(err: sfpipe_auth::Error) -> Self {
        Error::with_source(ErrorKind::Auth(err.to_string()), err)
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::with_source(ErrorKind::Csv(err.to_string()), err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(ErrorKind::Io(err.to_string()), err)
    }
}
