//! Error type shared by transfer handlers, the resolver and the health checker
//!
//! Every error carries an [`ErrorKind`] and a `retryable` flag. Retry loops only repeat an
//! operation when the flag is set, so callers decide retry policy by constructing errors
//! rather than by matching on types.

use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// handler does not implement the requested operation
    UnsupportedOperation,
    /// no enabled handler matches the URL
    HandlerNotFound,
    /// I/O or protocol failure while moving bytes
    TransferFailure,
    /// a dependency notation or local file selection could not be turned into a file
    ResolutionConflict,
    /// one or more health checks failed
    HealthCheckFailure,
    /// invalid option or pattern
    Configuration,
    /// worker task panicked or was cancelled
    Interrupted,
}

impl ErrorKind {
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::TransferFailure | ErrorKind::HealthCheckFailure
        )
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{cause:#}")]
pub struct Error {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub cause: anyhow::Error,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn new(kind: ErrorKind, cause: impl Into<anyhow::Error>) -> Self {
        Self {
            kind,
            retryable: kind.retryable(),
            cause: cause.into(),
        }
    }

    pub fn unsupported(transfer: &str, operation: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedOperation,
            anyhow::anyhow!("File transfer '{transfer}' does not support '{operation}' operation."),
        )
    }

    pub fn handler_not_found(url: &str) -> Self {
        Self::new(
            ErrorKind::HandlerNotFound,
            anyhow::anyhow!("File transfer supporting URL '{url}' not found!"),
        )
    }

    pub fn transfer(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::TransferFailure, cause)
    }

    pub fn resolution(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::ResolutionConflict, cause)
    }

    pub fn health(report: String) -> Self {
        Self::new(ErrorKind::HealthCheckFailure, anyhow::anyhow!(report))
    }

    pub fn configuration(cause: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Configuration, cause)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_unsupported(&self) -> bool {
        self.kind == ErrorKind::UnsupportedOperation
    }
}

impl From<pool::TaskError> for Error {
    fn from(error: pool::TaskError) -> Self {
        Self::new(ErrorKind::Interrupted, error)
    }
}

/// Decides whether a failed attempt may be repeated
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Wraps foreign errors into transfer failures with a message naming what was attempted
pub trait TransferContext<T> {
    fn transfer_context<C, F>(self, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> TransferContext<T> for std::result::Result<T, E>
where
    E: Into<anyhow::Error>,
{
    fn transfer_context<C, F>(self, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| Error::transfer(error.into().context(context())))
    }
}
