//! Error types for sendwire.
//!
//! [`PipelineError`] is the single error type flowing through handlers,
//! adapters and the sender. [`Failure`] is what reaches the error path:
//! a primary error plus any secondary errors (for example an after-filter
//! that failed while reacting to the primary one).

use std::any::Any;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// I/O error while reading a source or writing the response body.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// Failure raised by route logic.
    #[error("handler error: {0}")]
    Handler(String),

    /// Failure that maps to a specific HTTP status.
    #[error("{code}: {message}")]
    Status { code: u16, message: String },

    /// Wrapper produced by asynchronous composition. The cause, when
    /// present, is the failure that should be reported.
    #[error("completion failed: {message}")]
    Completion {
        message: String,
        cause: Option<Box<PipelineError>>,
    },

    /// A file-backed result points at a path that does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The peer went away.
    #[error("connection closed")]
    ConnectionClosed,

    /// A second response was attempted on the same exchange.
    #[error("response already started")]
    ResponseStarted,

    /// A write was attempted after the sender was closed.
    #[error("response already closed")]
    ResponseClosed,

    /// A write was attempted while another one was still in flight.
    #[error("write already in progress")]
    WriteInProgress,

    /// The handler produced a result of a different shape than the one
    /// its route was registered with.
    #[error("unexpected reply: expected {expected}, found {found}")]
    UnexpectedReply {
        expected: &'static str,
        found: &'static str,
    },

    /// No route registered under the given name.
    #[error("route not found: {0}")]
    RouteNotFound(String),

    /// Work was cancelled before it produced a result.
    #[error("cancelled")]
    Cancelled,

    /// Route logic panicked.
    #[error("panic: {0}")]
    Panic(String),
}

impl PipelineError {
    /// Create a handler failure from any displayable error.
    pub fn handler(message: impl fmt::Display) -> Self {
        PipelineError::Handler(message.to_string())
    }

    /// Create a failure carrying an explicit HTTP status.
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        PipelineError::Status {
            code,
            message: message.into(),
        }
    }

    /// Wrap a failure the way asynchronous composition does.
    pub fn completion(cause: PipelineError) -> Self {
        PipelineError::Completion {
            message: cause.to_string(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Strip completion wrappers, preferring the underlying cause.
    ///
    /// A wrapper without a cause is returned unchanged.
    pub fn unwrap_completion(self) -> Self {
        match self {
            PipelineError::Completion {
                cause: Some(cause), ..
            } => cause.unwrap_completion(),
            other => other,
        }
    }

    /// Convert a caught panic payload into an error.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        PipelineError::Panic(message)
    }

    /// HTTP status used when this error becomes an error response.
    pub fn status_code(&self) -> u16 {
        match self {
            PipelineError::Status { code, .. } => *code,
            PipelineError::NotFound(_) | PipelineError::RouteNotFound(_) => 404,
            PipelineError::Completion {
                cause: Some(cause), ..
            } => cause.status_code(),
            PipelineError::ConnectionClosed => 499,
            _ => 500,
        }
    }

    /// Short machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Io(_) => "io",
            PipelineError::Json(_) => "json",
            PipelineError::MsgPackEncode(_) => "msgpack",
            PipelineError::Handler(_) => "handler",
            PipelineError::Status { .. } => "status",
            PipelineError::Completion { .. } => "completion",
            PipelineError::NotFound(_) => "not_found",
            PipelineError::ConnectionClosed => "connection_closed",
            PipelineError::ResponseStarted => "response_started",
            PipelineError::ResponseClosed => "response_closed",
            PipelineError::WriteInProgress => "write_in_progress",
            PipelineError::UnexpectedReply { .. } => "unexpected_reply",
            PipelineError::RouteNotFound(_) => "route_not_found",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Panic(_) => "panic",
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_panic() {
            PipelineError::from_panic(err.into_panic())
        } else {
            PipelineError::Cancelled
        }
    }
}

/// Result type alias using PipelineError.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// A primary error together with secondary errors raised while handling it.
///
/// Secondary errors never replace the primary one.
#[derive(Debug)]
pub struct Failure {
    error: PipelineError,
    suppressed: Vec<PipelineError>,
}

impl Failure {
    pub fn new(error: PipelineError) -> Self {
        Self {
            error,
            suppressed: Vec::new(),
        }
    }

    /// The primary error.
    pub fn error(&self) -> &PipelineError {
        &self.error
    }

    /// Secondary errors, in the order they were attached.
    pub fn suppressed(&self) -> &[PipelineError] {
        &self.suppressed
    }

    /// Attach a secondary error.
    pub fn add_suppressed(&mut self, error: PipelineError) {
        self.suppressed.push(error);
    }

    pub fn with_suppressed(mut self, error: PipelineError) -> Self {
        self.add_suppressed(error);
        self
    }

    pub fn status_code(&self) -> u16 {
        self.error.status_code()
    }

    pub fn into_error(self) -> PipelineError {
        self.error
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;
        if !self.suppressed.is_empty() {
            write!(f, " (+{} suppressed)", self.suppressed.len())?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<PipelineError> for Failure {
    fn from(error: PipelineError) -> Self {
        Failure::new(error)
    }
}

impl From<std::io::Error> for Failure {
    fn from(error: std::io::Error) -> Self {
        Failure::new(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_completion_prefers_cause() {
        let err = PipelineError::completion(PipelineError::handler("boom"));
        match err.unwrap_completion() {
            PipelineError::Handler(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unwrap_completion_nested() {
        let err = PipelineError::completion(PipelineError::completion(
            PipelineError::status(409, "conflict"),
        ));
        assert_eq!(err.unwrap_completion().status_code(), 409);
    }

    #[test]
    fn test_unwrap_completion_without_cause() {
        let err = PipelineError::Completion {
            message: "lost".into(),
            cause: None,
        };
        assert!(matches!(
            err.unwrap_completion(),
            PipelineError::Completion { cause: None, .. }
        ));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(PipelineError::NotFound("/x".into()).status_code(), 404);
        assert_eq!(PipelineError::handler("x").status_code(), 500);
        assert_eq!(PipelineError::status(418, "teapot").status_code(), 418);
        assert_eq!(
            PipelineError::completion(PipelineError::status(400, "bad")).status_code(),
            400
        );
    }

    #[test]
    fn test_failure_keeps_primary() {
        let failure = Failure::new(PipelineError::handler("primary"))
            .with_suppressed(PipelineError::handler("secondary"));

        assert!(matches!(failure.error(), PipelineError::Handler(m) if m == "primary"));
        assert_eq!(failure.suppressed().len(), 1);
        assert_eq!(
            failure.to_string(),
            "handler error: primary (+1 suppressed)"
        );
    }

    #[test]
    fn test_from_panic_payload() {
        let payload: Box<dyn Any + Send> = Box::new("kaboom");
        assert!(matches!(
            PipelineError::from_panic(payload),
            PipelineError::Panic(m) if m == "kaboom"
        ));

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert!(matches!(
            PipelineError::from_panic(payload),
            PipelineError::Panic(m) if m == "owned"
        ));
    }

    #[tokio::test]
    async fn test_join_error_mapping() {
        let pending = tokio::spawn(std::future::pending::<()>());
        pending.abort();
        let err = PipelineError::from(pending.await.unwrap_err());
        assert!(matches!(err, PipelineError::Cancelled));
        assert_eq!(err.kind(), "cancelled");

        let panicked = tokio::spawn(async { panic!("joined") });
        let err = PipelineError::from(panicked.await.unwrap_err());
        assert!(matches!(err, PipelineError::Panic(m) if m == "joined"));
    }
}
