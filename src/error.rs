use reqwest::StatusCode;
use thiserror::Error;

/// JSON-RPC error code for invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// JSON-RPC error code for unknown methods and unsupported operations.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code for internal failures.
pub const INTERNAL_ERROR: i64 = -32603;
/// Server-defined error code for upstream failures.
pub const UPSTREAM_ERROR: i64 = -32000;
/// Error code for requests cancelled by the caller.
pub const REQUEST_CANCELLED: i64 = -32800;

/// Errors surfaced by tool handlers and everything they call.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("parameter {0:?} is required")]
    MissingRequired(String),

    #[error("parameter {0:?} cannot be null or empty")]
    NullOrEmpty(String),

    #[error("parameter {key:?} has type {got}, want {want}")]
    TypeMismatch {
        key: String,
        got: String,
        want: String,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("upstream returned {status} {}: {body}", reason(.status))]
    Upstream { status: u16, body: String },

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ToolError>,
    },
}

fn reason(status: &u16) -> &'static str {
    match *status {
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        other => StatusCode::from_u16(other)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unexpected Status"),
    }
}

impl ToolError {
    pub fn type_mismatch(key: &str, got: impl Into<String>, want: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.to_string(),
            got: got.into(),
            want: want.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// The innermost error beneath any context layers.
    pub fn root(&self) -> &ToolError {
        let mut err = self;
        while let ToolError::Context { source, .. } = err {
            err = source.as_ref();
        }
        err
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self.root() {
            ToolError::MissingRequired(_)
            | ToolError::NullOrEmpty(_)
            | ToolError::TypeMismatch { .. }
            | ToolError::InvalidArgument(_) => INVALID_PARAMS,
            ToolError::Unimplemented(_) => METHOD_NOT_FOUND,
            ToolError::Cancelled => REQUEST_CANCELLED,
            ToolError::Upstream { .. } | ToolError::Transport(_) => UPSTREAM_ERROR,
            ToolError::Internal(_) | ToolError::Context { .. } => INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Internal(format!("json: {e}"))
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ToolError::Internal(format!("failed to decode upstream response: {e}"))
        } else {
            ToolError::Transport(e.to_string())
        }
    }
}

/// Adds a contextual prefix to an error while keeping its root variant.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T, ToolError>;

    fn with_context<F, S>(self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E: Into<ToolError>> ResultExt<T> for Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T, ToolError> {
        self.map_err(|e| ToolError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }

    fn with_context<F, S>(self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| ToolError::Context {
            context: f().into(),
            source: Box::new(e.into()),
        })
    }
}
