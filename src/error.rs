use thiserror::Error;

/// The failure category of a [`DaoError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or incomplete declarations, detected when binding or looking up a driver.
    Configuration,
    /// Call-time argument count mismatch.
    Arity,
    /// Placeholder or parameter problems while materializing a statement.
    Template,
    /// The bound validator refused the statement; nothing was executed.
    ValidationRejected,
    /// Converting a result into a typed value failed.
    Extraction,
    /// The backend boundary reported a failure.
    Backend,
}

/// Error type for daobind operations
#[derive(Debug, Error)]
pub enum DaoError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("No driver registered for type '{0}'")]
    NoDriver(String),

    #[error("Method '{method}' expects {expected} argument(s), got {actual}")]
    Arity {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Method '{method}': placeholder {{{placeholder}}} not found in template")]
    MissingPlaceholder { method: String, placeholder: String },

    #[error("Method '{method}': placeholder {{{placeholder}}} was left unresolved")]
    UnresolvedPlaceholder { method: String, placeholder: String },

    #[error("Method '{method}': parameter '{param}' has unsupported kind {kind}")]
    UnsupportedParamKind {
        method: String,
        param: String,
        kind: &'static str,
    },

    #[error("Method '{method}': parameter '{param}' expects a {expected} argument, got {actual}")]
    ArgumentKind {
        method: String,
        param: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Method '{method}': statement rejected by validator")]
    ValidationRejected { method: String, statement: String },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Expected {expected} row(s), got {actual}")]
    UnexpectedRowCount { expected: usize, actual: usize },

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

impl DaoError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DaoError::Configuration(_) | DaoError::UnknownMethod(_) | DaoError::NoDriver(_) => {
                ErrorKind::Configuration
            }
            DaoError::Arity { .. } => ErrorKind::Arity,
            DaoError::MissingPlaceholder { .. }
            | DaoError::UnresolvedPlaceholder { .. }
            | DaoError::UnsupportedParamKind { .. }
            | DaoError::ArgumentKind { .. } => ErrorKind::Template,
            DaoError::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            DaoError::Extraction(_)
            | DaoError::ColumnNotFound(_)
            | DaoError::UnexpectedRowCount { .. } => ErrorKind::Extraction,
            DaoError::ConnectionFailed(_) | DaoError::QueryFailed(_) => ErrorKind::Backend,
        }
    }
}

/// Result type alias for daobind operations
pub type Result<T> = std::result::Result<T, DaoError>;
