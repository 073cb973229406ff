//! Error types for the runledger system.

/// Result type alias for runledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Main error type for the runledger system.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Storage layer errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database connection errors
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Not found errors
    #[error("Not found: {resource} with id {id}")]
    NotFound { resource: String, id: String },

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Record validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Wrapped anyhow errors for compatibility
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LedgerError {
    /// Create a new storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a new database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a new not found error
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    /// Create a new invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidInput(_))
    }

    /// Transient errors are worth retrying; data and validation errors are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = LedgerError::database("connection refused");
        assert!(matches!(err, LedgerError::Database(_)));
        assert!(err.is_transient());

        let err = LedgerError::validation("symbol cannot be empty");
        assert!(err.is_validation());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_not_found_display() {
        let err = LedgerError::not_found("analysis_run", "abc-123");
        assert_eq!(err.to_string(), "Not found: analysis_run with id abc-123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timeout_is_transient() {
        assert!(LedgerError::timeout("query exceeded 5s").is_transient());
        assert!(!LedgerError::storage("corrupt document").is_transient());
    }
}
