//! Error types for the full-text indexer.

use thiserror::Error;

/// Unified error type for domain-level operations.
#[derive(Debug, Error)]
pub enum FtsError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity type string that maps to no known kind
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FtsError::UnknownEntityType("Widget".to_string());
        assert_eq!(err.to_string(), "Unknown entity type: Widget");

        let err = FtsError::Config("missing index_path".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing index_path");
    }
}
