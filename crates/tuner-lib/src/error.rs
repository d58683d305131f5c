//! Error types for the tuning pipeline

use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, TunerError>;

/// Errors raised while building, serializing or emitting region models.
#[derive(Debug, Error)]
pub enum TunerError {
    /// A tree has a dangling child reference, a cycle, or an empty arena
    #[error("Malformed tree: {0}")]
    MalformedTree(String),

    /// A rule references a feature missing from the schema
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// A leaf predicts a class index with no entry in the class list
    #[error("Class index {index} out of range ({available} classes)")]
    UnknownClass { index: usize, available: usize },

    /// A predicted class has no execution-policy expression
    #[error("No execution policy mapped for class '{0}'")]
    UnmappedClass(String),

    /// A class name cannot be read as the numeric value a decision kind needs
    #[error("Class '{class}' is not a valid {kind} value")]
    InvalidClassValue { class: String, kind: &'static str },

    /// Training error
    #[error("Training error: {0}")]
    Training(String),

    /// Telemetry source error
    #[error("Telemetry error: {0}")]
    Telemetry(String),

    /// Publish channel error
    #[error("Publish error: {0}")]
    Publish(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunerError {
    /// Create a malformed tree error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedTree(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = TunerError::UnknownClass {
            index: 4,
            available: 2,
        };
        assert_eq!(err.to_string(), "Class index 4 out of range (2 classes)");

        let err = TunerError::malformed("node 3 has no right child");
        assert!(err.to_string().contains("node 3"));
    }

    #[test]
    fn test_from_serde_error() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: TunerError = parse.unwrap_err().into();
        assert!(matches!(err, TunerError::Serialization(_)));
    }
}
