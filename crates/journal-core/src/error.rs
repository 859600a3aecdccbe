use thiserror::Error;

/// Top-level error type for the journal retrieval and clustering engine.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for JournalError` so that `?` works across crate
/// boundaries. `Config` and `DimensionMismatch` together form the
/// configuration-error class: both mean the stored vectors and the embedding
/// provider disagree about shape, or a caller passed an unusable parameter.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JournalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl JournalError {
    /// True for errors caused by inconsistent shapes or bad parameters.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            JournalError::Config(_) | JournalError::DimensionMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for JournalError {
    fn from(err: toml::de::Error) -> Self {
        JournalError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for JournalError {
    fn from(err: toml::ser::Error) -> Self {
        JournalError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for JournalError {
    fn from(err: serde_json::Error) -> Self {
        JournalError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for journal engine operations.
pub type Result<T> = std::result::Result<T, JournalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = JournalError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");
    }

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(JournalError, &str)> = vec![
            (
                JournalError::Config("top_k must be > 0".to_string()),
                "Configuration error: top_k must be > 0",
            ),
            (
                JournalError::DimensionMismatch {
                    expected: 384,
                    actual: 768,
                },
                "Dimension mismatch: expected 384, got 768",
            ),
            (
                JournalError::IndexUnavailable("no CURRENT file".to_string()),
                "Index unavailable: no CURRENT file",
            ),
            (
                JournalError::EmbeddingProvider("model offline".to_string()),
                "Embedding provider error: model offline",
            ),
            (
                JournalError::InsufficientData("no entries".to_string()),
                "Insufficient data: no entries",
            ),
            (
                JournalError::InvalidEntry("blank text".to_string()),
                "Invalid entry: blank text",
            ),
            (
                JournalError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_configuration_class() {
        assert!(JournalError::Config("x".into()).is_configuration());
        assert!(JournalError::DimensionMismatch {
            expected: 2,
            actual: 3
        }
        .is_configuration());
        assert!(!JournalError::IndexUnavailable("x".into()).is_configuration());
        assert!(!JournalError::EmbeddingProvider("x".into()).is_configuration());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: JournalError = io_err.into();
        assert!(matches!(err, JournalError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let journal_err: JournalError = err.unwrap_err().into();
        assert!(matches!(journal_err, JournalError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let journal_err: JournalError = err.unwrap_err().into();
        assert!(matches!(journal_err, JournalError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let _value = io_result?;
            Ok("success".to_string())
        }

        assert_eq!(inner().unwrap(), "success");
    }
}
