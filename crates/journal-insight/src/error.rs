use journal_core::error::JournalError;
use thiserror::Error;

/// Errors that can occur in the insight pipeline.
#[derive(Error, Debug)]
pub enum InsightError {
    /// Embedding and validation failures from the core, passed through as-is.
    #[error(transparent)]
    Core(#[from] JournalError),
    #[error("config error: {0}")]
    Config(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
}

impl From<InsightError> for JournalError {
    fn from(err: InsightError) -> Self {
        match err {
            InsightError::Core(inner) => inner,
            InsightError::Config(msg) => JournalError::Config(msg),
            InsightError::InsufficientData(msg) => JournalError::InsufficientData(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_config() {
        let e = InsightError::Config("k must be > 0".to_string());
        assert_eq!(e.to_string(), "config error: k must be > 0");
    }

    #[test]
    fn test_error_display_insufficient_data() {
        let e = InsightError::InsufficientData("no entries in window".to_string());
        assert_eq!(e.to_string(), "insufficient data: no entries in window");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let e: InsightError = JournalError::EmbeddingProvider("model offline".into()).into();
        assert_eq!(e.to_string(), "Embedding provider error: model offline");
        assert!(matches!(
            JournalError::from(e),
            JournalError::EmbeddingProvider(_)
        ));
    }

    #[test]
    fn test_into_journal_error() {
        let e = JournalError::from(InsightError::Config("bad".into()));
        assert!(e.is_configuration());
        let e = JournalError::from(InsightError::InsufficientData("none".into()));
        assert!(matches!(e, JournalError::InsufficientData(_)));
    }
}
