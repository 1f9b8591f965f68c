use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum FtsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Corrupt segment {file}: {reason}")]
    Corrupt { file: String, reason: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation not supported by {driver} driver: {operation}")]
    Unsupported {
        driver: &'static str,
        operation: &'static str,
    },

    #[error("Operation cancelled after {indexed} documents")]
    Cancelled { indexed: usize },

    #[error("Index is sealed - no further writes accepted")]
    Sealed,

    #[error("Driver is closed")]
    Closed,

    #[error("Index error: {0}")]
    IndexError(String),
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, FtsError>;

impl FtsError {
    pub(crate) fn corrupt(file: impl Into<String>, reason: impl Into<String>) -> Self {
        FtsError::Corrupt {
            file: file.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, FtsError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FtsError::Unsupported {
            driver: "mmap",
            operation: "add_document",
        };
        assert_eq!(
            err.to_string(),
            "Operation not supported by mmap driver: add_document"
        );

        let err = FtsError::corrupt("seg_1_0_3.fts", "bad magic");
        assert_eq!(err.to_string(), "Corrupt segment seg_1_0_3.fts: bad magic");
    }

    #[test]
    fn test_retriable_errors() {
        let io = FtsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(io.is_retriable());
        assert!(!FtsError::Sealed.is_retriable());
        assert!(!FtsError::Cancelled { indexed: 3 }.is_retriable());
    }
}
