use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Image decode error: {0}")]
    Decode(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Image source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Index backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model download error: {0}")]
    ModelDownload(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    /// HTTP-equivalent status for the service boundary
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::InvalidArgument(_) | SearchError::Decode(_) => 400,
            SearchError::SourceUnavailable(_) => 502,
            SearchError::BackendUnavailable(_) | SearchError::Database(_) => 503,
            _ => 500,
        }
    }

    /// Message safe to return across the service boundary.
    ///
    /// Caller-caused failures keep their text; backend and internal failures are
    /// reduced to a generic message so connection strings, paths and model internals
    /// stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            SearchError::InvalidArgument(_)
            | SearchError::Decode(_)
            | SearchError::SourceUnavailable(_) => self.to_string(),
            SearchError::BackendUnavailable(_) | SearchError::Database(_) => {
                "Search index is currently unavailable".to_string()
            }
            _ => "Internal error while processing the search".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(SearchError::InvalidArgument("top_k".into()).status_code(), 400);
        assert_eq!(SearchError::Decode("bad png".into()).status_code(), 400);
        assert_eq!(SearchError::SourceUnavailable("timeout".into()).status_code(), 502);
        assert_eq!(SearchError::BackendUnavailable("down".into()).status_code(), 503);
        assert_eq!(
            SearchError::DimensionMismatch {
                expected: 512,
                actual: 3
            }
            .status_code(),
            500
        );
    }

    #[test]
    fn test_public_message_hides_backend_details() {
        let err = SearchError::BackendUnavailable("postgres://admin:secret@db".into());
        assert!(!err.public_message().contains("secret"));

        let err = SearchError::Model("CUDA_ERROR_OUT_OF_MEMORY at 0x7f".into());
        assert!(!err.public_message().contains("CUDA"));

        let err = SearchError::InvalidArgument("top_k must be positive".into());
        assert!(err.public_message().contains("top_k must be positive"));
    }
}
