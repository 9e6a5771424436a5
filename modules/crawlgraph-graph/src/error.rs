use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity failure; worth retrying.
    #[error("Graph unavailable: {0}")]
    Unavailable(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Sync queue error: {0}")]
    Queue(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<neo4rs::Error> for StoreError {
    fn from(err: neo4rs::Error) -> Self {
        match err {
            neo4rs::Error::IOError { .. } | neo4rs::Error::ConnectionError => {
                StoreError::Unavailable(err.to_string())
            }
            other => {
                let msg = other.to_string();
                let lower = msg.to_lowercase();
                if lower.contains("serviceunavailable")
                    || lower.contains("connection refused")
                    || lower.contains("broken pipe")
                {
                    StoreError::Unavailable(msg)
                } else {
                    StoreError::Query(msg)
                }
            }
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Queue(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Queue(err.to_string())
    }
}
