use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrawlGraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Malformed resume cursor: {0}")]
    MalformedCursor(String),

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
