use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed book file: {0}")]
    MalformedBook(String),

    #[error("book has no usable paragraphs: {0}")]
    EmptyBook(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("no book files found in {0}")]
    NoBooks(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("invalid embedding endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("invalid embedding credentials: {0}")]
    Credentials(String),

    #[error("http client build failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid response from {backend} ({status}): {details}")]
    BackendResponse {
        backend: String,
        status: u16,
        details: String,
    },

    #[error("store retries exhausted after {attempts} attempts: {details}")]
    RetriesExhausted { attempts: u32, details: String },

    #[error("store write cancelled")]
    Cancelled,
}

impl StoreError {
    /// Transient failures are worth another attempt; everything else is
    /// surfaced immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Http(_) => true,
            StoreError::BackendResponse { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            StoreError::Url(_)
            | StoreError::Serialization(_)
            | StoreError::RetriesExhausted { .. }
            | StoreError::Cancelled => false,
        }
    }
}

pub type Result<T, E = SourceError> = std::result::Result<T, E>;
