use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported link: {0}")]
    UnsupportedLink(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Failure causes of a single acquisition run.
///
/// All of them are recoverable through a retry; they are carried inside
/// `AcquisitionState::Error` / `AcquisitionState::Timeout` rather than returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("{0}")]
    Extraction(String),

    #[error("content not available; may require login or be a non-video post")]
    NotSupported,

    #[error("download failed: {0}")]
    Download(String),

    #[error("timed out waiting for the video link")]
    Timeout,
}

impl AcquisitionError {
    pub fn is_retryable(&self) -> bool {
        match self {
            AcquisitionError::Extraction(_)
            | AcquisitionError::NotSupported
            | AcquisitionError::Download(_)
            | AcquisitionError::Timeout => true,
        }
    }
}
