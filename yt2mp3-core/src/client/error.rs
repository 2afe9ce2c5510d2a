use std::path::PathBuf;

use thiserror::Error;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service error{}: {message}", status.map(|code| format!(" ({code})")).unwrap_or_default())]
    Service {
        status: Option<u16>,
        message: String,
    },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("unknown format key: {0}")]
    UnknownFormat(String),
}

impl ClientError {
    pub fn service(message: impl Into<String>) -> Self {
        ClientError::Service {
            status: None,
            message: message.into(),
        }
    }
}
