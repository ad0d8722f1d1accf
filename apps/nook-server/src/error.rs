use axum::http::StatusCode;
use thiserror::Error;

/// Why a connection was refused before the WebSocket upgrade completed.
/// Admission fails closed: the client learns a status code and nothing else.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("no token provided")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("account could not be resolved")]
    Directory(#[from] DirectoryError),
    #[error("account is not paired")]
    PartnerUnresolved,
}

impl AdmissionError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionError::MissingToken
            | AdmissionError::InvalidToken(_)
            | AdmissionError::Directory(_) => StatusCode::UNAUTHORIZED,
            AdmissionError::PartnerUnresolved => StatusCode::FORBIDDEN,
        }
    }
}

/// The backing room store was unreachable or returned garbage. Callers treat
/// a failing `get` as absence and a failing `put` as a logged no-op; this
/// error never crosses the dispatcher boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),
    #[error("stored room state is not decodable: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("directory request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Durable message/journal log failure. Loss of durability is logged, never
/// fatal to the live session.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("history payload is not decodable: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("push request failed: {0}")]
    Transport(#[from] reqwest::Error),
}
