use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found")]
    NotFound,

    #[error("read-only entry cannot be replaced")]
    ReadOnlyEntry,

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("limit reached: {0}")]
    TooManyRequests(String),

    #[error("stream rendezvous timed out")]
    RendezvousTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ServerError::NotFound => (StatusCode::NOT_FOUND, "not found".to_string()),
            ServerError::ReadOnlyEntry => (
                StatusCode::METHOD_NOT_ALLOWED,
                "entry is read-only".to_string(),
            ),
            ServerError::PayloadTooLarge => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload too large".to_string(),
            ),
            ServerError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            ServerError::RendezvousTimeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "stream rendezvous timed out".to_string(),
            ),
            ServerError::Io(err) => {
                tracing::error!("io error while handling request: {}", err);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
            ServerError::Internal(msg) => {
                tracing::error!("internal error while handling request: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
