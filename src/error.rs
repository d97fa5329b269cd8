//! Gateway errors and their HTTP mapping

use actix_web::http::{header, StatusCode};
use actix_web::{HttpResponse, ResponseError};
use thiserror::Error;

use crate::autocontainer::RouteError;
use crate::storage::StorageError;

/// Non-standard status used when the client went away mid-request.
pub fn client_closed_request() -> StatusCode {
    StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("routing failed: {0}")]
    Routing(#[from] RouteError),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("content length required")]
    LengthRequired,
    #[error("object of {size} bytes exceeds the {limit} bytes limit")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported If-None-Match value '{0}'")]
    InvalidPrecondition(String),
    #[error("object not found")]
    NotFound,
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("etag mismatch: expected {expected}, computed {computed}")]
    EtagMismatch { expected: String, computed: String },
    #[error("unprocessable entity: {0}")]
    Unprocessable(String),
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,
    #[error("client disconnected: {0}")]
    ClientDisconnect(String),
    #[error("timed out reading from client")]
    ClientReadTimeout,
    #[error("timed out during transfer: {0}")]
    TransferTimeout(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Classify a backend failure raised while the object data is in flight.
    pub fn from_transfer(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(msg) => GatewayError::TransferTimeout(msg),
            StorageError::PreconditionFailed(_) => GatewayError::PreconditionFailed,
            StorageError::EtagMismatch(msg) => GatewayError::Unprocessable(msg),
            other => GatewayError::Internal(other.to_string()),
        }
    }

    /// Classify a backend failure raised by the upload path outside the data
    /// transfer itself (preparation and commit).
    pub fn from_upload(err: StorageError) -> Self {
        match err {
            StorageError::Timeout(msg) => GatewayError::TransferTimeout(msg),
            other => GatewayError::from(other),
        }
    }
}

impl From<StorageError> for GatewayError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) => GatewayError::NotFound,
            StorageError::PreconditionFailed(_) => GatewayError::PreconditionFailed,
            StorageError::EtagMismatch(msg) => GatewayError::Unprocessable(msg),
            StorageError::RangeNotSatisfiable(_) => GatewayError::RangeNotSatisfiable,
            StorageError::BadRequest(msg) => GatewayError::BadRequest(msg),
            StorageError::Timeout(msg) | StorageError::Unavailable(msg) => GatewayError::Unavailable(msg),
            StorageError::Io(msg) | StorageError::Internal(msg) => GatewayError::Internal(msg),
        }
    }
}

impl ResponseError for GatewayError {
    fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Routing(_) | GatewayError::BadRequest(_) | GatewayError::InvalidPrecondition(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            GatewayError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            GatewayError::EtagMismatch { .. } | GatewayError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            GatewayError::ClientDisconnect(_) | GatewayError::TransferTimeout(_) => client_closed_request(),
            GatewayError::ClientReadTimeout => StatusCode::REQUEST_TIMEOUT,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        // client errors explain themselves, server errors stay opaque
        let body = match self {
            GatewayError::Routing(_) | GatewayError::BadRequest(_) | GatewayError::InvalidPrecondition(_) => {
                self.to_string()
            }
            GatewayError::Internal(_) | GatewayError::Unavailable(_) => "An error occurred".to_string(),
            _ => status.canonical_reason().unwrap_or("Client Closed Request").to_string(),
        };
        HttpResponse::build(status)
            .insert_header((header::CONTENT_TYPE, "text/plain; charset=utf-8"))
            .body(body)
    }
}
