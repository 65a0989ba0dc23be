use axum::response::{IntoResponse, Response};
use store_common::response;
use thiserror::Error;

/// Error kinds the intent layer surfaces to callers. Validation and
/// conflict errors are never stored against the resource; everything
/// else maps to a 5xx and is logged.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("store {0} already exists under a different owner")]
    Conflict(String),

    #[error("store {0} not found")]
    NotFound(String),

    #[error("caller is not permitted to access store {0}")]
    Forbidden(String),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match &self {
            Error::Validation(_) => response::bad_request(anyhow::anyhow!(self.to_string())),
            Error::Conflict(_) => response::conflict(anyhow::anyhow!(self.to_string())),
            Error::NotFound(_) => response::not_found(anyhow::anyhow!(self.to_string())),
            Error::Forbidden(_) => response::forbidden(anyhow::anyhow!(self.to_string())),
            Error::Kube(e) => response::internal_server_error(anyhow::anyhow!(e.to_string())),
        }
    }
}
