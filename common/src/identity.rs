//! Caller identity for the intent layer. The platform in front of this
//! service is responsible for authentication; requests arrive carrying
//! an already-verified `X-User-Id` header. No authentication happens
//! here — a missing header is trusted as the anonymous `default` caller
//! rather than rejected.

use axum::{extract::FromRequestParts, http::request::Parts};
use std::convert::Infallible;

pub const HEADER: &str = "x-user-id";
pub const DEFAULT_IDENTITY: &str = "default";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity(pub String);

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_IDENTITY);
        Ok(Identity(value.to_string()))
    }
}
