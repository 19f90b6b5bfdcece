// SPDX-License-Identifier: BUSL-1.1

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced across the dispatch HTTP API.
///
/// The printer protocol (`/cloudprnt`) deliberately does not use most of
/// these — by design it resolves unknown tokens and bad codes to tolerant
/// 200/404 responses rather than an error envelope. This type exists for the
/// intake and query surfaces, where synchronous validation failures are
/// expected and must be reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchError {
    BadRequest,
    UnknownTenant,
    UnsupportedMediaType,
    NotFound,
    Internal,
}

impl DispatchError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::UnknownTenant => 404,
            Self::UnsupportedMediaType => 415,
            Self::NotFound => 404,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::UnknownTenant => "UNKNOWN_TENANT",
            Self::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { ok: false, error: message.into(), code: self.as_str().to_owned() }
    }

    pub fn to_http_response(self, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_error_body(message)))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error body returned by the intake and query surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub ok: bool,
    pub error: String,
    pub code: String,
}
