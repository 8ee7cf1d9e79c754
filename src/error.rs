//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and a stable, machine-readable error
//! code in the JSON error envelope.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": "ClientError",
///     "message": "Requested lease has a desired expiry date less than today: 1700000000"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with a short code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// One of `ClientError`, `ServerError`, `NotFound`, `Unauthorized`.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// Server-side error enum with HTTP status code mapping.
///
/// | Variant              | Code           | HTTP Status |
/// |----------------------|----------------|-------------|
/// | `ClientError`        | `ClientError`  | 400         |
/// | `NotFound`           | `NotFound`     | 404         |
/// | `Unauthorized`       | `Unauthorized` | 401         |
/// | `Conflict`           | `ClientError`  | 409         |
/// | `ServiceUnavailable` | `ServerError`  | 503         |
/// | `Internal`           | `ServerError`  | 500         |
/// | `Persistence`        | `ServerError`  | 500         |
/// | `Multi`              | `ServerError`  | 500         |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed input or a failed request precondition.
    #[error("{0}")]
    ClientError(String),

    /// The requested resource does not exist.
    #[error("{resource} {id} not found")]
    NotFound {
        /// Resource kind (e.g. `"lease"`).
        resource: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The caller may not perform the operation.
    #[error("{0}")]
    Unauthorized(String),

    /// A state-transition precondition failed.
    #[error("{0}")]
    Conflict(String),

    /// No capacity is currently available to satisfy the request.
    #[error("{0}")]
    ServiceUnavailable(String),

    /// A system invariant is broken or a downstream call failed.
    ///
    /// Only `message` is returned to callers; `cause` is logged.
    #[error("{message}")]
    Internal {
        /// Summary safe to return to callers.
        message: String,
        /// Underlying failure detail.
        cause: String,
    },

    /// Store failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Aggregate of independent failures from a batch operation.
    #[error("{message}: {}", DisplayErrors(.errors))]
    Multi {
        /// Summary of the batch operation that failed.
        message: String,
        /// Every collected failure, in processing order.
        errors: Vec<GatewayError>,
    },
}

impl GatewayError {
    /// Builds an [`GatewayError::Internal`] from a summary and any displayable cause.
    #[must_use]
    pub fn internal(message: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Internal {
            message: message.into(),
            cause: cause.to_string(),
        }
    }

    /// Builds a [`GatewayError::NotFound`] for the given resource kind and ID.
    #[must_use]
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource,
            id: id.into(),
        }
    }

    /// Wraps collected batch failures, or returns `Ok` when there are none.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Multi`] when `errors` is non-empty.
    pub fn collect(message: impl Into<String>, errors: Vec<GatewayError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Multi {
                message: message.into(),
                errors,
            })
        }
    }

    /// Returns `true` for [`GatewayError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the stable error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ClientError(_) | Self::Conflict(_) => "ClientError",
            Self::NotFound { .. } => "NotFound",
            Self::Unauthorized(_) => "Unauthorized",
            Self::ServiceUnavailable(_)
            | Self::Internal { .. }
            | Self::Persistence(_)
            | Self::Multi { .. } => "ServerError",
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientError(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } | Self::Persistence(_) | Self::Multi { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message returned to the caller. Store and batch details stay in the logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Persistence(_) => "Internal server error".to_string(),
            Self::Multi { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

struct DisplayErrors<'a>(&'a [GatewayError]);

impl fmt::Display for DisplayErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Internal { message, cause } => {
                tracing::error!(%message, %cause, "internal error");
            }
            Self::Persistence(_) | Self::Multi { .. } => {
                tracing::error!(error = %self, "request failed");
            }
            _ => {}
        }
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.public_message(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
