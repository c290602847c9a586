//! HTTP mapping of authorization outcomes
//!
//! Denials render as 403 with the full diagnostic body; every other error
//! renders as `{message}` with a status matching its kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::error::AuthzError;

/// Body for every non-denial error
#[derive(Debug, Serialize)]
struct MessageBody {
    message: String,
}

impl AuthzError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::PermissionDenied(_) | Self::SystemRoleProtected(_) => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::CircularHierarchy { .. } | Self::RoleInUse { .. } | Self::Conflict { .. } => {
                StatusCode::CONFLICT
            }
            Self::Validation(_) | Self::HierarchyTooDeep { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Serialization(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match self {
            Self::PermissionDenied(body) => (status, Json(*body)).into_response(),
            Self::Unauthenticated => (
                status,
                Json(MessageBody {
                    message: "Unauthenticated.".to_string(),
                }),
            )
                .into_response(),
            other => (
                status,
                Json(MessageBody {
                    message: other.to_string(),
                }),
            )
                .into_response(),
        }
    }
}
