//! HTTP error mapping.

use crate::chain::error::{AddressError, LedgerError};
use crate::roles::error::AccessError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::{error, info, warn};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Wallet address required")]
    MissingAddress,

    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::InvalidKey => ApiError::Forbidden("Invalid emergency access key".to_string()),
            AccessError::InsufficientPermission { required } => {
                ApiError::Forbidden(format!("Insufficient permission: {} role required", required))
            }
            AccessError::Ledger(e) => ApiError::Ledger(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingAddress => StatusCode::UNAUTHORIZED,
            ApiError::InvalidAddress(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Ledger(e) => match e {
                LedgerError::CourseNotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::InsufficientPermission(_) => StatusCode::FORBIDDEN,
                LedgerError::NoSigner | LedgerError::Unavailable | LedgerError::Chain(_) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                _ => StatusCode::BAD_REQUEST,
            },
        }
    }

    /// Ledger rejections caused by contract rules rather than infrastructure.
    pub fn is_rule_violation(&self) -> bool {
        matches!(self, ApiError::Ledger(e) if e.is_domain())
    }

    fn message(&self) -> String {
        match self {
            ApiError::Ledger(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else if self.is_rule_violation() {
            info!("Request refused by contract rule: {}", self);
        } else {
            warn!("Request rejected ({}): {}", status.as_u16(), self);
        }

        (
            status,
            Json(json!({
                "success": false,
                "message": self.message(),
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::error::ChainError;
    use crate::roles::gate::Requirement;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingAddress.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(AccessError::InvalidKey).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(AccessError::InsufficientPermission {
                required: Requirement::Admin
            })
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(LedgerError::AlreadyAttended).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(LedgerError::CourseNotFound(3)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(AccessError::Ledger(LedgerError::Unavailable)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LedgerError::Chain(ChainError::NotConnected)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_rule_violations_are_ledger_domain_errors() {
        assert!(ApiError::from(LedgerError::AlreadyRegistered).is_rule_violation());
        assert!(ApiError::from(LedgerError::CourseNotFound(1)).is_rule_violation());
        assert!(!ApiError::from(LedgerError::NoSigner).is_rule_violation());
        assert!(!ApiError::BadRequest("Course name is required".to_string()).is_rule_violation());
    }
}
