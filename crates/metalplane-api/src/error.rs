// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for metalplane-api.
//!
//! Every coordinator failure is one [`ApiError`] variant. The variant decides
//! the HTTP status and the stable error code; the message is always safe to
//! return to clients. Store failures keep their source for logging but render
//! a fixed message.

use axum::http::StatusCode;
use metalplane_core::error::StoreError;
use thiserror::Error;

/// Result type using [`ApiError`].
pub type Result<T> = std::result::Result<T, ApiError>;

/// Coordinator and request errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ApiError {
    /// Malformed or inconsistent request data.
    #[error("{0}")]
    Validation(String),

    /// A referenced resource exists but cannot be used here.
    #[error("{0}")]
    ResourceNotEligible(String),

    /// The instance type or machine lacks a required capability.
    #[error("{0}")]
    CapabilityMissing(String),

    /// No machine of the requested type is free.
    #[error("{0}")]
    NoMachineAvailable(String),

    /// The addressed entity does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Caller may not act on the entity.
    #[error("{0}")]
    Forbidden(String),

    /// Tenant has no allocation at the site.
    #[error("{0}")]
    NoAllocation(String),

    /// Tenant used up every constraint for the instance type.
    #[error("{0}")]
    CapacityExceeded(String),

    /// Name clash, lost race for a lock, or a state that forbids the change.
    #[error("{0}")]
    Conflict(String),

    /// Allocations exist but none constrain the instance type.
    #[error("{0}")]
    NoConstraint(String),

    /// Remote workflow timed out and was terminated.
    #[error("{0}")]
    Timeout(String),

    /// Remote workflow timed out and could not be terminated.
    #[error("{0}")]
    Desync(String),

    /// Remote workflow failed with a site-reported error.
    #[error("{message}")]
    Remote {
        /// Status derived from the site error type.
        status: StatusCode,
        /// Client message.
        message: String,
    },

    /// Unexpected failure with a client-safe message.
    #[error("{0}")]
    Internal(String),

    /// Store failure; the source is logged, never returned.
    #[error("Failed to access data store")]
    Store(#[from] StoreError),
}

impl ApiError {
    /// Convenience constructor for [`ApiError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::Validation(message.into())
    }

    /// Convenience constructor for [`ApiError::Forbidden`].
    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    /// Convenience constructor for [`ApiError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Internal(message.into())
    }

    /// HTTP status for the response.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::ResourceNotEligible(_)
            | ApiError::CapabilityMissing(_)
            | ApiError::NoMachineAvailable(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) | ApiError::NoAllocation(_) | ApiError::CapacityExceeded(_) => {
                StatusCode::FORBIDDEN
            }
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Remote { status, .. } => *status,
            ApiError::NoConstraint(_)
            | ApiError::Timeout(_)
            | ApiError::Desync(_)
            | ApiError::Internal(_)
            | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "INVALID_REQUEST",
            ApiError::ResourceNotEligible(_) => "RESOURCE_NOT_ELIGIBLE",
            ApiError::CapabilityMissing(_) => "CAPABILITY_MISSING",
            ApiError::NoMachineAvailable(_) => "NO_MACHINE_AVAILABLE",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NoAllocation(_) => "NO_ALLOCATION",
            ApiError::CapacityExceeded(_) => "CAPACITY_EXCEEDED",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::NoConstraint(_) => "NO_CONSTRAINT",
            ApiError::Timeout(_) => "WORKFLOW_TIMEOUT",
            ApiError::Desync(_) => "SITE_DESYNC",
            ApiError::Remote { .. } => "WORKFLOW_FAILED",
            ApiError::Internal(_) => "INTERNAL",
            ApiError::Store(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::validation("x").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::CapacityExceeded("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NoConstraint("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Remote {
                status: StatusCode::NOT_FOUND,
                message: "gone".into()
            }
            .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_error_message_is_opaque() {
        let err = ApiError::from(StoreError::NotFound {
            entity: "instance",
            id: "secret-row".into(),
        });
        assert_eq!(err.to_string(), "Failed to access data store");
        assert_eq!(err.code(), "INTERNAL");
    }
}
