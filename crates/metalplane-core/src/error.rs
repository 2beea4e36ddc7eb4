// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for metalplane-core.

use thiserror::Error;

/// Result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by the store and the status lifecycles.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A row that must exist for the write was not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind.
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// A status change is not allowed by the lifecycle table.
    #[error("invalid {entity} status transition from {from} to {to}")]
    InvalidTransition {
        /// Entity kind.
        entity: &'static str,
        /// Current status.
        from: &'static str,
        /// Requested status.
        to: &'static str,
    },

    /// The transaction was already finished.
    #[error("transaction already finished")]
    Finished,
}

impl StoreError {
    /// Stable machine-readable code, useful in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::Migration(_) => "MIGRATION_ERROR",
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::InvalidTransition { .. } => "INVALID_TRANSITION",
            StoreError::Finished => "TRANSACTION_FINISHED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_display() {
        let err = StoreError::InvalidTransition {
            entity: "instance",
            from: "Terminated",
            to: "Terminating",
        };
        assert_eq!(
            err.to_string(),
            "invalid instance status transition from Terminated to Terminating"
        );
        assert_eq!(err.error_code(), "INVALID_TRANSITION");
    }

    #[test]
    fn test_not_found_display() {
        let err = StoreError::NotFound {
            entity: "machine",
            id: "m-1".to_string(),
        };
        assert_eq!(err.to_string(), "machine not found: m-1");
    }
}
