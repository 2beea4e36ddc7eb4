// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error responses.

use axum::Json;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::ApiError;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(source) => error!(error = %source, "Data store failure"),
            ApiError::Desync(message) => error!(message = %message, "Cloud and Site may be de-synced"),
            ApiError::Internal(message) | ApiError::Timeout(message) => {
                error!(message = %message, "Request failed")
            }
            other => warn!(code = other.code(), message = %other, "Request rejected"),
        }

        let status = self.status();
        let body = ErrorBody {
            code: self.code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
