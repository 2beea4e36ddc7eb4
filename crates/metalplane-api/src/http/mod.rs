// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP surface.
//!
//! Handlers are thin: authorize the caller for the org, parse the body, run
//! the coordinator operation on its own task and render the result. The task
//! is cancelled through a drop guard when the client goes away, which the
//! coordinator treats like a workflow deadline.

mod error;
pub mod instance;
pub mod vpc;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::coordinator::Coordinator;
use crate::error::{ApiError, Result};

/// Header carrying the authenticated principal, set by the auth proxy.
pub const PRINCIPAL_HEADER: &str = "x-forwarded-user";

/// Decides whether a principal may act within an org.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Return `Forbidden` when `principal` may not act for `org`.
    async fn authorize(&self, org: &str, principal: Option<&str>) -> Result<()>;
}

/// Authorizer for deployments fronted by an authenticating proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl Authorizer for AllowAll {
    async fn authorize(&self, _org: &str, _principal: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Provisioning coordinator.
    pub coordinator: Coordinator,
    /// Org access check.
    pub authorizer: Arc<dyn Authorizer>,
}

impl AppState {
    /// State with the given coordinator and [`AllowAll`].
    pub fn new(coordinator: Coordinator) -> Self {
        Self {
            coordinator,
            authorizer: Arc::new(AllowAll),
        }
    }

    /// Replace the authorizer.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    async fn authorize(&self, org: &str, headers: &HeaderMap) -> Result<()> {
        let principal = headers
            .get(PRINCIPAL_HEADER)
            .and_then(|value| value.to_str().ok());
        self.authorizer.authorize(org, principal).await
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v2/org/{org}/carbide/instance", post(instance::create))
        .route(
            "/v2/org/{org}/carbide/instance/{id}",
            patch(instance::update).delete(instance::delete),
        )
        .route("/v2/org/{org}/carbide/vpc", post(vpc::create))
        .route(
            "/v2/org/{org}/carbide/vpc/{id}",
            patch(vpc::update).delete(vpc::delete),
        )
        .route(
            "/v2/org/{org}/carbide/vpc/{id}/virtualization",
            patch(vpc::update_virtualization),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Plain-text body returned for accepted deletions.
const DELETION_ACCEPTED: &str = "Deletion request was accepted";

fn parse_json<T>(payload: std::result::Result<Json<T>, JsonRejection>) -> Result<T> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        ApiError::validation(format!(
            "Failed to parse request data: {}",
            rejection.body_text()
        ))
    })
}

/// Parse an optional JSON body; an empty body gives the default.
fn parse_optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::validation(format!("Failed to parse request data: {e}")))
}

/// Run a coordinator operation on its own task.
///
/// The token is cancelled when the returned future is dropped, which is what
/// happens when the client disconnects.
async fn run_detached<F, Fut, T>(work: F) -> Result<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    match tokio::spawn(work(cancel)).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Provisioning task failed to complete");
            Err(ApiError::internal("Failed to process request"))
        }
    }
}
