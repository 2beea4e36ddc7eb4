// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance handlers.

use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use uuid::Uuid;

use super::{AppState, DELETION_ACCEPTED, parse_json, parse_optional_json, run_detached};
use crate::coordinator::InstanceRecord;
use crate::error::Result;
use crate::request::{InstanceCreateRequest, InstanceDeleteRequest, InstanceUpdateRequest};

/// `POST /v2/org/{org}/carbide/instance`
pub async fn create(
    State(state): State<AppState>,
    Path(org): Path<String>,
    headers: HeaderMap,
    payload: std::result::Result<Json<InstanceCreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InstanceRecord>)> {
    state.authorize(&org, &headers).await?;
    let request = parse_json(payload)?;

    let coordinator = state.coordinator.clone();
    let record = run_detached(move |cancel| async move {
        coordinator.create_instance(&org, request, &cancel).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PATCH /v2/org/{org}/carbide/instance/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    payload: std::result::Result<Json<InstanceUpdateRequest>, JsonRejection>,
) -> Result<Json<InstanceRecord>> {
    state.authorize(&org, &headers).await?;
    let request = parse_json(payload)?;

    let coordinator = state.coordinator.clone();
    let record = run_detached(move |cancel| async move {
        coordinator.update_instance(&org, id, request, &cancel).await
    })
    .await?;
    Ok(Json(record))
}

/// `DELETE /v2/org/{org}/carbide/instance/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    state.authorize(&org, &headers).await?;
    let request: InstanceDeleteRequest = parse_optional_json(&body)?;

    let coordinator = state.coordinator.clone();
    run_detached(move |cancel| async move {
        coordinator.delete_instance(&org, id, request, &cancel).await
    })
    .await?;
    Ok((StatusCode::ACCEPTED, DELETION_ACCEPTED))
}
