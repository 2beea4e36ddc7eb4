// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! VPC handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use uuid::Uuid;

use super::{AppState, DELETION_ACCEPTED, parse_json, run_detached};
use crate::coordinator::VpcRecord;
use crate::error::Result;
use crate::request::{VpcCreateRequest, VpcUpdateRequest, VpcVirtualizationUpdateRequest};

/// `POST /v2/org/{org}/carbide/vpc`
pub async fn create(
    State(state): State<AppState>,
    Path(org): Path<String>,
    headers: HeaderMap,
    payload: std::result::Result<Json<VpcCreateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<VpcRecord>)> {
    state.authorize(&org, &headers).await?;
    let request = parse_json(payload)?;

    let coordinator = state.coordinator.clone();
    let record = run_detached(move |cancel| async move {
        coordinator.create_vpc(&org, request, &cancel).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `PATCH /v2/org/{org}/carbide/vpc/{id}`
pub async fn update(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    payload: std::result::Result<Json<VpcUpdateRequest>, JsonRejection>,
) -> Result<Json<VpcRecord>> {
    state.authorize(&org, &headers).await?;
    let request = parse_json(payload)?;

    let coordinator = state.coordinator.clone();
    let record = run_detached(move |cancel| async move {
        coordinator.update_vpc(&org, id, request, &cancel).await
    })
    .await?;
    Ok(Json(record))
}

/// `PATCH /v2/org/{org}/carbide/vpc/{id}/virtualization`
pub async fn update_virtualization(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    payload: std::result::Result<Json<VpcVirtualizationUpdateRequest>, JsonRejection>,
) -> Result<Json<VpcRecord>> {
    state.authorize(&org, &headers).await?;
    let request = parse_json(payload)?;

    let coordinator = state.coordinator.clone();
    let record = run_detached(move |cancel| async move {
        coordinator
            .update_vpc_virtualization(&org, id, request, &cancel)
            .await
    })
    .await?;
    Ok(Json(record))
}

/// `DELETE /v2/org/{org}/carbide/vpc/{id}`
pub async fn delete(
    State(state): State<AppState>,
    Path((org, id)): Path<(String, Uuid)>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    state.authorize(&org, &headers).await?;

    let coordinator = state.coordinator.clone();
    run_detached(move |cancel| async move { coordinator.delete_vpc(&org, id, &cancel).await })
        .await?;
    Ok((StatusCode::ACCEPTED, DELETION_ACCEPTED))
}
