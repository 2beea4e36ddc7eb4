// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Provisioning transaction coordinator.
//!
//! Every mutating operation follows the same sequence:
//!
//! ```text
//! Validating ──► Reserving ──► LocallyPersisted ──► RemoteInFlight
//!                                                        │
//!                    ┌───────────────────┬───────────────┴──────┐
//!                    ▼                   ▼                      ▼
//!             RemoteSucceeded     RemoteFailed           RemoteTimedOut
//!                    │                   │                      │
//!                 Committed          RolledBack      RolledBack + terminate
//! ```
//!
//! Validation reads run on a lock-free reader. Reservation, persistence and
//! the remote call all happen while one transaction (and its advisory locks)
//! is open; only a successful remote outcome commits it.

mod instance;
mod vpc;

use std::sync::Arc;

use metalplane_core::model::{Site, StatusDetail, Tenant};
use metalplane_core::status::SiteStatus;
use metalplane_core::store::{Reader, Store, Transaction};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::CoordinatorConfig;
use crate::error::{ApiError, Result};
use crate::workflow::driver::{self, RemoteOutcome, WorkflowOp};
use crate::workflow::WorkflowGateway;

pub use instance::InstanceRecord;
pub use vpc::VpcRecord;

/// Drives provisioning transactions against a store and a workflow gateway.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn Store>,
    gateway: Arc<dyn WorkflowGateway>,
    config: CoordinatorConfig,
}

impl Coordinator {
    /// Create a coordinator.
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<dyn WorkflowGateway>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            gateway,
            config,
        }
    }

    /// Coordinator configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    async fn reader(&self) -> Result<Box<dyn Reader>> {
        Ok(self.store.reader().await?)
    }

    async fn begin(&self, op: WorkflowOp) -> Result<Box<dyn Transaction>> {
        self.store.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start DB transaction");
            ApiError::internal(format!(
                "Error {} {}, DB transaction error",
                progressive(op.verb()),
                op.noun()
            ))
        })
    }

    /// Run the remote workflow for a persisted change and settle the
    /// transaction on its outcome.
    async fn run_and_settle(
        &self,
        tx: Box<dyn Transaction>,
        site_id: Uuid,
        op: WorkflowOp,
        entity_id: Uuid,
        payload: Value,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let outcome = driver::execute(
            self.gateway.as_ref(),
            &self.config,
            site_id,
            op,
            entity_id,
            payload,
            cancel,
        )
        .await;

        match outcome {
            RemoteOutcome::Succeeded(_) => {
                tx.commit().await.map_err(|e| {
                    error!(entity_id = %entity_id, error = %e, "Failed to commit DB transaction");
                    ApiError::internal(format!(
                        "Failed to {} {}, DB transaction error",
                        op.verb(),
                        op.noun()
                    ))
                })?;
                info!(entity_id = %entity_id, workflow = op.workflow_name(), "Committed provisioning transaction");
                Ok(())
            }
            RemoteOutcome::Failed(err) => Err(rollback(tx, err).await),
            RemoteOutcome::TimedOut { workflow_id, cause } => {
                // Release locks before waiting on the termination call.
                discard(tx).await;
                Err(driver::terminate_after_timeout(
                    self.gateway.as_ref(),
                    &self.config,
                    site_id,
                    op,
                    &workflow_id,
                    &cause,
                )
                .await)
            }
        }
    }
}

async fn discard(tx: Box<dyn Transaction>) {
    if let Err(e) = tx.rollback().await {
        warn!(error = %e, "Failed to roll back DB transaction");
    }
}

/// Roll `tx` back and hand `err` through.
async fn rollback(tx: Box<dyn Transaction>, err: ApiError) -> ApiError {
    discard(tx).await;
    err
}

fn progressive(verb: &str) -> &'static str {
    match verb {
        "create" => "creating",
        "reboot" => "rebooting",
        "delete" => "deleting",
        _ => "updating",
    }
}

/// The tenant of `org`, or `missing` when there is none.
async fn tenant_for_org<R>(reader: &mut R, org: &str, missing: fn(String) -> ApiError) -> Result<Tenant>
where
    R: Reader + ?Sized,
{
    reader
        .get_tenant_by_org(org)
        .await?
        .ok_or_else(|| missing("Org does not have a Tenant associated".to_string()))
}

/// The site, which must exist and be Registered.
async fn registered_site<R>(
    reader: &mut R,
    site_id: Uuid,
    not_found: &str,
    not_registered: &str,
) -> Result<Site>
where
    R: Reader + ?Sized,
{
    let site = reader
        .get_site(site_id)
        .await?
        .ok_or_else(|| ApiError::validation(not_found))?;
    if site.status != SiteStatus::Registered {
        warn!(site_id = %site.id, status = %site.status, "Site is not registered");
        return Err(ApiError::validation(not_registered));
    }
    Ok(site)
}

/// The tenant must hold at least one allocation at the site.
async fn require_allocation<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    message: &str,
) -> Result<()>
where
    R: Reader + ?Sized,
{
    if reader.list_allocations(tenant_id, site_id).await?.is_empty() {
        return Err(ApiError::forbidden(message));
    }
    Ok(())
}

async fn status_history<R>(reader: &mut R, entity_id: Uuid) -> Result<Vec<StatusDetail>>
where
    R: Reader + ?Sized,
{
    Ok(reader.list_status_details(&entity_id.to_string()).await?)
}

fn to_payload<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        error!(error = %e, "Failed to build workflow request");
        ApiError::internal("Failed to build workflow request")
    })
}

fn invalid_transition(err: metalplane_core::error::StoreError) -> ApiError {
    ApiError::Conflict(err.to_string())
}
