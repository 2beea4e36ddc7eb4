// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Synchronous workflow execution with a bounded wait.
//!
//! [`execute`] races the gateway call against the configured deadline and
//! the request's cancellation token and classifies the result. It never
//! touches the store: the coordinator commits or rolls back based on the
//! returned [`RemoteOutcome`], then calls [`terminate_after_timeout`] for
//! timed-out workflows once the transaction is gone.

use axum::http::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::traits::{GatewayError, WorkflowGateway, WorkflowOutcome, WorkflowRequest};
use crate::config::CoordinatorConfig;
use crate::error::ApiError;

/// Site error type reported for missing objects.
pub const ERR_OBJECT_NOT_FOUND: &str = "CarbideObjectNotFound";

/// A site operation driven by a synchronous workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowOp {
    /// Create an instance.
    CreateInstance,
    /// Update instance configuration.
    UpdateInstance,
    /// Reboot an instance.
    RebootInstance,
    /// Delete an instance.
    DeleteInstance,
    /// Create a VPC.
    CreateVpc,
    /// Update a VPC.
    UpdateVpc,
    /// Switch a VPC to a different network virtualization type.
    UpdateVpcVirtualization,
    /// Delete a VPC.
    DeleteVpc,
}

impl WorkflowOp {
    /// Registered workflow name.
    pub fn workflow_name(self) -> &'static str {
        match self {
            WorkflowOp::CreateInstance => "CreateInstanceV2",
            WorkflowOp::UpdateInstance => "UpdateInstance",
            WorkflowOp::RebootInstance => "RebootInstanceV2",
            WorkflowOp::DeleteInstance => "DeleteInstanceV2",
            WorkflowOp::CreateVpc => "CreateVPCV2",
            WorkflowOp::UpdateVpc => "UpdateVPC",
            WorkflowOp::UpdateVpcVirtualization => "UpdateVPCVirtualization",
            WorkflowOp::DeleteVpc => "DeleteVPCV2",
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            WorkflowOp::CreateInstance => "instance-create-",
            WorkflowOp::UpdateInstance => "instance-update-",
            WorkflowOp::RebootInstance => "instance-reboot-",
            WorkflowOp::DeleteInstance => "instance-delete-",
            WorkflowOp::CreateVpc => "vpc-create-",
            WorkflowOp::UpdateVpc => "vpc-update-",
            WorkflowOp::UpdateVpcVirtualization => "vpc-update-virtualization-",
            WorkflowOp::DeleteVpc => "vpc-delete-",
        }
    }

    /// Deterministic workflow ID for an entity.
    pub fn workflow_id(self, entity_id: Uuid) -> String {
        format!("{}{}", self.id_prefix(), entity_id)
    }

    /// Verb used in client messages.
    pub fn verb(self) -> &'static str {
        match self {
            WorkflowOp::CreateInstance | WorkflowOp::CreateVpc => "create",
            WorkflowOp::UpdateInstance
            | WorkflowOp::UpdateVpc
            | WorkflowOp::UpdateVpcVirtualization => "update",
            WorkflowOp::RebootInstance => "reboot",
            WorkflowOp::DeleteInstance | WorkflowOp::DeleteVpc => "delete",
        }
    }

    /// Entity noun used in client messages.
    pub fn noun(self) -> &'static str {
        match self {
            WorkflowOp::CreateInstance
            | WorkflowOp::UpdateInstance
            | WorkflowOp::RebootInstance
            | WorkflowOp::DeleteInstance => "Instance",
            WorkflowOp::CreateVpc | WorkflowOp::UpdateVpc | WorkflowOp::DeleteVpc => "VPC",
            WorkflowOp::UpdateVpcVirtualization => "VPC virtualization",
        }
    }

    /// Action noun used in the de-sync warning.
    pub fn action(self) -> &'static str {
        match self {
            WorkflowOp::CreateInstance | WorkflowOp::CreateVpc => "creation",
            WorkflowOp::UpdateInstance | WorkflowOp::UpdateVpcVirtualization => "update",
            WorkflowOp::UpdateVpc => "updating",
            WorkflowOp::RebootInstance => "reboot",
            WorkflowOp::DeleteInstance | WorkflowOp::DeleteVpc => "deletion",
        }
    }

    /// Deletes treat a missing object on the site as done.
    pub fn tolerates_not_found(self) -> bool {
        matches!(self, WorkflowOp::DeleteInstance | WorkflowOp::DeleteVpc)
    }
}

/// How the remote call ended.
#[derive(Debug)]
pub enum RemoteOutcome {
    /// The workflow completed, or a delete found nothing to delete.
    Succeeded(WorkflowOutcome),
    /// The workflow could not start or failed on the site.
    Failed(ApiError),
    /// The deadline passed or the request was cancelled.
    TimedOut {
        /// Workflow to terminate.
        workflow_id: String,
        /// What ended the wait.
        cause: String,
    },
}

/// HTTP status for a site application error type.
pub fn status_for_error_type(error_type: &str) -> StatusCode {
    match error_type {
        ERR_OBJECT_NOT_FOUND => StatusCode::NOT_FOUND,
        "CarbideAlreadyExists" => StatusCode::CONFLICT,
        "CarbideInvalidArgument" => StatusCode::BAD_REQUEST,
        "CarbideFailedPrecondition" => StatusCode::PRECONDITION_FAILED,
        "CarbideUnimplemented" => StatusCode::NOT_IMPLEMENTED,
        "CarbideUnavailable" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map a gateway failure to the client error for `op`.
pub fn unwrap_error(op: WorkflowOp, err: &GatewayError) -> ApiError {
    let (verb, noun) = (op.verb(), op.noun());
    match err {
        GatewayError::Unavailable(_) => ApiError::internal("Failed to retrieve client for Site"),
        GatewayError::Start(_) => ApiError::internal(format!(
            "Failed to start sync workflow to {verb} {noun} on Site: {err}"
        )),
        _ => ApiError::Remote {
            status: err
                .error_type()
                .map_or(StatusCode::INTERNAL_SERVER_ERROR, status_for_error_type),
            message: format!("Failed to execute sync workflow to {verb} {noun} on Site: {err}"),
        },
    }
}

/// Run `op` on `site_id` and wait for the result.
pub async fn execute(
    gateway: &dyn WorkflowGateway,
    config: &CoordinatorConfig,
    site_id: Uuid,
    op: WorkflowOp,
    entity_id: Uuid,
    payload: Value,
    cancel: &CancellationToken,
) -> RemoteOutcome {
    let request = WorkflowRequest {
        workflow_id: op.workflow_id(entity_id),
        workflow_name: op.workflow_name().to_string(),
        task_queue: config.task_queue.clone(),
        execution_timeout: config.execution_timeout,
        payload,
    };

    info!(
        workflow_id = %request.workflow_id,
        workflow = %request.workflow_name,
        site_id = %site_id,
        gateway = gateway.gateway_type(),
        "Executing synchronous workflow"
    );

    let result = tokio::select! {
        result = gateway.start_and_wait(site_id, &request, config.workflow_timeout) => result,
        _ = tokio::time::sleep(config.workflow_timeout) => {
            Err(GatewayError::Timeout("context deadline exceeded".to_string()))
        }
        _ = cancel.cancelled() => {
            Err(GatewayError::Timeout("context canceled".to_string()))
        }
    };

    match result {
        Ok(outcome) => {
            info!(workflow_id = %request.workflow_id, "Completed synchronous workflow");
            RemoteOutcome::Succeeded(outcome)
        }
        Err(GatewayError::Timeout(cause)) => {
            error!(
                workflow_id = %request.workflow_id,
                cause = %cause,
                "Timeout occurred executing workflow on Site"
            );
            RemoteOutcome::TimedOut {
                workflow_id: request.workflow_id,
                cause,
            }
        }
        Err(err) if op.tolerates_not_found() && err.error_type() == Some(ERR_OBJECT_NOT_FOUND) => {
            warn!(
                workflow_id = %request.workflow_id,
                "Object already absent on Site, treating delete as successful"
            );
            RemoteOutcome::Succeeded(WorkflowOutcome::default())
        }
        Err(err) => {
            error!(workflow_id = %request.workflow_id, error = %err, "Synchronous workflow failed");
            RemoteOutcome::Failed(unwrap_error(op, &err))
        }
    }
}

/// Terminate a timed-out workflow under a fresh deadline.
///
/// Always returns an error for the client: [`ApiError::Timeout`] when the
/// workflow was terminated, [`ApiError::Desync`] when it could not be.
pub async fn terminate_after_timeout(
    gateway: &dyn WorkflowGateway,
    config: &CoordinatorConfig,
    site_id: Uuid,
    op: WorkflowOp,
    workflow_id: &str,
    cause: &str,
) -> ApiError {
    let (verb, noun) = (op.verb(), op.noun());
    let reason = format!("timeout occurred executing {verb} {noun} workflow");

    let deadline = config.terminate_timeout;
    let result = match tokio::time::timeout(
        deadline,
        gateway.terminate(site_id, workflow_id, &reason, deadline),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout("context deadline exceeded".to_string())),
    };

    match result {
        Ok(()) => {
            info!(workflow_id, "Terminated synchronous workflow after timeout");
            ApiError::Timeout(format!(
                "Failed to {verb} {noun}, timeout occurred executing workflow on Site: {cause}"
            ))
        }
        Err(err) => {
            error!(workflow_id, error = %err, "Failed to terminate workflow after timeout");
            ApiError::Desync(format!(
                "Failed to terminate synchronous {noun} {} workflow after timeout, Cloud and Site data may be de-synced: {err}",
                op.action()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::workflow::MockGateway;

    fn config() -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_workflow_timeout(Duration::from_millis(50))
            .with_terminate_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_workflow_ids() {
        let id = Uuid::nil();
        assert_eq!(
            WorkflowOp::CreateInstance.workflow_id(id),
            format!("instance-create-{id}")
        );
        assert_eq!(
            WorkflowOp::UpdateVpcVirtualization.workflow_id(id),
            format!("vpc-update-virtualization-{id}")
        );
        assert_eq!(WorkflowOp::DeleteVpc.workflow_name(), "DeleteVPCV2");
    }

    #[test]
    fn test_error_type_mapping() {
        assert_eq!(status_for_error_type("CarbideObjectNotFound"), StatusCode::NOT_FOUND);
        assert_eq!(status_for_error_type("CarbideAlreadyExists"), StatusCode::CONFLICT);
        assert_eq!(
            status_for_error_type("CarbideFailedPrecondition"),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_for_error_type("SomethingElse"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_start_failure_message() {
        let err = unwrap_error(
            WorkflowOp::RebootInstance,
            &GatewayError::Start("refused".to_string()),
        );
        assert_eq!(
            err.to_string(),
            "Failed to start sync workflow to reboot Instance on Site: refused"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_gateway_times_out() {
        let gateway = MockGateway::hanging();
        let outcome = execute(
            &gateway,
            &config(),
            Uuid::new_v4(),
            WorkflowOp::CreateVpc,
            Uuid::new_v4(),
            serde_json::json!({}),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(outcome, RemoteOutcome::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_counts_as_timeout() {
        let gateway = MockGateway::hanging();
        let token = CancellationToken::new();
        token.cancel();
        let outcome = execute(
            &gateway,
            &CoordinatorConfig::default(),
            Uuid::new_v4(),
            WorkflowOp::UpdateInstance,
            Uuid::new_v4(),
            serde_json::json!({}),
            &token,
        )
        .await;
        match outcome {
            RemoteOutcome::TimedOut { cause, .. } => assert_eq!(cause, "context canceled"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_not_found_is_success() {
        let gateway = MockGateway::not_found();
        let outcome = execute(
            &gateway,
            &config(),
            Uuid::new_v4(),
            WorkflowOp::DeleteInstance,
            Uuid::new_v4(),
            serde_json::json!({}),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(outcome, RemoteOutcome::Succeeded(_)));

        let outcome = execute(
            &gateway,
            &config(),
            Uuid::new_v4(),
            WorkflowOp::UpdateInstance,
            Uuid::new_v4(),
            serde_json::json!({}),
            &CancellationToken::new(),
        )
        .await;
        match outcome {
            RemoteOutcome::Failed(err) => assert_eq!(err.status(), StatusCode::NOT_FOUND),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminate_outcomes() {
        let site = Uuid::new_v4();
        let ok = MockGateway::new();
        let err =
            terminate_after_timeout(&ok, &config(), site, WorkflowOp::CreateInstance, "wf", "late")
                .await;
        assert!(matches!(err, ApiError::Timeout(_)));
        assert_eq!(
            err.to_string(),
            "Failed to create Instance, timeout occurred executing workflow on Site: late"
        );
        let recorded = ok.terminations().await;
        assert_eq!(recorded[0].reason, "timeout occurred executing create Instance workflow");

        let failing = MockGateway::new().with_failing_terminate();
        let err = terminate_after_timeout(
            &failing,
            &config(),
            site,
            WorkflowOp::DeleteVpc,
            "wf",
            "late",
        )
        .await;
        assert!(matches!(err, ApiError::Desync(_)));
        assert!(
            err.to_string()
                .starts_with("Failed to terminate synchronous VPC deletion workflow after timeout")
        );
    }
}
