// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock gateway for testing.
//!
//! Simulates a site agent without a workflow engine. Every call is recorded
//! so tests can assert on workflow IDs, names and terminations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::traits::*;

/// What the mock does when a workflow is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Complete successfully.
    Succeed,
    /// Fail with an application error.
    Fail {
        /// Error type tag.
        error_type: String,
        /// Message.
        message: String,
    },
    /// Fail to start.
    StartFail,
    /// Report a timeout.
    Timeout,
    /// Never complete.
    Hang,
}

/// A recorded `start_and_wait` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Site the workflow ran on.
    pub site_id: Uuid,
    /// The request.
    pub request: WorkflowRequest,
}

/// A recorded `terminate` call.
#[derive(Debug, Clone)]
pub struct RecordedTermination {
    /// Site.
    pub site_id: Uuid,
    /// Workflow ID.
    pub workflow_id: String,
    /// Reason.
    pub reason: String,
    /// Deadline the caller gave.
    pub deadline: Duration,
}

/// Mock gateway for testing.
pub struct MockGateway {
    behavior: MockBehavior,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    terminations: Arc<Mutex<Vec<RecordedTermination>>>,
    /// Simulated execution time in milliseconds.
    pub execution_delay_ms: u64,
    /// If true, `terminate` fails.
    pub terminate_fails: bool,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGateway {
    /// Create a mock gateway that succeeds.
    pub fn new() -> Self {
        Self::with_behavior(MockBehavior::Succeed)
    }

    /// Create a mock gateway with the given behaviour.
    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            terminations: Arc::new(Mutex::new(Vec::new())),
            execution_delay_ms: 0,
            terminate_fails: false,
        }
    }

    /// Create a mock gateway that fails with `error_type`.
    pub fn failing(error_type: &str, message: &str) -> Self {
        Self::with_behavior(MockBehavior::Fail {
            error_type: error_type.to_string(),
            message: message.to_string(),
        })
    }

    /// Create a mock gateway that reports object-not-found.
    pub fn not_found() -> Self {
        Self::failing("CarbideObjectNotFound", "object not found on Site")
    }

    /// Create a mock gateway that always times out.
    pub fn timing_out() -> Self {
        Self::with_behavior(MockBehavior::Timeout)
    }

    /// Create a mock gateway whose workflows never complete.
    /// Useful for testing deadline enforcement.
    pub fn hanging() -> Self {
        Self::with_behavior(MockBehavior::Hang)
    }

    /// Make `terminate` fail.
    pub fn with_failing_terminate(mut self) -> Self {
        self.terminate_fails = true;
        self
    }

    /// Simulate execution time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.execution_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Recorded calls, oldest first.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().await.clone()
    }

    /// Recorded terminations, oldest first.
    pub async fn terminations(&self) -> Vec<RecordedTermination> {
        self.terminations.lock().await.clone()
    }
}

#[async_trait]
impl WorkflowGateway for MockGateway {
    fn gateway_type(&self) -> &'static str {
        "mock"
    }

    async fn start_and_wait(
        &self,
        site_id: Uuid,
        request: &WorkflowRequest,
        deadline: Duration,
    ) -> Result<WorkflowOutcome> {
        self.calls.lock().await.push(RecordedCall {
            site_id,
            request: request.clone(),
        });

        if self.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.execution_delay_ms)).await;
        }

        match &self.behavior {
            MockBehavior::Succeed => Ok(WorkflowOutcome {
                output: Some(serde_json::json!({ "workflowId": request.workflow_id })),
            }),
            MockBehavior::Fail {
                error_type,
                message,
            } => Err(GatewayError::Application {
                error_type: error_type.clone(),
                message: message.clone(),
            }),
            MockBehavior::StartFail => {
                Err(GatewayError::Start("workflow engine refused start".to_string()))
            }
            MockBehavior::Timeout => Err(GatewayError::Timeout(format!(
                "workflow {} exceeded {:?}",
                request.workflow_id, deadline
            ))),
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(WorkflowOutcome::default())
            }
        }
    }

    async fn terminate(
        &self,
        site_id: Uuid,
        workflow_id: &str,
        reason: &str,
        deadline: Duration,
    ) -> Result<()> {
        self.terminations.lock().await.push(RecordedTermination {
            site_id,
            workflow_id: workflow_id.to_string(),
            reason: reason.to_string(),
            deadline,
        });
        if self.terminate_fails {
            return Err(GatewayError::Other("terminate rejected".to_string()));
        }
        Ok(())
    }
}

/// Gateway used when no site client is configured; every call fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredGateway;

#[async_trait]
impl WorkflowGateway for UnconfiguredGateway {
    fn gateway_type(&self) -> &'static str {
        "unconfigured"
    }

    async fn start_and_wait(
        &self,
        site_id: Uuid,
        _request: &WorkflowRequest,
        _deadline: Duration,
    ) -> Result<WorkflowOutcome> {
        Err(GatewayError::Unavailable(site_id.to_string()))
    }

    async fn terminate(
        &self,
        site_id: Uuid,
        _workflow_id: &str,
        _reason: &str,
        _deadline: Duration,
    ) -> Result<()> {
        Err(GatewayError::Unavailable(site_id.to_string()))
    }
}
