// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Gateway trait definitions.
//!
//! Defines the abstract interface to the workflow engine that drives site
//! agents.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Errors from gateway operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// No client is available for the site.
    #[error("site client unavailable: {0}")]
    Unavailable(String),

    /// The workflow could not be started.
    #[error("{0}")]
    Start(String),

    /// The workflow did not finish before its deadline.
    #[error("{0}")]
    Timeout(String),

    /// The site reported a typed application error.
    #[error("{message}")]
    Application {
        /// Error type tag, e.g. `CarbideObjectNotFound`.
        error_type: String,
        /// Error message from the site.
        message: String,
    },

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GatewayError {
    /// Error type tag of an application error.
    pub fn error_type(&self) -> Option<&str> {
        match self {
            GatewayError::Application { error_type, .. } => Some(error_type),
            _ => None,
        }
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// A workflow execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    /// Deterministic workflow ID, e.g. `instance-create-{id}`.
    pub workflow_id: String,
    /// Registered workflow name.
    pub workflow_name: String,
    /// Task queue the site agent polls.
    pub task_queue: String,
    /// Execution timeout enforced by the engine.
    #[serde(with = "duration_secs")]
    pub execution_timeout: Duration,
    /// Typed request body built from persisted entities.
    pub payload: Value,
}

/// Result of a completed workflow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowOutcome {
    /// Workflow output, if any.
    pub output: Option<Value>,
}

/// Remote workflow engine.
#[async_trait]
pub trait WorkflowGateway: Send + Sync {
    /// Gateway type identifier for logging.
    fn gateway_type(&self) -> &'static str;

    /// Start a workflow on a site and wait for it to finish.
    ///
    /// `deadline` bounds the wait; implementations report expiry as
    /// [`GatewayError::Timeout`].
    async fn start_and_wait(
        &self,
        site_id: Uuid,
        request: &WorkflowRequest,
        deadline: Duration,
    ) -> Result<WorkflowOutcome>;

    /// Terminate a running workflow.
    async fn terminate(
        &self,
        site_id: Uuid,
        workflow_id: &str,
        reason: &str,
        deadline: Duration,
    ) -> Result<()>;
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
