// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for metalplane-api.

use std::net::SocketAddr;
use std::time::Duration;

use metalplane_core::lock::LockPolicy;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HTTP listen address.
    pub http_addr: SocketAddr,
    /// Maximum pooled database connections.
    pub max_connections: u32,
    /// Coordinator tuning.
    pub coordinator: CoordinatorConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("METALPLANE_DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("METALPLANE_DATABASE_URL"))?;

        let port: u16 = std::env::var("METALPLANE_HTTP_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let http_addr = SocketAddr::from(([0, 0, 0, 0], port));

        let max_connections = parse_var("METALPLANE_DB_MAX_CONNECTIONS", 10)?;

        let defaults = CoordinatorConfig::default();
        let coordinator = CoordinatorConfig {
            workflow_timeout: Duration::from_secs(parse_var(
                "METALPLANE_WORKFLOW_CONTEXT_TIMEOUT_SECS",
                defaults.workflow_timeout.as_secs(),
            )?),
            terminate_timeout: Duration::from_secs(parse_var(
                "METALPLANE_WORKFLOW_TERMINATE_TIMEOUT_SECS",
                defaults.terminate_timeout.as_secs(),
            )?),
            execution_timeout: Duration::from_secs(parse_var(
                "METALPLANE_WORKFLOW_EXECUTION_TIMEOUT_SECS",
                defaults.execution_timeout.as_secs(),
            )?),
            task_queue: std::env::var("METALPLANE_SITE_TASK_QUEUE")
                .unwrap_or(defaults.task_queue),
            lock_policy: LockPolicy::with_attempts(parse_var(
                "METALPLANE_LOCK_RETRIES",
                defaults.lock_policy.attempts,
            )?),
        };

        Ok(Self {
            database_url,
            http_addr,
            max_connections,
            coordinator,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Timeouts, queue and lock policy used by the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Deadline for a synchronous workflow call.
    pub workflow_timeout: Duration,
    /// Independent deadline for terminating a timed-out workflow.
    pub terminate_timeout: Duration,
    /// Execution timeout passed to the workflow engine.
    pub execution_timeout: Duration,
    /// Site task queue name.
    pub task_queue: String,
    /// Advisory lock acquisition policy.
    pub lock_policy: LockPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            workflow_timeout: Duration::from_secs(60),
            terminate_timeout: Duration::from_secs(10),
            execution_timeout: Duration::from_secs(300),
            task_queue: "site".to_string(),
            lock_policy: LockPolicy::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Set the workflow call deadline.
    pub fn with_workflow_timeout(mut self, timeout: Duration) -> Self {
        self.workflow_timeout = timeout;
        self
    }

    /// Set the termination deadline.
    pub fn with_terminate_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout;
        self
    }

    /// Set the lock policy.
    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(&'static str),
    /// The port number is invalid.
    #[error("Invalid port number")]
    InvalidPort,
    /// A variable could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinator_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.workflow_timeout, Duration::from_secs(60));
        assert_eq!(config.terminate_timeout, Duration::from_secs(10));
        assert_eq!(config.lock_policy.attempts, 3);
    }

    #[test]
    fn test_builders() {
        let config = CoordinatorConfig::default()
            .with_workflow_timeout(Duration::from_millis(50))
            .with_lock_policy(LockPolicy::no_retry());
        assert_eq!(config.workflow_timeout, Duration::from_millis(50));
        assert_eq!(config.lock_policy.attempts, 1);
    }

    #[test]
    fn test_parse_var_falls_back_to_default() {
        let value: u32 = parse_var("METALPLANE_TEST_UNSET_VARIABLE_XYZ", 7).unwrap();
        assert_eq!(value, 7);
    }
}
