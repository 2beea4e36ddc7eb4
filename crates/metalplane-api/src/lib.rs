// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metalplane API - Provisioning Transaction Coordinator
//!
//! Tenants ask for VPCs and compute instances backed by physical machines at
//! remote sites. Each request reserves contended resources, persists the new
//! state inside one database transaction, drives a provisioning workflow on
//! the site synchronously and commits only when the site reports success.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                    HTTP (axum) /v2/org/{org}/carbide                │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                   │
//!                                   ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Coordinator                              │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │  Machine     │─►│  Allocation  │  │  Capability  │               │
//! │  │  Selector    │  │  Resolver    │  │  Validator   │               │
//! │  └──────────────┘  └──────────────┘  └──────────────┘               │
//! └─────────────────────────────────────────────────────────────────────┘
//!            │ begin / lock / write / commit       │ start_and_wait / terminate
//!            ▼                                     ▼
//! ┌───────────────────────────────┐   ┌───────────────────────────────────┐
//! │  metalplane-core Store        │   │  WorkflowGateway (site agents)    │
//! │  (PostgreSQL / in-memory)     │   │                                   │
//! └───────────────────────────────┘   └───────────────────────────────────┘
//! ```
//!
//! # Operations
//!
//! | Route | Workflow | Success |
//! |-------|----------|---------|
//! | `POST /instance` | `CreateInstanceV2` | 201 |
//! | `PATCH /instance/{id}` | `UpdateInstance` or `RebootInstanceV2` | 200 |
//! | `DELETE /instance/{id}` | `DeleteInstanceV2` | 202 |
//! | `POST /vpc` | `CreateVPCV2` | 201 |
//! | `PATCH /vpc/{id}` | `UpdateVPC` | 200 |
//! | `PATCH /vpc/{id}/virtualization` | `UpdateVPCVirtualization` | 200 |
//! | `DELETE /vpc/{id}` | `DeleteVPCV2` | 202 |
//!
//! # Timeouts
//!
//! The workflow call is bounded by `workflow_timeout`. When it expires, or the
//! client disconnects, the transaction rolls back and the workflow is
//! terminated under a separate `terminate_timeout`. A failed termination is
//! reported as a de-sync between cloud and site.

#![deny(missing_docs)]

/// Allocation constraint resolution.
pub mod allocation;

/// Hardware capability checks.
pub mod capability;

/// Configuration.
pub mod config;

/// Provisioning transaction coordinator.
pub mod coordinator;

/// Eligibility of referenced resources.
pub mod eligibility;

/// Error types.
pub mod error;

/// HTTP router and handlers.
pub mod http;

/// Request bodies and shape validation.
pub mod request;

/// Machine selection and reservation.
pub mod selector;

/// Remote workflow gateway.
pub mod workflow;

pub use config::{Config, CoordinatorConfig};
pub use coordinator::Coordinator;
pub use error::{ApiError, Result};
