// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metalplane Core - Data Model and Transactional Store
//!
//! This crate owns everything the provisioning coordinator persists: tenants,
//! sites, allocations, machines, VPCs, instances and their child interfaces.
//! It exposes a narrow store contract so the coordinator can run the whole
//! reserve / persist / remote-call sequence inside a single transaction.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     metalplane-api (coordinator)                  │
//! └───────────────────────────────────────────────────────────────────┘
//!            │ reader()                         │ begin()
//!            ▼                                  ▼
//! ┌──────────────────────┐        ┌──────────────────────────────────┐
//! │   Reader (no locks)  │        │  Transaction                     │
//! │   validation reads   │        │  advisory locks, writes,         │
//! └──────────────────────┘        │  commit / rollback               │
//!            │                    └──────────────────────────────────┘
//!            ▼                                  │
//! ┌───────────────────────────────────────────────────────────────────┐
//! │          PostgresStore (sqlx)   │   MemoryStore (tests)           │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Instance Lifecycle
//!
//! | From | Allowed next statuses |
//! |------|----------------------|
//! | `Pending` | `Provisioning`, `Configuring`, `Ready`, `Error`, `Terminating` |
//! | `Provisioning` | `Configuring`, `Ready`, `Error`, `Terminating` |
//! | `Configuring` | `Configuring`, `Ready`, `Error`, `Terminating` |
//! | `Ready` | `Configuring`, `Updating`, `Error`, `Terminating` |
//! | `Updating` | `Configuring`, `Ready`, `Error`, `Terminating` |
//! | `Error` | `Configuring`, `Ready`, `Terminating` |
//! | `Unknown` | `Configuring`, `Ready`, `Error`, `Terminating` |
//! | `Terminating` | `Terminating`, `Terminated`, `Error` |
//! | `Terminated` | terminal |
//!
//! Writes go through [`status::transition`], so an illegal move surfaces as
//! [`error::StoreError::InvalidTransition`] instead of a silently stored string.
//!
//! # Advisory Locks
//!
//! Contended resources are serialized with transaction-scoped named mutexes.
//! A name is hashed with SHA-256 and the first eight bytes (big-endian, sign
//! bit cleared) become the lock key. Locks are released when the owning
//! transaction commits or rolls back; see [`lock`].

#![deny(missing_docs)]

/// Store error types.
pub mod error;

/// Advisory lock keys and the bounded acquisition policy.
pub mod lock;

/// Embedded PostgreSQL migrations.
pub mod migrations;

/// Persisted entity records.
pub mod model;

/// Closed status enums and their transition tables.
pub mod status;

/// Store contract with PostgreSQL and in-memory backends.
pub mod store;
