// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Database migrations for metalplane-core.
//!
//! # Example
//!
//! ```ignore
//! use sqlx::PgPool;
//! use metalplane_core::migrations;
//!
//! let pool = PgPool::connect(&database_url).await?;
//! migrations::run(&pool).await?;
//! ```

use sqlx::PgPool;
use sqlx::migrate::Migrator;

use crate::error::Result;

/// PostgreSQL migrations embedded at compile time.
pub static POSTGRES: Migrator = sqlx::migrate!("./migrations");

/// Apply pending migrations. Already-applied migrations are skipped.
pub async fn run(pool: &PgPool) -> Result<()> {
    POSTGRES.run(pool).await?;
    Ok(())
}
