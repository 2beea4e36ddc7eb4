// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Remote workflow gateway and synchronous execution.

pub mod driver;
pub mod mock;
mod traits;

pub use driver::{RemoteOutcome, WorkflowOp};
pub use mock::{MockBehavior, MockGateway, UnconfiguredGateway};
pub use traits::*;
