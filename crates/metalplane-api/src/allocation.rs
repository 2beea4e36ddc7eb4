// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Allocation constraint resolution.
//!
//! Decides which allocation constraint a new instance of a given type counts
//! against. Resolution only reads; the caller binds the instance to the chosen
//! constraint when it persists the instance.

use std::collections::HashMap;

use metalplane_core::model::{AllocationConstraint, Instance};
use metalplane_core::store::Reader;
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::{ApiError, Result};

const NO_ALLOCATION: &str =
    "Tenant does not have any Allocations for Site and Instance Type specified in request data";
const NO_CONSTRAINT: &str =
    "No Allocations for specified Instance Type were found for current Tenant";
const CAPACITY_EXCEEDED: &str =
    "Tenant has reached the maximum number of Instances for Instance Type specified in request data";

/// Pick the first constraint, in enumeration order, with room left.
///
/// `constraints` must already be ordered by `(created, id)`.
pub fn first_fit(
    constraints: &[AllocationConstraint],
    active: &[Instance],
) -> Result<AllocationConstraint> {
    let mut used: HashMap<Uuid, i64> = HashMap::new();
    for instance in active {
        let Some(constraint_id) = instance.allocation_constraint_id else {
            error!(instance_id = %instance.id, "Active instance has no allocation constraint");
            return Err(ApiError::internal("Instance is missing Allocation Constraint ID"));
        };
        *used.entry(constraint_id).or_default() += 1;
    }

    let total: i64 = constraints
        .iter()
        .map(|c| i64::from(c.constraint_value))
        .sum();
    if active.len() as i64 >= total {
        return Err(ApiError::CapacityExceeded(CAPACITY_EXCEEDED.to_string()));
    }

    constraints
        .iter()
        .find(|c| used.get(&c.id).copied().unwrap_or(0) < i64::from(c.constraint_value))
        .cloned()
        .ok_or_else(|| {
            error!(
                active = active.len(),
                total, "No constraint has capacity left although the total does"
            );
            ApiError::internal(
                "Error determining available Allocation for Instance, potential data issue",
            )
        })
}

/// Resolve the constraint a new instance of `instance_type_id` will use.
pub async fn resolve<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    instance_type_id: Uuid,
) -> Result<AllocationConstraint>
where
    R: Reader + ?Sized,
{
    let allocations = reader.list_allocations(tenant_id, site_id).await?;
    if allocations.is_empty() {
        return Err(ApiError::NoAllocation(NO_ALLOCATION.to_string()));
    }

    let allocation_ids: Vec<Uuid> = allocations.iter().map(|a| a.id).collect();
    let constraints = reader
        .list_instance_type_constraints(&allocation_ids, instance_type_id)
        .await?;
    if constraints.is_empty() {
        return Err(ApiError::NoConstraint(NO_CONSTRAINT.to_string()));
    }

    let active = reader
        .list_active_instances(tenant_id, site_id, instance_type_id)
        .await?;

    let chosen = first_fit(&constraints, &active)?;
    debug!(
        tenant_id = %tenant_id,
        instance_type_id = %instance_type_id,
        constraint_id = %chosen.id,
        "Resolved allocation constraint"
    );
    Ok(chosen)
}
