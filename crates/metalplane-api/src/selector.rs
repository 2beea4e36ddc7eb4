// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Machine selection and reservation.
//!
//! Runs inside the provisioning transaction. A successful reservation leaves
//! the machine marked assigned and its advisory lock held until the
//! transaction ends, so nothing else can claim it while the remote workflow
//! is in flight.

use metalplane_core::lock::{self, LockKey, LockPolicy};
use metalplane_core::model::{AllocationConstraint, Machine, Tenant};
use metalplane_core::status::MachineStatus;
use metalplane_core::store::Transaction;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation;
use crate::error::{ApiError, Result};

/// How the caller asked for a machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineRequest {
    /// A specific machine.
    Explicit {
        /// Machine ID.
        machine_id: String,
        /// Accept a machine that is not Ready.
        allow_unhealthy: bool,
    },
    /// Any free machine of an instance type.
    ByType {
        /// Instance type ID.
        instance_type_id: Uuid,
    },
}

/// A reserved machine and, on the type path, the constraint it counts against.
#[derive(Debug, Clone)]
pub struct Reservation {
    /// The machine, as read before it was marked assigned.
    pub machine: Machine,
    /// Instance type to record on the instance.
    pub instance_type_id: Option<Uuid>,
    /// Instance type whose capabilities apply. On the explicit path this is
    /// the machine's own type, which is not recorded on the instance.
    pub capability_instance_type_id: Option<Uuid>,
    /// Constraint to bind the instance to.
    pub constraint: Option<AllocationConstraint>,
}

/// Reserve a machine for a new instance of `tenant` at `site_id`.
pub async fn reserve<T>(
    tx: &mut T,
    tenant: &Tenant,
    site_id: Uuid,
    site_name: &str,
    request: &MachineRequest,
    policy: &LockPolicy,
) -> Result<Reservation>
where
    T: Transaction + ?Sized,
{
    match request {
        MachineRequest::Explicit {
            machine_id,
            allow_unhealthy,
        } => {
            reserve_explicit(tx, tenant, site_id, site_name, machine_id, *allow_unhealthy, policy)
                .await
        }
        MachineRequest::ByType { instance_type_id } => {
            reserve_by_type(tx, tenant, site_id, *instance_type_id, policy).await
        }
    }
}

async fn reserve_explicit<T>(
    tx: &mut T,
    tenant: &Tenant,
    site_id: Uuid,
    site_name: &str,
    machine_id: &str,
    allow_unhealthy: bool,
    policy: &LockPolicy,
) -> Result<Reservation>
where
    T: Transaction + ?Sized,
{
    if !tenant.targeted_instance_creation {
        warn!(tenant_id = %tenant.id, "Tenant lacks targeted instance creation capability");
        return Err(ApiError::forbidden(
            "Tenant does not have capability to create Instances using specific Machine ID",
        ));
    }

    let machine = tx.get_machine(machine_id).await?.ok_or_else(|| {
        ApiError::validation("Could not find Machine with ID specified in request data")
    })?;

    if machine.site_id != site_id {
        return Err(ApiError::validation(format!(
            "Machine specified in request does not belong to Site: {site_name}"
        )));
    }
    if machine.is_missing_on_site {
        return Err(ApiError::validation(format!(
            "Machine: {} is missing on site, cannot be used for new Instance",
            machine.id
        )));
    }
    if machine.is_assigned {
        return Err(ApiError::validation(format!(
            "Machine: {} is assigned to an Instance, cannot be used for new Instance",
            machine.id
        )));
    }
    if machine.status != MachineStatus::Ready && !allow_unhealthy {
        return Err(ApiError::validation(format!(
            "Machine: {} has status: {}, set `allowUnhealthyMachine` to true in request data to proceed",
            machine.id, machine.status
        )));
    }

    if !lock::acquire(tx, LockKey::machine(&machine.id), policy).await? {
        warn!(machine_id = %machine.id, "Machine lock held by another request");
        return Err(machine_lock_conflict(&machine.id));
    }

    // Re-read under the lock: a transaction that held it may have committed.
    let machine = tx.get_machine(machine_id).await?.ok_or_else(|| {
        ApiError::validation("Could not find Machine with ID specified in request data")
    })?;
    if machine.is_assigned {
        return Err(ApiError::validation(format!(
            "Machine: {} is assigned to an Instance, cannot be used for new Instance",
            machine.id
        )));
    }

    tx.set_machine_assigned(&machine.id, true).await?;
    info!(machine_id = %machine.id, tenant_id = %tenant.id, "Reserved explicit machine");

    Ok(Reservation {
        capability_instance_type_id: machine.instance_type_id,
        machine,
        instance_type_id: None,
        constraint: None,
    })
}

async fn reserve_by_type<T>(
    tx: &mut T,
    tenant: &Tenant,
    site_id: Uuid,
    instance_type_id: Uuid,
    policy: &LockPolicy,
) -> Result<Reservation>
where
    T: Transaction + ?Sized,
{
    let instance_type = tx.get_instance_type(instance_type_id).await?.ok_or_else(|| {
        ApiError::validation("Could not find Instance Type with ID specified in request data")
    })?;

    let key = LockKey::tenant_instance_type(tenant.id, instance_type_id);
    if !lock::acquire(tx, key, policy).await? {
        warn!(
            tenant_id = %tenant.id,
            instance_type_id = %instance_type_id,
            "Tenant instance type lock held by another request"
        );
        return Err(ApiError::Conflict(
            "Error creating Instance, detected multiple parallel request on Instance Type by Tenant"
                .to_string(),
        ));
    }

    let allocation_site = instance_type.site_id.unwrap_or(site_id);
    let constraint =
        allocation::resolve(tx, tenant.id, allocation_site, instance_type_id).await?;

    let candidates = tx
        .list_available_machines(site_id, instance_type_id)
        .await?;
    let single = LockPolicy::no_retry();
    for candidate in candidates {
        if !lock::acquire(tx, LockKey::machine(&candidate.id), &single).await? {
            debug!(machine_id = %candidate.id, "Candidate machine locked, skipping");
            continue;
        }
        // Another transaction may have claimed it between the scan and the lock.
        let Some(machine) = tx.get_machine(&candidate.id).await? else {
            continue;
        };
        if machine.is_assigned {
            continue;
        }
        tx.set_machine_assigned(&machine.id, true).await?;
        info!(
            machine_id = %machine.id,
            tenant_id = %tenant.id,
            instance_type_id = %instance_type_id,
            constraint_id = %constraint.id,
            "Reserved machine by instance type"
        );
        return Ok(Reservation {
            machine,
            instance_type_id: Some(instance_type_id),
            capability_instance_type_id: Some(instance_type_id),
            constraint: Some(constraint),
        });
    }

    Err(ApiError::NoMachineAvailable(
        "No Machines are available for specified Instance Type".to_string(),
    ))
}

fn machine_lock_conflict(machine_id: &str) -> ApiError {
    ApiError::Conflict(format!(
        "Failed to lock Machine: {machine_id} for Instance creation. It is likely being considered for another Instance creation request"
    ))
}
