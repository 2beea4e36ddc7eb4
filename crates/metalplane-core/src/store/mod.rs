// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract.
//!
//! A [`Store`] hands out two kinds of handles: a lock-free [`Reader`] for the
//! validation phase and a [`Transaction`] for reservation and persistence.
//! Writes made through a transaction are invisible to every other handle
//! until [`Transaction::commit`]; dropping a transaction without committing
//! rolls it back and releases its advisory locks.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::lock::LockKey;
use crate::model::{
    Allocation, AllocationConstraint, CapabilityOwner, DpuExtensionService,
    DpuExtensionServiceDeployment, InfiniBandInterface, InfiniBandPartition, Instance,
    InstanceType, Interface, Machine, MachineCapability, NetworkSecurityGroup, NvLinkInterface,
    NvLinkLogicalPartition, Site, SshKeyGroup, SshKeyGroupInstanceAssociation, StatusDetail,
    Subnet, Tenant, Vpc, VpcPrefix,
};
use crate::status::{CapabilityType, DeploymentStatus, InterfaceStatus};

/// In-memory backend.
pub mod memory;
/// PostgreSQL backend.
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Read access shared by plain readers and open transactions.
#[allow(missing_docs)]
#[async_trait]
pub trait Reader: Send {
    // ========================================================================
    // Tenancy and Sites
    // ========================================================================

    async fn get_tenant_by_org(&mut self, org: &str) -> Result<Option<Tenant>>;

    async fn get_site(&mut self, id: Uuid) -> Result<Option<Site>>;

    async fn list_allocations(&mut self, tenant_id: Uuid, site_id: Uuid)
    -> Result<Vec<Allocation>>;

    /// Constraints of `allocation_ids` limiting `instance_type_id`, ordered by
    /// `(created, id)`.
    async fn list_instance_type_constraints(
        &mut self,
        allocation_ids: &[Uuid],
        instance_type_id: Uuid,
    ) -> Result<Vec<AllocationConstraint>>;

    // ========================================================================
    // Hardware
    // ========================================================================

    async fn get_instance_type(&mut self, id: Uuid) -> Result<Option<InstanceType>>;

    async fn get_machine(&mut self, id: &str) -> Result<Option<Machine>>;

    /// Ready, unassigned, present machines of a type at a site, ordered by
    /// `(created, id)`.
    async fn list_available_machines(
        &mut self,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Machine>>;

    /// Capabilities of one category, ordered by `index`.
    async fn list_capabilities(
        &mut self,
        owner: CapabilityOwner<'_>,
        capability_type: CapabilityType,
    ) -> Result<Vec<MachineCapability>>;

    // ========================================================================
    // Networking
    // ========================================================================

    async fn get_vpc(&mut self, id: Uuid) -> Result<Option<Vpc>>;

    async fn find_vpc_by_name(&mut self, tenant_id: Uuid, name: &str) -> Result<Option<Vpc>>;

    async fn get_subnet(&mut self, id: Uuid) -> Result<Option<Subnet>>;

    async fn get_vpc_prefix(&mut self, id: Uuid) -> Result<Option<VpcPrefix>>;

    async fn get_infiniband_partition(&mut self, id: Uuid) -> Result<Option<InfiniBandPartition>>;

    async fn get_nvlink_partition(&mut self, id: Uuid)
    -> Result<Option<NvLinkLogicalPartition>>;

    async fn get_network_security_group(&mut self, id: &str)
    -> Result<Option<NetworkSecurityGroup>>;

    async fn get_ssh_key_group(&mut self, id: Uuid) -> Result<Option<SshKeyGroup>>;

    async fn is_ssh_key_group_at_site(&mut self, group_id: Uuid, site_id: Uuid) -> Result<bool>;

    async fn get_dpu_extension_service(&mut self, id: Uuid)
    -> Result<Option<DpuExtensionService>>;

    async fn count_subnets(&mut self, vpc_id: Uuid) -> Result<i64>;

    async fn count_vpc_prefixes(&mut self, vpc_id: Uuid) -> Result<i64>;

    /// Non-terminated instances in a VPC.
    async fn count_vpc_instances(&mut self, vpc_id: Uuid) -> Result<i64>;

    /// NVLink interfaces on `partition_id` belonging to instances of `vpc_id`.
    async fn count_vpc_nvlink_interfaces(&mut self, vpc_id: Uuid, partition_id: Uuid)
    -> Result<i64>;

    // ========================================================================
    // Instances
    // ========================================================================

    async fn get_instance(&mut self, id: Uuid) -> Result<Option<Instance>>;

    async fn find_instance_by_name(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        name: &str,
    ) -> Result<Option<Instance>>;

    /// Non-terminated instances of a tenant for an instance type at a site.
    async fn list_active_instances(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Instance>>;

    async fn list_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<Interface>>;

    async fn list_infiniband_interfaces(&mut self, instance_id: Uuid)
    -> Result<Vec<InfiniBandInterface>>;

    async fn list_nvlink_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<NvLinkInterface>>;

    async fn list_dpu_deployments(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<DpuExtensionServiceDeployment>>;

    async fn list_ssh_key_group_associations(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<SshKeyGroupInstanceAssociation>>;

    /// Status history of an entity, oldest first.
    async fn list_status_details(&mut self, entity_id: &str) -> Result<Vec<StatusDetail>>;
}

/// An open transaction.
///
/// Advisory locks taken here are held until the transaction ends.
#[allow(missing_docs)]
#[async_trait]
pub trait Transaction: Reader {
    /// Single non-blocking attempt at a transaction-scoped advisory lock.
    /// Re-acquiring a key the transaction already holds succeeds.
    async fn try_acquire_advisory_lock(&mut self, key: LockKey) -> Result<bool>;

    async fn set_machine_assigned(&mut self, machine_id: &str, assigned: bool) -> Result<()>;

    async fn insert_instance(&mut self, instance: &Instance) -> Result<()>;

    /// Overwrite every mutable column of an existing instance.
    async fn update_instance(&mut self, instance: &Instance) -> Result<()>;

    async fn insert_interface(&mut self, interface: &Interface) -> Result<()>;

    async fn set_interface_status(&mut self, id: Uuid, status: InterfaceStatus) -> Result<()>;

    async fn insert_infiniband_interface(&mut self, interface: &InfiniBandInterface)
    -> Result<()>;

    async fn set_infiniband_interface_status(
        &mut self,
        id: Uuid,
        status: InterfaceStatus,
    ) -> Result<()>;

    async fn insert_nvlink_interface(&mut self, interface: &NvLinkInterface) -> Result<()>;

    async fn set_nvlink_interface_status(&mut self, id: Uuid, status: InterfaceStatus)
    -> Result<()>;

    async fn insert_dpu_deployment(&mut self, deployment: &DpuExtensionServiceDeployment)
    -> Result<()>;

    async fn set_dpu_deployment_status(&mut self, id: Uuid, status: DeploymentStatus)
    -> Result<()>;

    async fn insert_ssh_key_group_association(
        &mut self,
        association: &SshKeyGroupInstanceAssociation,
    ) -> Result<()>;

    async fn delete_ssh_key_group_association(&mut self, id: Uuid) -> Result<()>;

    async fn insert_vpc(&mut self, vpc: &Vpc) -> Result<()>;

    /// Overwrite every mutable column of an existing VPC.
    async fn update_vpc(&mut self, vpc: &Vpc) -> Result<()>;

    async fn append_status_detail(
        &mut self,
        entity_id: &str,
        status: &str,
        message: &str,
    ) -> Result<StatusDetail>;

    /// Make every write visible and release locks.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write and release locks.
    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Source of readers and transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// A handle for reads outside any transaction.
    async fn reader(&self) -> Result<Box<dyn Reader>>;

    /// Open a transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
