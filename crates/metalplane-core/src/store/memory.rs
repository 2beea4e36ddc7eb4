// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store.
//!
//! Committed rows live in shared tables. Each session stages its writes
//! privately and reads committed rows overlaid with its own staged rows, so
//! other sessions never see uncommitted data. Advisory locks are a shared
//! key-to-owner map released when the session commits, rolls back or drops.
//!
//! Readers are sessions that never write.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{Reader, Store, Transaction};
use crate::error::{Result, StoreError};
use crate::lock::LockKey;
use crate::model::{
    Allocation, AllocationConstraint, CapabilityOwner, DpuExtensionService,
    DpuExtensionServiceDeployment, InfiniBandInterface, InfiniBandPartition, Instance,
    InstanceType, Interface, Machine, MachineCapability, NetworkSecurityGroup, NvLinkInterface,
    NvLinkLogicalPartition, Site, SshKeyGroup, SshKeyGroupInstanceAssociation, StatusDetail,
    Subnet, Tenant, Vpc, VpcPrefix,
};
use crate::status::{
    CapabilityType, DeploymentStatus, InstanceStatus, InterfaceStatus, MachineStatus,
    ResourceType,
};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default, Clone)]
struct Tables {
    tenants: BTreeMap<Uuid, Tenant>,
    sites: BTreeMap<Uuid, Site>,
    allocations: BTreeMap<Uuid, Allocation>,
    constraints: BTreeMap<Uuid, AllocationConstraint>,
    instance_types: BTreeMap<Uuid, InstanceType>,
    capabilities: BTreeMap<Uuid, MachineCapability>,
    machines: BTreeMap<String, Machine>,
    vpcs: BTreeMap<Uuid, Vpc>,
    subnets: BTreeMap<Uuid, Subnet>,
    vpc_prefixes: BTreeMap<Uuid, VpcPrefix>,
    infiniband_partitions: BTreeMap<Uuid, InfiniBandPartition>,
    nvlink_partitions: BTreeMap<Uuid, NvLinkLogicalPartition>,
    security_groups: BTreeMap<String, NetworkSecurityGroup>,
    ssh_key_groups: BTreeMap<Uuid, SshKeyGroup>,
    ssh_key_group_sites: BTreeSet<(Uuid, Uuid)>,
    dpu_services: BTreeMap<Uuid, DpuExtensionService>,
    instances: BTreeMap<Uuid, Instance>,
    interfaces: BTreeMap<Uuid, Interface>,
    infiniband_interfaces: BTreeMap<Uuid, InfiniBandInterface>,
    nvlink_interfaces: BTreeMap<Uuid, NvLinkInterface>,
    dpu_deployments: BTreeMap<Uuid, DpuExtensionServiceDeployment>,
    ssh_associations: BTreeMap<Uuid, SshKeyGroupInstanceAssociation>,
    status_details: Vec<StatusDetail>,
}

/// Writes of one session, applied on commit.
#[derive(Debug, Default)]
struct Staged {
    machines: BTreeMap<String, Machine>,
    vpcs: BTreeMap<Uuid, Vpc>,
    instances: BTreeMap<Uuid, Instance>,
    interfaces: BTreeMap<Uuid, Interface>,
    infiniband_interfaces: BTreeMap<Uuid, InfiniBandInterface>,
    nvlink_interfaces: BTreeMap<Uuid, NvLinkInterface>,
    dpu_deployments: BTreeMap<Uuid, DpuExtensionServiceDeployment>,
    // None marks a deleted association.
    ssh_associations: BTreeMap<Uuid, Option<SshKeyGroupInstanceAssociation>>,
    status_details: Vec<StatusDetail>,
}

impl Staged {
    fn apply(self, tables: &mut Tables) {
        tables.machines.extend(self.machines);
        tables.vpcs.extend(self.vpcs);
        tables.instances.extend(self.instances);
        tables.interfaces.extend(self.interfaces);
        tables.infiniband_interfaces.extend(self.infiniband_interfaces);
        tables.nvlink_interfaces.extend(self.nvlink_interfaces);
        tables.dpu_deployments.extend(self.dpu_deployments);
        for (id, association) in self.ssh_associations {
            match association {
                Some(association) => {
                    tables.ssh_associations.insert(id, association);
                }
                None => {
                    tables.ssh_associations.remove(&id);
                }
            }
        }
        tables.status_details.extend(self.status_details);
    }

    fn overlay(&self, tables: &mut Tables) {
        tables.machines.extend(self.machines.clone());
        tables.vpcs.extend(self.vpcs.clone());
        tables.instances.extend(self.instances.clone());
        tables.interfaces.extend(self.interfaces.clone());
        tables
            .infiniband_interfaces
            .extend(self.infiniband_interfaces.clone());
        tables.nvlink_interfaces.extend(self.nvlink_interfaces.clone());
        tables.dpu_deployments.extend(self.dpu_deployments.clone());
        for (id, association) in &self.ssh_associations {
            match association {
                Some(association) => {
                    tables.ssh_associations.insert(*id, association.clone());
                }
                None => {
                    tables.ssh_associations.remove(id);
                }
            }
        }
        tables
            .status_details
            .extend(self.status_details.iter().cloned());
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<i64, u64>>,
    next_session: AtomicU64,
}

/// In-memory store for tests and local development.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> MemorySession {
        MemorySession {
            shared: self.shared.clone(),
            id: self.shared.next_session.fetch_add(1, Ordering::Relaxed) + 1,
            staged: Staged::default(),
            held: Vec::new(),
        }
    }

    fn with_tables<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        f(&mut guard(&self.shared.tables))
    }

    // ========================================================================
    // Seeding
    // ========================================================================

    /// Insert a tenant.
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.with_tables(|t| t.tenants.insert(tenant.id, tenant));
    }

    /// Insert a site.
    pub fn insert_site(&self, site: Site) {
        self.with_tables(|t| t.sites.insert(site.id, site));
    }

    /// Insert an allocation.
    pub fn insert_allocation(&self, allocation: Allocation) {
        self.with_tables(|t| t.allocations.insert(allocation.id, allocation));
    }

    /// Insert an allocation constraint.
    pub fn insert_allocation_constraint(&self, constraint: AllocationConstraint) {
        self.with_tables(|t| t.constraints.insert(constraint.id, constraint));
    }

    /// Insert an instance type.
    pub fn insert_instance_type(&self, instance_type: InstanceType) {
        self.with_tables(|t| t.instance_types.insert(instance_type.id, instance_type));
    }

    /// Insert a capability.
    pub fn insert_capability(&self, capability: MachineCapability) {
        self.with_tables(|t| t.capabilities.insert(capability.id, capability));
    }

    /// Insert a machine.
    pub fn insert_machine(&self, machine: Machine) {
        self.with_tables(|t| t.machines.insert(machine.id.clone(), machine));
    }

    /// Insert a VPC.
    pub fn insert_vpc(&self, vpc: Vpc) {
        self.with_tables(|t| t.vpcs.insert(vpc.id, vpc));
    }

    /// Insert a subnet.
    pub fn insert_subnet(&self, subnet: Subnet) {
        self.with_tables(|t| t.subnets.insert(subnet.id, subnet));
    }

    /// Insert a VPC prefix.
    pub fn insert_vpc_prefix(&self, prefix: VpcPrefix) {
        self.with_tables(|t| t.vpc_prefixes.insert(prefix.id, prefix));
    }

    /// Insert an InfiniBand partition.
    pub fn insert_infiniband_partition(&self, partition: InfiniBandPartition) {
        self.with_tables(|t| t.infiniband_partitions.insert(partition.id, partition));
    }

    /// Insert an NVLink logical partition.
    pub fn insert_nvlink_partition(&self, partition: NvLinkLogicalPartition) {
        self.with_tables(|t| t.nvlink_partitions.insert(partition.id, partition));
    }

    /// Insert a network security group.
    pub fn insert_network_security_group(&self, group: NetworkSecurityGroup) {
        self.with_tables(|t| t.security_groups.insert(group.id.clone(), group));
    }

    /// Insert an SSH key group associated with `site_ids`.
    pub fn insert_ssh_key_group(&self, group: SshKeyGroup, site_ids: &[Uuid]) {
        self.with_tables(|t| {
            for site_id in site_ids {
                t.ssh_key_group_sites.insert((group.id, *site_id));
            }
            t.ssh_key_groups.insert(group.id, group);
        });
    }

    /// Insert a DPU extension service.
    pub fn insert_dpu_extension_service(&self, service: DpuExtensionService) {
        self.with_tables(|t| t.dpu_services.insert(service.id, service));
    }

    /// Insert an instance directly, bypassing the coordinator.
    pub fn insert_instance(&self, instance: Instance) {
        self.with_tables(|t| t.instances.insert(instance.id, instance));
    }

    /// Insert an NVLink interface directly.
    pub fn insert_nvlink_interface(&self, interface: NvLinkInterface) {
        self.with_tables(|t| t.nvlink_interfaces.insert(interface.id, interface));
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Committed machine.
    pub fn machine(&self, id: &str) -> Option<Machine> {
        self.with_tables(|t| t.machines.get(id).cloned())
    }

    /// Committed instance.
    pub fn instance(&self, id: Uuid) -> Option<Instance> {
        self.with_tables(|t| t.instances.get(&id).cloned())
    }

    /// All committed instances.
    pub fn instances(&self) -> Vec<Instance> {
        self.with_tables(|t| t.instances.values().cloned().collect())
    }

    /// Committed VPC.
    pub fn vpc(&self, id: Uuid) -> Option<Vpc> {
        self.with_tables(|t| t.vpcs.get(&id).cloned())
    }

    /// All committed VPCs.
    pub fn vpcs(&self) -> Vec<Vpc> {
        self.with_tables(|t| t.vpcs.values().cloned().collect())
    }

    /// Committed status history of an entity.
    pub fn status_details(&self, entity_id: &str) -> Vec<StatusDetail> {
        self.with_tables(|t| {
            t.status_details
                .iter()
                .filter(|d| d.entity_id == entity_id)
                .cloned()
                .collect()
        })
    }

    /// Number of advisory locks currently held by any session.
    pub fn held_lock_count(&self) -> usize {
        guard(&self.shared.locks).len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn reader(&self) -> Result<Box<dyn Reader>> {
        Ok(Box::new(self.session()))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        Ok(Box::new(self.session()))
    }
}

/// A session over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemorySession {
    shared: Arc<Shared>,
    id: u64,
    staged: Staged,
    held: Vec<i64>,
}

impl MemorySession {
    /// Committed rows overlaid with this session's staged writes.
    fn view(&self) -> Tables {
        let mut tables = guard(&self.shared.tables).clone();
        self.staged.overlay(&mut tables);
        tables
    }

    fn release_locks(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let mut locks = guard(&self.shared.locks);
        for key in self.held.drain(..) {
            if locks.get(&key) == Some(&self.id) {
                locks.remove(&key);
            }
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.release_locks();
    }
}

fn not_found(entity: &'static str, id: impl ToString) -> StoreError {
    StoreError::NotFound {
        entity,
        id: id.to_string(),
    }
}

#[async_trait]
impl Reader for MemorySession {
    async fn get_tenant_by_org(&mut self, org: &str) -> Result<Option<Tenant>> {
        Ok(self.view().tenants.into_values().find(|t| t.org == org))
    }

    async fn get_site(&mut self, id: Uuid) -> Result<Option<Site>> {
        Ok(self.view().sites.remove(&id))
    }

    async fn list_allocations(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> Result<Vec<Allocation>> {
        let mut allocations: Vec<Allocation> = self
            .view()
            .allocations
            .into_values()
            .filter(|a| a.tenant_id == tenant_id && a.site_id == site_id)
            .collect();
        allocations.sort_by_key(|a| (a.created, a.id));
        Ok(allocations)
    }

    async fn list_instance_type_constraints(
        &mut self,
        allocation_ids: &[Uuid],
        instance_type_id: Uuid,
    ) -> Result<Vec<AllocationConstraint>> {
        let mut constraints: Vec<AllocationConstraint> = self
            .view()
            .constraints
            .into_values()
            .filter(|c| {
                allocation_ids.contains(&c.allocation_id)
                    && c.resource_type == ResourceType::InstanceType
                    && c.resource_type_id == instance_type_id
            })
            .collect();
        constraints.sort_by_key(|c| (c.created, c.id));
        Ok(constraints)
    }

    async fn get_instance_type(&mut self, id: Uuid) -> Result<Option<InstanceType>> {
        Ok(self.view().instance_types.remove(&id))
    }

    async fn get_machine(&mut self, id: &str) -> Result<Option<Machine>> {
        Ok(self.view().machines.remove(id))
    }

    async fn list_available_machines(
        &mut self,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Machine>> {
        let mut machines: Vec<Machine> = self
            .view()
            .machines
            .into_values()
            .filter(|m| {
                m.site_id == site_id
                    && m.instance_type_id == Some(instance_type_id)
                    && !m.is_assigned
                    && !m.is_missing_on_site
                    && m.status == MachineStatus::Ready
            })
            .collect();
        machines.sort_by(|a, b| (a.created, &a.id).cmp(&(b.created, &b.id)));
        Ok(machines)
    }

    async fn list_capabilities(
        &mut self,
        owner: CapabilityOwner<'_>,
        capability_type: CapabilityType,
    ) -> Result<Vec<MachineCapability>> {
        let mut capabilities: Vec<MachineCapability> = self
            .view()
            .capabilities
            .into_values()
            .filter(|c| c.capability_type == capability_type)
            .filter(|c| match owner {
                CapabilityOwner::InstanceType(id) => c.instance_type_id == Some(id),
                CapabilityOwner::Machine(id) => c.machine_id.as_deref() == Some(id),
            })
            .collect();
        capabilities.sort_by_key(|c| (c.index, c.id));
        Ok(capabilities)
    }

    async fn get_vpc(&mut self, id: Uuid) -> Result<Option<Vpc>> {
        Ok(self.view().vpcs.remove(&id))
    }

    async fn find_vpc_by_name(&mut self, tenant_id: Uuid, name: &str) -> Result<Option<Vpc>> {
        Ok(self
            .view()
            .vpcs
            .into_values()
            .filter(|v| v.tenant_id == tenant_id && v.name == name)
            .min_by_key(|v| v.created))
    }

    async fn get_subnet(&mut self, id: Uuid) -> Result<Option<Subnet>> {
        Ok(self.view().subnets.remove(&id))
    }

    async fn get_vpc_prefix(&mut self, id: Uuid) -> Result<Option<VpcPrefix>> {
        Ok(self.view().vpc_prefixes.remove(&id))
    }

    async fn get_infiniband_partition(
        &mut self,
        id: Uuid,
    ) -> Result<Option<InfiniBandPartition>> {
        Ok(self.view().infiniband_partitions.remove(&id))
    }

    async fn get_nvlink_partition(
        &mut self,
        id: Uuid,
    ) -> Result<Option<NvLinkLogicalPartition>> {
        Ok(self.view().nvlink_partitions.remove(&id))
    }

    async fn get_network_security_group(
        &mut self,
        id: &str,
    ) -> Result<Option<NetworkSecurityGroup>> {
        Ok(self.view().security_groups.remove(id))
    }

    async fn get_ssh_key_group(&mut self, id: Uuid) -> Result<Option<SshKeyGroup>> {
        Ok(self.view().ssh_key_groups.remove(&id))
    }

    async fn is_ssh_key_group_at_site(&mut self, group_id: Uuid, site_id: Uuid) -> Result<bool> {
        Ok(self.view().ssh_key_group_sites.contains(&(group_id, site_id)))
    }

    async fn get_dpu_extension_service(
        &mut self,
        id: Uuid,
    ) -> Result<Option<DpuExtensionService>> {
        Ok(self.view().dpu_services.remove(&id))
    }

    async fn count_subnets(&mut self, vpc_id: Uuid) -> Result<i64> {
        Ok(self
            .view()
            .subnets
            .values()
            .filter(|s| s.vpc_id == vpc_id)
            .count() as i64)
    }

    async fn count_vpc_prefixes(&mut self, vpc_id: Uuid) -> Result<i64> {
        Ok(self
            .view()
            .vpc_prefixes
            .values()
            .filter(|p| p.vpc_id == vpc_id)
            .count() as i64)
    }

    async fn count_vpc_instances(&mut self, vpc_id: Uuid) -> Result<i64> {
        Ok(self
            .view()
            .instances
            .values()
            .filter(|i| i.vpc_id == vpc_id && i.status != InstanceStatus::Terminated)
            .count() as i64)
    }

    async fn count_vpc_nvlink_interfaces(
        &mut self,
        vpc_id: Uuid,
        partition_id: Uuid,
    ) -> Result<i64> {
        let tables = self.view();
        let count = tables
            .nvlink_interfaces
            .values()
            .filter(|n| {
                n.nvlink_logical_partition_id == partition_id
                    && n.status != InterfaceStatus::Deleting
            })
            .filter(|n| {
                tables.instances.get(&n.instance_id).is_some_and(|i| {
                    i.vpc_id == vpc_id && i.status != InstanceStatus::Terminated
                })
            })
            .count();
        Ok(count as i64)
    }

    async fn get_instance(&mut self, id: Uuid) -> Result<Option<Instance>> {
        Ok(self.view().instances.remove(&id))
    }

    async fn find_instance_by_name(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        name: &str,
    ) -> Result<Option<Instance>> {
        Ok(self
            .view()
            .instances
            .into_values()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.site_id == site_id
                    && i.name == name
                    && i.status != InstanceStatus::Terminated
            })
            .min_by_key(|i| i.created))
    }

    async fn list_active_instances(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Instance>> {
        let mut instances: Vec<Instance> = self
            .view()
            .instances
            .into_values()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.site_id == site_id
                    && i.instance_type_id == Some(instance_type_id)
                    && i.status != InstanceStatus::Terminated
            })
            .collect();
        instances.sort_by_key(|i| (i.created, i.id));
        Ok(instances)
    }

    async fn list_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<Interface>> {
        let mut interfaces: Vec<Interface> = self
            .view()
            .interfaces
            .into_values()
            .filter(|i| i.instance_id == instance_id)
            .collect();
        interfaces.sort_by_key(|i| (i.created, i.id));
        Ok(interfaces)
    }

    async fn list_infiniband_interfaces(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<InfiniBandInterface>> {
        let mut interfaces: Vec<InfiniBandInterface> = self
            .view()
            .infiniband_interfaces
            .into_values()
            .filter(|i| i.instance_id == instance_id)
            .collect();
        interfaces.sort_by_key(|i| (i.created, i.id));
        Ok(interfaces)
    }

    async fn list_nvlink_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<NvLinkInterface>> {
        let mut interfaces: Vec<NvLinkInterface> = self
            .view()
            .nvlink_interfaces
            .into_values()
            .filter(|i| i.instance_id == instance_id)
            .collect();
        interfaces.sort_by_key(|i| (i.device_instance, i.id));
        Ok(interfaces)
    }

    async fn list_dpu_deployments(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<DpuExtensionServiceDeployment>> {
        let mut deployments: Vec<DpuExtensionServiceDeployment> = self
            .view()
            .dpu_deployments
            .into_values()
            .filter(|d| d.instance_id == instance_id)
            .collect();
        deployments.sort_by_key(|d| (d.created, d.id));
        Ok(deployments)
    }

    async fn list_ssh_key_group_associations(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<SshKeyGroupInstanceAssociation>> {
        let mut associations: Vec<SshKeyGroupInstanceAssociation> = self
            .view()
            .ssh_associations
            .into_values()
            .filter(|a| a.instance_id == instance_id)
            .collect();
        associations.sort_by_key(|a| (a.created, a.id));
        Ok(associations)
    }

    async fn list_status_details(&mut self, entity_id: &str) -> Result<Vec<StatusDetail>> {
        Ok(self
            .view()
            .status_details
            .into_iter()
            .filter(|d| d.entity_id == entity_id)
            .collect())
    }
}

#[async_trait]
impl Transaction for MemorySession {
    async fn try_acquire_advisory_lock(&mut self, key: LockKey) -> Result<bool> {
        let mut locks = guard(&self.shared.locks);
        let acquired = match locks.get(&key.value()).copied() {
            Some(owner) => owner == self.id,
            None => {
                locks.insert(key.value(), self.id);
                self.held.push(key.value());
                true
            }
        };
        Ok(acquired)
    }

    async fn set_machine_assigned(&mut self, machine_id: &str, assigned: bool) -> Result<()> {
        let mut machine = self
            .view()
            .machines
            .remove(machine_id)
            .ok_or_else(|| not_found("machine", machine_id))?;
        machine.is_assigned = assigned;
        self.staged.machines.insert(machine.id.clone(), machine);
        Ok(())
    }

    async fn insert_instance(&mut self, instance: &Instance) -> Result<()> {
        self.staged.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<()> {
        let mut current = self
            .view()
            .instances
            .remove(&instance.id)
            .ok_or_else(|| not_found("instance", instance.id))?;
        current.name = instance.name.clone();
        current.description = instance.description.clone();
        current.controller_instance_id = instance.controller_instance_id;
        current.ipxe_script = instance.ipxe_script.clone();
        current.user_data = instance.user_data.clone();
        current.always_boot_with_custom_ipxe = instance.always_boot_with_custom_ipxe;
        current.phone_home_enabled = instance.phone_home_enabled;
        current.network_security_group_id = instance.network_security_group_id.clone();
        current.labels = instance.labels.clone();
        current.status = instance.status;
        current.power_status = instance.power_status;
        current.updated = instance.updated;
        self.staged.instances.insert(current.id, current);
        Ok(())
    }

    async fn insert_interface(&mut self, interface: &Interface) -> Result<()> {
        self.staged.interfaces.insert(interface.id, interface.clone());
        Ok(())
    }

    async fn set_interface_status(&mut self, id: Uuid, status: InterfaceStatus) -> Result<()> {
        let mut interface = self
            .view()
            .interfaces
            .remove(&id)
            .ok_or_else(|| not_found("interface", id))?;
        interface.status = status;
        self.staged.interfaces.insert(id, interface);
        Ok(())
    }

    async fn insert_infiniband_interface(
        &mut self,
        interface: &InfiniBandInterface,
    ) -> Result<()> {
        self.staged
            .infiniband_interfaces
            .insert(interface.id, interface.clone());
        Ok(())
    }

    async fn set_infiniband_interface_status(
        &mut self,
        id: Uuid,
        status: InterfaceStatus,
    ) -> Result<()> {
        let mut interface = self
            .view()
            .infiniband_interfaces
            .remove(&id)
            .ok_or_else(|| not_found("infiniband interface", id))?;
        interface.status = status;
        self.staged.infiniband_interfaces.insert(id, interface);
        Ok(())
    }

    async fn insert_nvlink_interface(&mut self, interface: &NvLinkInterface) -> Result<()> {
        self.staged
            .nvlink_interfaces
            .insert(interface.id, interface.clone());
        Ok(())
    }

    async fn set_nvlink_interface_status(
        &mut self,
        id: Uuid,
        status: InterfaceStatus,
    ) -> Result<()> {
        let mut interface = self
            .view()
            .nvlink_interfaces
            .remove(&id)
            .ok_or_else(|| not_found("nvlink interface", id))?;
        interface.status = status;
        self.staged.nvlink_interfaces.insert(id, interface);
        Ok(())
    }

    async fn insert_dpu_deployment(
        &mut self,
        deployment: &DpuExtensionServiceDeployment,
    ) -> Result<()> {
        self.staged
            .dpu_deployments
            .insert(deployment.id, deployment.clone());
        Ok(())
    }

    async fn set_dpu_deployment_status(
        &mut self,
        id: Uuid,
        status: DeploymentStatus,
    ) -> Result<()> {
        let mut deployment = self
            .view()
            .dpu_deployments
            .remove(&id)
            .ok_or_else(|| not_found("dpu extension service deployment", id))?;
        deployment.status = status;
        self.staged.dpu_deployments.insert(id, deployment);
        Ok(())
    }

    async fn insert_ssh_key_group_association(
        &mut self,
        association: &SshKeyGroupInstanceAssociation,
    ) -> Result<()> {
        self.staged
            .ssh_associations
            .insert(association.id, Some(association.clone()));
        Ok(())
    }

    async fn delete_ssh_key_group_association(&mut self, id: Uuid) -> Result<()> {
        self.staged.ssh_associations.insert(id, None);
        Ok(())
    }

    async fn insert_vpc(&mut self, vpc: &Vpc) -> Result<()> {
        self.staged.vpcs.insert(vpc.id, vpc.clone());
        Ok(())
    }

    async fn update_vpc(&mut self, vpc: &Vpc) -> Result<()> {
        if !self.view().vpcs.contains_key(&vpc.id) {
            return Err(not_found("vpc", vpc.id));
        }
        self.staged.vpcs.insert(vpc.id, vpc.clone());
        Ok(())
    }

    async fn append_status_detail(
        &mut self,
        entity_id: &str,
        status: &str,
        message: &str,
    ) -> Result<StatusDetail> {
        let detail = StatusDetail {
            id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            status: status.to_string(),
            message: message.to_string(),
            created: Utc::now(),
        };
        self.staged.status_details.push(detail.clone());
        Ok(detail)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        let staged = std::mem::take(&mut self.staged);
        staged.apply(&mut guard(&self.shared.tables));
        self.release_locks();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.staged = Staged::default();
        self.release_locks();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SiteStatus;

    fn site() -> Site {
        Site {
            id: Uuid::new_v4(),
            name: "site-a".to_string(),
            status: SiteStatus::Registered,
            native_networking_enabled: false,
            nvlink_partition_enabled: false,
        }
    }

    fn machine(id: &str, site_id: Uuid) -> Machine {
        Machine {
            id: id.to_string(),
            site_id,
            instance_type_id: None,
            is_assigned: false,
            is_missing_on_site: false,
            status: MachineStatus::Ready,
            created: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryStore::new();
        let site = site();
        store.insert_site(site.clone());
        store.insert_machine(machine("m-1", site.id));

        let mut tx = store.begin().await.unwrap();
        tx.set_machine_assigned("m-1", true).await.unwrap();
        assert!(tx.get_machine("m-1").await.unwrap().unwrap().is_assigned);

        let mut reader = store.reader().await.unwrap();
        assert!(!reader.get_machine("m-1").await.unwrap().unwrap().is_assigned);

        tx.commit().await.unwrap();
        assert!(reader.get_machine("m-1").await.unwrap().unwrap().is_assigned);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let site = site();
        store.insert_machine(machine("m-1", site.id));

        let mut tx = store.begin().await.unwrap();
        tx.set_machine_assigned("m-1", true).await.unwrap();
        tx.append_status_detail("m-1", "Ready", "assigned")
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert!(!store.machine("m-1").unwrap().is_assigned);
        assert!(store.status_details("m-1").is_empty());
    }

    #[tokio::test]
    async fn test_advisory_lock_is_exclusive_and_released() {
        let store = MemoryStore::new();
        let key = LockKey::machine("m-1");

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        assert!(first.try_acquire_advisory_lock(key).await.unwrap());
        assert!(first.try_acquire_advisory_lock(key).await.unwrap());
        assert!(!second.try_acquire_advisory_lock(key).await.unwrap());

        first.commit().await.unwrap();
        assert!(second.try_acquire_advisory_lock(key).await.unwrap());
        drop(second);
        assert_eq!(store.held_lock_count(), 0);
    }

    #[tokio::test]
    async fn test_update_missing_row_fails() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let err = tx.set_machine_assigned("nope", true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "machine", .. }));
    }
}
