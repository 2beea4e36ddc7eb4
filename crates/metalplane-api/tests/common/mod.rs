// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared fixtures for coordinator and HTTP tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use metalplane_api::config::CoordinatorConfig;
use metalplane_api::coordinator::Coordinator;
use metalplane_api::request::{InstanceCreateRequest, InterfaceRequest};
use metalplane_api::workflow::MockGateway;
use metalplane_core::lock::LockPolicy;
use metalplane_core::model::{
    Allocation, AllocationConstraint, InfiniBandPartition, InstanceType, Machine,
    MachineCapability, NvLinkLogicalPartition, Site, Subnet, Tenant, Vpc,
};
use metalplane_core::status::{
    CapabilityType, DeviceType, MachineStatus, NetworkVirtualizationType, ResourceStatus,
    ResourceType, SiteStatus, VpcStatus,
};
use metalplane_core::store::MemoryStore;
use sqlx::types::Json;
use uuid::Uuid;

pub const ORG: &str = "acme";

pub const IB_DEVICE: &str = "MT28908 Family [ConnectX-6]";
pub const GPU_DEVICE: &str = "GH100 [H100 SXM5 80GB]";

/// Who a seeded capability is attached to.
pub enum CapabilityHolder<'a> {
    InstanceType(Uuid),
    Machine(&'a str),
}

/// A tenant with a registered site, one allocation, an instance type, a
/// Ready VPC and a Ready subnet.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub tenant: Tenant,
    pub site: Site,
    pub allocation: Allocation,
    pub instance_type: InstanceType,
    pub vpc: Vpc,
    pub subnet: Subnet,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_targeted_creation(true)
    }

    pub fn with_targeted_creation(targeted: bool) -> Self {
        let store = Arc::new(MemoryStore::new());

        let tenant = Tenant {
            id: Uuid::new_v4(),
            org: ORG.to_string(),
            name: "Acme".to_string(),
            targeted_instance_creation: targeted,
        };
        let site = Site {
            id: Uuid::new_v4(),
            name: "site-a".to_string(),
            status: SiteStatus::Registered,
            native_networking_enabled: false,
            nvlink_partition_enabled: false,
        };
        let allocation = Allocation {
            id: Uuid::new_v4(),
            name: "acme-site-a".to_string(),
            tenant_id: tenant.id,
            site_id: site.id,
            created: Utc::now(),
        };
        let instance_type = InstanceType {
            id: Uuid::new_v4(),
            name: "gpu.large".to_string(),
            site_id: Some(site.id),
        };
        let vpc = Vpc {
            id: Uuid::new_v4(),
            name: "vpc-main".to_string(),
            description: None,
            org: ORG.to_string(),
            tenant_id: tenant.id,
            site_id: site.id,
            network_virtualization_type: NetworkVirtualizationType::EthernetVirtualizer,
            network_security_group_id: None,
            nvlink_logical_partition_id: None,
            controller_vpc_id: None,
            labels: Json(BTreeMap::new()),
            status: VpcStatus::Ready,
            created: Utc::now(),
            updated: Utc::now(),
        };
        let subnet = Subnet {
            id: Uuid::new_v4(),
            name: "subnet-a".to_string(),
            tenant_id: tenant.id,
            site_id: site.id,
            vpc_id: vpc.id,
            status: ResourceStatus::Ready,
        };

        store.insert_tenant(tenant.clone());
        store.insert_site(site.clone());
        store.insert_allocation(allocation.clone());
        store.insert_instance_type(instance_type.clone());
        store.insert_vpc(vpc.clone());
        store.insert_subnet(subnet.clone());

        Self {
            store,
            tenant,
            site,
            allocation,
            instance_type,
            vpc,
            subnet,
        }
    }

    /// Add a constraint created `minute` minutes into the fixture's epoch, so
    /// enumeration order is explicit.
    pub fn add_constraint(&self, value: i32, minute: u32) -> AllocationConstraint {
        let constraint = AllocationConstraint {
            id: Uuid::new_v4(),
            allocation_id: self.allocation.id,
            resource_type: ResourceType::InstanceType,
            resource_type_id: self.instance_type.id,
            constraint_value: value,
            created: Utc.with_ymd_and_hms(2025, 1, 1, 0, minute, 0).unwrap(),
        };
        self.store.insert_allocation_constraint(constraint.clone());
        constraint
    }

    pub fn add_machine(&self, id: &str) -> Machine {
        let machine = Machine {
            id: id.to_string(),
            site_id: self.site.id,
            instance_type_id: Some(self.instance_type.id),
            is_assigned: false,
            is_missing_on_site: false,
            status: MachineStatus::Ready,
            created: Utc::now(),
        };
        self.store.insert_machine(machine.clone());
        machine
    }

    /// Attach a capability with `count` devices to an instance type or machine.
    pub fn add_capability(
        &self,
        holder: CapabilityHolder<'_>,
        capability_type: CapabilityType,
        name: &str,
        count: i32,
        device_type: Option<DeviceType>,
    ) -> MachineCapability {
        let (machine_id, instance_type_id) = match holder {
            CapabilityHolder::InstanceType(id) => (None, Some(id)),
            CapabilityHolder::Machine(id) => (Some(id.to_string()), None),
        };
        let capability = MachineCapability {
            id: Uuid::new_v4(),
            machine_id,
            instance_type_id,
            capability_type,
            name: name.to_string(),
            vendor: Some("Mellanox Technologies".to_string()),
            count: Some(count),
            device_type,
            inactive_devices: Vec::new(),
            index: 0,
        };
        self.store.insert_capability(capability.clone());
        capability
    }

    /// InfiniBand partition of the fixture's tenant at its site.
    pub fn add_infiniband_partition(&self, status: ResourceStatus) -> InfiniBandPartition {
        let partition = InfiniBandPartition {
            id: Uuid::new_v4(),
            name: "ib-fabric".to_string(),
            tenant_id: self.tenant.id,
            site_id: self.site.id,
            controller_ib_partition_id: Some(Uuid::new_v4()),
            status,
        };
        self.store.insert_infiniband_partition(partition.clone());
        partition
    }

    /// Ready VPC with a default NVLink partition, plus a Ready subnet in it.
    pub fn add_nvlink_vpc(&self, name: &str) -> (Vpc, Subnet, NvLinkLogicalPartition) {
        let partition = NvLinkLogicalPartition {
            id: Uuid::new_v4(),
            name: format!("{name}-nvl"),
            tenant_id: self.tenant.id,
            site_id: self.site.id,
            status: ResourceStatus::Ready,
        };
        let vpc = Vpc {
            id: Uuid::new_v4(),
            name: name.to_string(),
            nvlink_logical_partition_id: Some(partition.id),
            ..self.vpc.clone()
        };
        let subnet = Subnet {
            id: Uuid::new_v4(),
            name: format!("{name}-subnet"),
            vpc_id: vpc.id,
            ..self.subnet.clone()
        };
        self.store.insert_nvlink_partition(partition.clone());
        self.store.insert_vpc(vpc.clone());
        self.store.insert_subnet(subnet.clone());
        (vpc, subnet, partition)
    }

    pub fn coordinator(&self, gateway: Arc<MockGateway>) -> Coordinator {
        Coordinator::new(self.store.clone(), gateway, test_config())
    }

    /// Create request picking any machine of the fixture's instance type.
    pub fn create_request(&self, name: &str) -> InstanceCreateRequest {
        InstanceCreateRequest {
            name: name.to_string(),
            tenant_id: self.tenant.id,
            instance_type_id: Some(self.instance_type.id),
            vpc_id: self.vpc.id,
            ipxe_script: Some("#!ipxe\nchain http://boot.local/menu".to_string()),
            interfaces: vec![InterfaceRequest {
                subnet_id: Some(self.subnet.id),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Create request for a specific machine.
    pub fn create_request_for_machine(&self, name: &str, machine_id: &str) -> InstanceCreateRequest {
        InstanceCreateRequest {
            instance_type_id: None,
            machine_id: Some(machine_id.to_string()),
            ..self.create_request(name)
        }
    }
}

/// Short deadlines and single-attempt locks keep contention tests fast and
/// deterministic.
pub fn test_config() -> CoordinatorConfig {
    CoordinatorConfig::default()
        .with_workflow_timeout(Duration::from_millis(200))
        .with_terminate_timeout(Duration::from_millis(100))
        .with_lock_policy(LockPolicy::no_retry())
}
