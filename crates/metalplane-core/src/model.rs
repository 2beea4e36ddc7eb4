// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persisted entity records.
//!
//! Records map one-to-one onto table rows. Referenced resources (subnets,
//! prefixes, partitions, security groups, key groups, extension services)
//! are only ever read by the coordinator; instances, VPCs and their children
//! are written inside provisioning transactions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::status::{
    CapabilityType, DeploymentStatus, DeviceType, InstanceStatus, InterfaceStatus, MachineStatus,
    NetworkVirtualizationType, PowerStatus, ResourceStatus, ResourceType, SiteStatus, VpcStatus,
};

/// Free-form key/value labels, stored as JSONB.
pub type Labels = Json<BTreeMap<String, String>>;

// ============================================================================
// Tenancy and Sites
// ============================================================================

/// A tenant organization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    /// Tenant ID.
    pub id: Uuid,
    /// Organization name the tenant belongs to.
    pub org: String,
    /// Display name.
    pub name: String,
    /// May create instances on an explicit machine and flag repair deletes.
    pub targeted_instance_creation: bool,
}

/// A remote site running a site-agent.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    /// Site ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Registration status.
    pub status: SiteStatus,
    /// Site supports FNN VPCs.
    pub native_networking_enabled: bool,
    /// Site supports NVLink logical partitions.
    pub nvlink_partition_enabled: bool,
}

/// A grant of site resources to a tenant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// Allocation ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site the allocation applies to.
    pub site_id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Quota attached to an allocation.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationConstraint {
    /// Constraint ID.
    pub id: Uuid,
    /// Owning allocation.
    pub allocation_id: Uuid,
    /// Kind of resource constrained.
    pub resource_type: ResourceType,
    /// ID of the constrained resource (an instance type for compute).
    pub resource_type_id: Uuid,
    /// Maximum number of resources this constraint admits.
    pub constraint_value: i32,
    /// Creation time; first-fit enumerates by `(created, id)`.
    pub created: DateTime<Utc>,
}

// ============================================================================
// Hardware
// ============================================================================

/// Catalogue entry describing a class of machines.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceType {
    /// Instance type ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Site the type is defined for.
    pub site_id: Option<Uuid>,
}

/// A hardware capability of an instance type or a single machine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineCapability {
    /// Capability ID.
    pub id: Uuid,
    /// Machine the capability was discovered on.
    pub machine_id: Option<String>,
    /// Instance type the capability is declared for.
    pub instance_type_id: Option<Uuid>,
    /// Capability category.
    pub capability_type: CapabilityType,
    /// Device name, e.g. `MT2910 Family [ConnectX-7]`.
    pub name: String,
    /// Vendor string.
    pub vendor: Option<String>,
    /// Number of devices.
    pub count: Option<i32>,
    /// Device flavour.
    pub device_type: Option<DeviceType>,
    /// Device instances that must not be used.
    pub inactive_devices: Vec<i32>,
    /// Ordering hint among capabilities of the same category.
    pub index: i32,
}

/// A physical machine at a site.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    /// Machine ID as reported by the site.
    pub id: String,
    /// Site the machine lives at.
    pub site_id: Uuid,
    /// Instance type the machine was classified as.
    pub instance_type_id: Option<Uuid>,
    /// Reserved by an instance.
    pub is_assigned: bool,
    /// Site stopped reporting the machine.
    pub is_missing_on_site: bool,
    /// Health status.
    pub status: MachineStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
}

// ============================================================================
// Networking
// ============================================================================

/// A tenant virtual private cloud.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vpc {
    /// VPC ID.
    pub id: Uuid,
    /// Name, unique per tenant.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Owning organization.
    pub org: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site the VPC lives at.
    pub site_id: Uuid,
    /// Virtualization flavour.
    pub network_virtualization_type: NetworkVirtualizationType,
    /// Attached security group.
    pub network_security_group_id: Option<String>,
    /// Default NVLink logical partition for instances in this VPC.
    pub nvlink_logical_partition_id: Option<Uuid>,
    /// ID the site knows the VPC by.
    pub controller_vpc_id: Option<Uuid>,
    /// Labels.
    pub labels: Labels,
    /// Lifecycle status.
    pub status: VpcStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
}

/// Subnet of an Ethernet-virtualizer VPC.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    /// Subnet ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Parent VPC.
    pub vpc_id: Uuid,
    /// Status.
    pub status: ResourceStatus,
}

/// Address prefix of an FNN VPC.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcPrefix {
    /// Prefix ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Parent VPC.
    pub vpc_id: Uuid,
    /// Status.
    pub status: ResourceStatus,
}

/// InfiniBand partition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniBandPartition {
    /// Partition ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// ID the site knows the partition by.
    pub controller_ib_partition_id: Option<Uuid>,
    /// Status.
    pub status: ResourceStatus,
}

/// NVLink logical partition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvLinkLogicalPartition {
    /// Partition ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Status.
    pub status: ResourceStatus,
}

/// Network security group.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroup {
    /// Group ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
}

/// Group of SSH keys injected into instances.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyGroup {
    /// Group ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
}

/// Service that can be deployed onto instance DPUs.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpuExtensionService {
    /// Service ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Published versions.
    pub versions: Vec<String>,
}

// ============================================================================
// Instances
// ============================================================================

/// A tenant compute instance backed by one machine.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    /// Instance ID.
    pub id: Uuid,
    /// Name, unique per tenant and site.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Site, always the VPC's site.
    pub site_id: Uuid,
    /// VPC.
    pub vpc_id: Uuid,
    /// Backing machine.
    pub machine_id: String,
    /// Set only when created by instance type.
    pub instance_type_id: Option<Uuid>,
    /// Allocation that admitted the instance; set only on the type path.
    pub allocation_id: Option<Uuid>,
    /// Constraint the instance counts against; set only on the type path.
    pub allocation_constraint_id: Option<Uuid>,
    /// ID the site knows the instance by.
    pub controller_instance_id: Option<Uuid>,
    /// Custom iPXE script.
    pub ipxe_script: Option<String>,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// Boot with the custom iPXE script on every boot.
    pub always_boot_with_custom_ipxe: bool,
    /// Phone-home on first boot.
    pub phone_home_enabled: bool,
    /// Attached security group.
    pub network_security_group_id: Option<String>,
    /// Labels.
    pub labels: Labels,
    /// Lifecycle status.
    pub status: InstanceStatus,
    /// Power status.
    pub power_status: PowerStatus,
    /// Site stopped reporting the instance.
    pub is_missing_on_site: bool,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Last update time.
    pub updated: DateTime<Utc>,
}

/// Ethernet interface of an instance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interface {
    /// Interface ID.
    pub id: Uuid,
    /// Instance.
    pub instance_id: Uuid,
    /// Subnet, for Ethernet-virtualizer VPCs.
    pub subnet_id: Option<Uuid>,
    /// VPC prefix, for FNN VPCs.
    pub vpc_prefix_id: Option<Uuid>,
    /// DPU device name, multi-Ethernet only.
    pub device: Option<String>,
    /// Device instance index, multi-Ethernet only.
    pub device_instance: Option<i32>,
    /// Virtual function index for non-physical device interfaces.
    pub virtual_function_id: Option<i32>,
    /// Physical function.
    pub is_physical: bool,
    /// Status.
    pub status: InterfaceStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// InfiniBand interface of an instance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniBandInterface {
    /// Interface ID.
    pub id: Uuid,
    /// Instance.
    pub instance_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Partition.
    pub infiniband_partition_id: Uuid,
    /// Device name.
    pub device: String,
    /// Vendor.
    pub vendor: Option<String>,
    /// Device instance index.
    pub device_instance: i32,
    /// Physical function.
    pub is_physical: bool,
    /// Virtual function index.
    pub virtual_function_id: Option<i32>,
    /// Status.
    pub status: InterfaceStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// NVLink interface of an instance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvLinkInterface {
    /// Interface ID.
    pub id: Uuid,
    /// Instance.
    pub instance_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Logical partition.
    pub nvlink_logical_partition_id: Uuid,
    /// GPU device name.
    pub device: Option<String>,
    /// GPU index.
    pub device_instance: i32,
    /// Status.
    pub status: InterfaceStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Deployment of a DPU extension service onto an instance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpuExtensionServiceDeployment {
    /// Deployment ID.
    pub id: Uuid,
    /// Instance.
    pub instance_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Service.
    pub dpu_extension_service_id: Uuid,
    /// Service version.
    pub version: String,
    /// Status.
    pub status: DeploymentStatus,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Link between an SSH key group and an instance.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshKeyGroupInstanceAssociation {
    /// Association ID.
    pub id: Uuid,
    /// Key group.
    pub ssh_key_group_id: Uuid,
    /// Instance.
    pub instance_id: Uuid,
    /// Site.
    pub site_id: Uuid,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Append-only status history entry.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDetail {
    /// Entry ID.
    pub id: Uuid,
    /// Entity the entry belongs to.
    pub entity_id: String,
    /// Status at the time of the entry.
    pub status: String,
    /// Human readable message.
    pub message: String,
    /// Creation time.
    pub created: DateTime<Utc>,
}

/// Whose capabilities to load.
#[derive(Debug, Clone, Copy)]
pub enum CapabilityOwner<'a> {
    /// Capabilities declared on an instance type.
    InstanceType(Uuid),
    /// Capabilities discovered on a machine.
    Machine(&'a str),
}
