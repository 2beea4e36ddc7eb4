// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Request bodies and their shape validation.
//!
//! Everything here is pure: checks that need the store live in
//! [`crate::eligibility`] and [`crate::capability`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Maximum interfaces per instance.
pub const MAX_INTERFACE_COUNT: usize = 16;

/// Maximum labels per instance or VPC.
pub const MAX_LABEL_COUNT: usize = 10;

/// Maximum label key and value length.
pub const MAX_LABEL_LENGTH: usize = 255;

/// Maximum description length.
pub const MAX_DESCRIPTION_LENGTH: usize = 1024;

const NAME_LENGTH_ERROR: &str = "must contain at least 2 characters and a maximum of 256 characters";
const DESCRIPTION_LENGTH_ERROR: &str = "cannot exceed a maximum of 1024 characters";

fn invalid(message: impl Into<String>) -> ApiError {
    ApiError::Validation(message.into())
}

fn validate_name(field: &str, name: &str) -> Result<()> {
    let length = name.trim().chars().count();
    if !(2..=256).contains(&length) {
        return Err(invalid(format!("{field} {NAME_LENGTH_ERROR}")));
    }
    Ok(())
}

fn validate_description(description: Option<&str>) -> Result<()> {
    if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH) {
        return Err(invalid(format!("description {DESCRIPTION_LENGTH_ERROR}")));
    }
    Ok(())
}

/// Validate tenant-supplied labels.
pub fn validate_labels(labels: &BTreeMap<String, String>) -> Result<()> {
    if labels.len() > MAX_LABEL_COUNT {
        return Err(invalid(format!(
            "up to {MAX_LABEL_COUNT} key/value pairs can be specified in labels"
        )));
    }
    for (key, value) in labels {
        if key.is_empty() {
            return Err(invalid("one or more labels do not have a key specified"));
        }
        if key.trim().is_empty() || key.chars().count() > MAX_LABEL_LENGTH {
            return Err(invalid(
                "Label key must contain at least 1 character and a maximum of 255 characters",
            ));
        }
        if value.chars().count() > MAX_LABEL_LENGTH {
            return Err(invalid(
                "Label value cannot exceed a maximum of 255 characters",
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Interfaces
// ============================================================================

/// Ethernet interface in a create or update request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRequest {
    /// Subnet, for Ethernet-virtualizer VPCs.
    pub subnet_id: Option<Uuid>,
    /// VPC prefix, for FNN VPCs.
    pub vpc_prefix_id: Option<Uuid>,
    /// DPU device name.
    pub device: Option<String>,
    /// DPU device instance.
    pub device_instance: Option<i32>,
    /// Virtual function for non-physical device interfaces.
    pub virtual_function_id: Option<i32>,
    /// Physical function.
    #[serde(default)]
    pub is_physical: bool,
}

impl InterfaceRequest {
    /// Whether the interface targets a specific DPU device.
    pub fn is_multi_ethernet(&self) -> bool {
        self.device.is_some() && self.device_instance.is_some()
    }

    /// Validate one interface in isolation.
    pub fn validate(&self) -> Result<()> {
        if self.device_instance.is_some_and(|i| i < 0) {
            return Err(invalid("deviceInstance must be equal or greater than 0"));
        }
        if self
            .virtual_function_id
            .is_some_and(|vf| !(1..=16).contains(&vf))
        {
            return Err(invalid("virtualFunctionId must be between 1 and 16"));
        }
        if self.subnet_id.is_some() && self.vpc_prefix_id.is_some() {
            return Err(invalid(
                "`subnetId` and `vpcPrefixId` cannot be specified together",
            ));
        }
        if self.subnet_id.is_none() && self.vpc_prefix_id.is_none() {
            return Err(invalid("either `subnetId` or `vpcPrefixId` must be specified"));
        }
        if self.device.is_some() {
            if self.device_instance.is_none() {
                return Err(invalid(
                    "deviceInstance must be specified when `device` is specified",
                ));
            }
            if self.vpc_prefix_id.is_none() {
                return Err(invalid(
                    "vpcPrefixId must be specified when `device` and `deviceInstance` are specified",
                ));
            }
            if !self.is_physical && self.virtual_function_id.is_none() {
                return Err(invalid(
                    "virtualFunctionId must be specified when `device` and `deviceInstance` are specified and `isPhysical` is false",
                ));
            }
        } else if self.device_instance.is_some() {
            return Err(invalid(
                "device must be specified when `deviceInstance` is specified",
            ));
        }
        Ok(())
    }
}

/// Validate an interface list as a whole.
///
/// For single-Ethernet lists with no physical interface the first one is
/// marked physical.
pub fn validate_interfaces(interfaces: &mut [InterfaceRequest]) -> Result<()> {
    let mut prefix_based = 0;
    let mut subnet_based = 0;
    let mut multi_ethernet = 0;
    let mut single_ethernet = 0;
    let mut physical = 0;

    for interface in interfaces.iter() {
        interface.validate()?;
        if interface.vpc_prefix_id.is_some() {
            prefix_based += 1;
        } else {
            subnet_based += 1;
        }
        if interface.is_multi_ethernet() {
            multi_ethernet += 1;
        } else {
            single_ethernet += 1;
        }
        if interface.is_physical {
            physical += 1;
        }
    }

    if prefix_based > 0 && subnet_based > 0 {
        return Err(invalid(
            "either all interfaces must be VPC Prefix based or all of them must be Subnet based",
        ));
    }
    if multi_ethernet > 0 && single_ethernet > 0 {
        return Err(invalid(
            "either all interfaces must specify device/deviceInstance or none of them should specify those fields",
        ));
    }
    if single_ethernet > 0 {
        if physical > 1 {
            return Err(invalid(
                "only one interface can be marked as physical for single-Ethernet interfaces",
            ));
        }
        if physical == 0 {
            if let Some(first) = interfaces.first_mut() {
                first.is_physical = true;
            }
        }
    }
    Ok(())
}

/// InfiniBand interface in a create or update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfiniBandInterfaceRequest {
    /// Partition.
    pub partition_id: Uuid,
    /// Device name.
    pub device: String,
    /// Vendor.
    pub vendor: Option<String>,
    /// Device instance.
    pub device_instance: i32,
    /// Must be true.
    #[serde(default = "default_true")]
    pub is_physical: bool,
    /// Not supported.
    pub virtual_function_id: Option<i32>,
}

fn default_true() -> bool {
    true
}

impl InfiniBandInterfaceRequest {
    /// Validate one interface in isolation.
    pub fn validate(&self) -> Result<()> {
        if self.device.is_empty() {
            return Err(invalid("device is required"));
        }
        if self.device_instance < 0 {
            return Err(invalid("deviceInstance must be equal or greater than 0"));
        }
        if !self.is_physical {
            return Err(invalid(
                "isPhysical must be set to true. Virtual functions are currently not supported for InfiniBand interfaces",
            ));
        }
        if self.virtual_function_id.is_some() {
            return Err(invalid(
                "virtual functions are currently not supported for InfiniBand interfaces",
            ));
        }
        Ok(())
    }
}

/// NVLink interface in a create or update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NvLinkInterfaceRequest {
    /// Logical partition.
    #[serde(rename = "nvLinkLogicalPartitionId")]
    pub nvlink_logical_partition_id: Uuid,
    /// GPU index, 0 to 3.
    pub device_instance: i32,
}

/// Validate NVLink interfaces, returning the shared partition if any.
pub fn validate_nvlink_interfaces(interfaces: &[NvLinkInterfaceRequest]) -> Result<Option<Uuid>> {
    let mut partition = None;
    for interface in interfaces {
        if !(0..=3).contains(&interface.device_instance) {
            return Err(invalid("deviceInstance must be between 0 and 3"));
        }
        match partition {
            None => partition = Some(interface.nvlink_logical_partition_id),
            Some(id) if id != interface.nvlink_logical_partition_id => {
                return Err(invalid(
                    "all the NVLink Interfaces must have same NVLink Logical Partition",
                ));
            }
            Some(_) => {}
        }
    }
    Ok(partition)
}

/// DPU extension service to deploy onto the instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DpuExtensionServiceDeploymentRequest {
    /// Service.
    pub dpu_extension_service_id: Uuid,
    /// Version.
    pub version: String,
}

/// Reject repeated `(service, version)` pairs.
pub fn validate_dpu_deployments(deployments: &[DpuExtensionServiceDeploymentRequest]) -> Result<()> {
    let mut seen = HashSet::new();
    for deployment in deployments {
        if deployment.version.is_empty() {
            return Err(invalid("version is required"));
        }
        let key = format!(
            "{}:{}",
            deployment.dpu_extension_service_id, deployment.version
        );
        if !seen.insert(key.clone()) {
            return Err(invalid(format!(
                "duplicate deployment requests found for DPU Extension Service ID and version: {key}"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Instances
// ============================================================================

/// Body of `POST .../instance`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCreateRequest {
    /// Name, unique per tenant and site.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Tenant the instance is created for.
    pub tenant_id: Uuid,
    /// Pick any free machine of this type.
    pub instance_type_id: Option<Uuid>,
    /// Use this machine.
    pub machine_id: Option<String>,
    /// Accept a machine that is not Ready.
    pub allow_unhealthy_machine: Option<bool>,
    /// VPC; decides the site.
    pub vpc_id: Uuid,
    /// Security group.
    pub network_security_group_id: Option<String>,
    /// iPXE script.
    pub ipxe_script: Option<String>,
    /// Cloud-init user data.
    pub user_data: Option<String>,
    /// Boot the custom iPXE script every time.
    pub always_boot_with_custom_ipxe: Option<bool>,
    /// Phone-home on first boot.
    pub phone_home_enabled: Option<bool>,
    /// Labels.
    pub labels: Option<BTreeMap<String, String>>,
    /// Ethernet interfaces.
    #[serde(default)]
    pub interfaces: Vec<InterfaceRequest>,
    /// InfiniBand interfaces.
    #[serde(default)]
    pub infiniband_interfaces: Vec<InfiniBandInterfaceRequest>,
    /// NVLink interfaces.
    #[serde(default, rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Vec<NvLinkInterfaceRequest>,
    /// SSH key groups.
    #[serde(default)]
    pub ssh_key_group_ids: Vec<Uuid>,
    /// DPU extension services.
    #[serde(default)]
    pub dpu_extension_service_deployments: Vec<DpuExtensionServiceDeploymentRequest>,
}

impl InstanceCreateRequest {
    /// Validate the request shape, normalizing interfaces in place.
    pub fn validate(&mut self) -> Result<()> {
        validate_name("name", &self.name)?;
        validate_description(self.description.as_deref())?;

        if self.interfaces.is_empty() {
            return Err(invalid("at least one Interface must be specified"));
        }
        if self.interfaces.len() > MAX_INTERFACE_COUNT {
            return Err(invalid(format!(
                "at most {MAX_INTERFACE_COUNT} Interfaces can be specified"
            )));
        }

        match (&self.instance_type_id, &self.machine_id) {
            (Some(_), Some(_)) => {
                return Err(invalid(
                    "only one of `instanceTypeId` or `machineId` can be specified in request, not both",
                ));
            }
            (None, None) => {
                return Err(invalid(
                    "either `instanceTypeId` or `machineId` must be specified",
                ));
            }
            _ => {}
        }

        match self.ipxe_script.as_deref() {
            None => return Err(invalid("`ipxeScript` must be specified")),
            Some("") => return Err(invalid("`ipxeScript` cannot be empty")),
            Some(_) => {}
        }

        validate_interfaces(&mut self.interfaces)?;
        for interface in &self.infiniband_interfaces {
            interface.validate()?;
        }
        validate_dpu_deployments(&self.dpu_extension_service_deployments)?;
        validate_nvlink_interfaces(&self.nvlink_interfaces)?;

        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        Ok(())
    }
}

/// Body of `PATCH .../instance/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceUpdateRequest {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// Reboot instead of updating.
    pub trigger_reboot: Option<bool>,
    /// Reboot into the custom iPXE script.
    pub reboot_with_custom_ipxe: Option<bool>,
    /// Apply pending updates during the reboot.
    pub apply_updates_on_reboot: Option<bool>,
    /// New iPXE script.
    pub ipxe_script: Option<String>,
    /// New user data.
    pub user_data: Option<String>,
    /// Boot the custom iPXE script every time.
    pub always_boot_with_custom_ipxe: Option<bool>,
    /// Phone-home on first boot.
    pub phone_home_enabled: Option<bool>,
    /// Replacement labels.
    pub labels: Option<BTreeMap<String, String>>,
    /// New security group; empty string detaches.
    pub network_security_group_id: Option<String>,
    /// Replacement Ethernet interfaces.
    pub interfaces: Option<Vec<InterfaceRequest>>,
    /// Replacement InfiniBand interfaces.
    pub infiniband_interfaces: Option<Vec<InfiniBandInterfaceRequest>>,
    /// Replacement NVLink interfaces.
    #[serde(rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Option<Vec<NvLinkInterfaceRequest>>,
    /// Replacement SSH key groups.
    pub ssh_key_group_ids: Option<Vec<Uuid>>,
    /// Replacement DPU extension deployments.
    pub dpu_extension_service_deployments: Option<Vec<DpuExtensionServiceDeploymentRequest>>,
}

impl InstanceUpdateRequest {
    /// Whether the request asks for a reboot.
    pub fn is_reboot(&self) -> bool {
        self.trigger_reboot == Some(true)
    }

    /// Whether any instance attribute is being changed.
    pub fn is_update(&self) -> bool {
        self.name.is_some()
            || self.description.is_some()
            || self.ipxe_script.is_some()
            || self.user_data.is_some()
            || self.always_boot_with_custom_ipxe.is_some()
            || self.phone_home_enabled.is_some()
            || self.labels.is_some()
            || self.network_security_group_id.is_some()
            || self.interfaces.is_some()
            || self.infiniband_interfaces.is_some()
            || self.nvlink_interfaces.is_some()
            || self.ssh_key_group_ids.is_some()
            || self.dpu_extension_service_deployments.is_some()
    }

    /// Whether the network configuration of the instance changes.
    pub fn changes_interfaces(&self) -> bool {
        self.interfaces.is_some()
            || self.infiniband_interfaces.is_some()
            || self.nvlink_interfaces.is_some()
    }

    /// Validate the request shape, normalizing interfaces in place.
    pub fn validate(&mut self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name("name", name)?;
        }
        validate_description(self.description.as_deref())?;

        if let Some(interfaces) = &self.interfaces {
            if interfaces.len() > MAX_INTERFACE_COUNT {
                return Err(invalid(format!(
                    "at most {MAX_INTERFACE_COUNT} Interfaces can be specified"
                )));
            }
        }

        if self.is_reboot() && self.is_update() {
            return Err(invalid(
                "reboot cannot be triggered if Instance attributes are being updated in the same request",
            ));
        }
        if !self.is_reboot() {
            if self.reboot_with_custom_ipxe == Some(true) {
                return Err(invalid(
                    "`rebootWithCustomIpxe` can only be specified when `triggerReboot` is specified",
                ));
            }
            if self.apply_updates_on_reboot == Some(true) {
                return Err(invalid(
                    "`applyUpdatesOnReboot` can only be specified when `triggerReboot` is specified",
                ));
            }
        }

        if let Some(interfaces) = self.interfaces.as_mut() {
            if !interfaces.is_empty() {
                validate_interfaces(interfaces)?;
            }
        }
        for interface in self.infiniband_interfaces.iter().flatten() {
            interface.validate()?;
        }
        if let Some(deployments) = &self.dpu_extension_service_deployments {
            validate_dpu_deployments(deployments)?;
        }
        if let Some(interfaces) = &self.nvlink_interfaces {
            validate_nvlink_interfaces(interfaces)?;
        }
        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        Ok(())
    }
}

/// Machine health categories accepted on delete.
pub const MACHINE_ISSUE_CATEGORIES: [&str; 4] = ["Hardware", "Network", "Performance", "Other"];

/// Health problem reported with an instance deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineHealthIssue {
    /// One of [`MACHINE_ISSUE_CATEGORIES`].
    pub category: String,
    /// Short summary.
    pub summary: Option<String>,
    /// Details.
    pub details: Option<String>,
}

impl MachineHealthIssue {
    /// Validate the report.
    pub fn validate(&self) -> Result<()> {
        if !MACHINE_ISSUE_CATEGORIES.contains(&self.category.as_str()) {
            return Err(invalid(format!(
                "category must be one of: {}",
                MACHINE_ISSUE_CATEGORIES.join(", ")
            )));
        }
        match self.summary.as_deref() {
            None | Some("") => return Err(invalid("summary is required")),
            Some(summary) if summary.chars().count() > MAX_DESCRIPTION_LENGTH => {
                return Err(invalid("summary cannot exceed a maximum of 1024 characters"));
            }
            Some(_) => {}
        }
        if self
            .details
            .as_deref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH)
        {
            return Err(invalid("details cannot exceed a maximum of 1024 characters"));
        }
        Ok(())
    }
}

/// Optional body of `DELETE .../instance/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDeleteRequest {
    /// Report a problem with the backing machine.
    pub machine_health_issue: Option<MachineHealthIssue>,
    /// Send the machine to the repair tenant after release.
    pub is_repair_tenant: Option<bool>,
}

impl InstanceDeleteRequest {
    /// Validate the request.
    pub fn validate(&self) -> Result<()> {
        if let Some(issue) = &self.machine_health_issue {
            issue.validate()?;
        }
        Ok(())
    }
}

// ============================================================================
// VPCs
// ============================================================================

/// Body of `POST .../vpc`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcCreateRequest {
    /// Name, unique per tenant.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Site.
    pub site_id: Uuid,
    /// `ETHERNET_VIRTUALIZER` or `FNN`; defaults from site capabilities.
    pub network_virtualization_type: Option<String>,
    /// Security group.
    pub network_security_group_id: Option<String>,
    /// Default NVLink logical partition.
    pub nvlink_logical_partition_id: Option<Uuid>,
    /// Labels.
    pub labels: Option<BTreeMap<String, String>>,
}

impl VpcCreateRequest {
    /// Validate the request shape.
    pub fn validate(&self) -> Result<()> {
        validate_name("name", &self.name)?;
        validate_description(self.description.as_deref())?;
        if let Some(ty) = self.network_virtualization_type.as_deref() {
            if metalplane_core::status::NetworkVirtualizationType::parse(ty).is_none() {
                return Err(invalid(
                    "either ETHERNET_VIRTUALIZER or FNN are currently supported",
                ));
            }
        }
        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        Ok(())
    }
}

/// Body of `PATCH .../vpc/{id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcUpdateRequest {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New security group; empty string detaches.
    pub network_security_group_id: Option<String>,
    /// New default NVLink logical partition.
    pub nvlink_logical_partition_id: Option<Uuid>,
    /// Replacement labels.
    pub labels: Option<BTreeMap<String, String>>,
}

impl VpcUpdateRequest {
    /// Validate the request shape.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.name {
            validate_name("name", name)?;
        }
        validate_description(self.description.as_deref())?;
        if let Some(labels) = &self.labels {
            validate_labels(labels)?;
        }
        Ok(())
    }
}

/// Body of `PATCH .../vpc/{id}/virtualization`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcVirtualizationUpdateRequest {
    /// Target virtualization type; only `FNN` is accepted.
    pub network_virtualization_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subnet_interface() -> InterfaceRequest {
        InterfaceRequest {
            subnet_id: Some(Uuid::new_v4()),
            ..Default::default()
        }
    }

    fn device_interface(device: &str, instance: i32, vf: Option<i32>) -> InterfaceRequest {
        InterfaceRequest {
            vpc_prefix_id: Some(Uuid::new_v4()),
            device: Some(device.to_string()),
            device_instance: Some(instance),
            virtual_function_id: vf,
            is_physical: vf.is_none(),
            ..Default::default()
        }
    }

    fn create_request() -> InstanceCreateRequest {
        InstanceCreateRequest {
            name: "web-01".to_string(),
            tenant_id: Uuid::new_v4(),
            instance_type_id: Some(Uuid::new_v4()),
            vpc_id: Uuid::new_v4(),
            ipxe_script: Some("#!ipxe".to_string()),
            interfaces: vec![subnet_interface()],
            ..Default::default()
        }
    }

    #[test]
    fn test_first_single_ethernet_interface_becomes_physical() {
        let mut interfaces = vec![subnet_interface(), subnet_interface()];
        validate_interfaces(&mut interfaces).unwrap();
        assert!(interfaces[0].is_physical);
        assert!(!interfaces[1].is_physical);
    }

    #[test]
    fn test_two_physical_single_ethernet_interfaces_rejected() {
        let mut a = subnet_interface();
        a.is_physical = true;
        let mut interfaces = vec![a.clone(), a];
        let err = validate_interfaces(&mut interfaces).unwrap_err();
        assert_eq!(
            err.to_string(),
            "only one interface can be marked as physical for single-Ethernet interfaces"
        );
    }

    #[test]
    fn test_mixed_subnet_and_prefix_rejected() {
        let prefix = InterfaceRequest {
            vpc_prefix_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let mut interfaces = vec![subnet_interface(), prefix];
        let err = validate_interfaces(&mut interfaces).unwrap_err();
        assert!(err.to_string().contains("VPC Prefix based"));
    }

    #[test]
    fn test_mixed_device_and_plain_rejected() {
        let plain = InterfaceRequest {
            vpc_prefix_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        let mut interfaces = vec![device_interface("dpu0", 0, None), plain];
        let err = validate_interfaces(&mut interfaces).unwrap_err();
        assert!(err.to_string().contains("device/deviceInstance"));
    }

    #[test]
    fn test_interface_rules() {
        let both = InterfaceRequest {
            subnet_id: Some(Uuid::new_v4()),
            vpc_prefix_id: Some(Uuid::new_v4()),
            ..Default::default()
        };
        assert!(both.validate().is_err());
        assert!(InterfaceRequest::default().validate().is_err());

        let virtual_without_vf = InterfaceRequest {
            is_physical: false,
            ..device_interface("dpu0", 0, None)
        };
        assert!(
            virtual_without_vf
                .validate()
                .unwrap_err()
                .to_string()
                .starts_with("virtualFunctionId must be specified")
        );

        assert!(device_interface("dpu0", 0, Some(17)).validate().is_err());
        assert!(device_interface("dpu0", 0, Some(16)).validate().is_ok());

        let orphan_instance = InterfaceRequest {
            vpc_prefix_id: Some(Uuid::new_v4()),
            device_instance: Some(1),
            ..Default::default()
        };
        assert!(orphan_instance.validate().is_err());
    }

    #[test]
    fn test_create_requires_exactly_one_target() {
        let mut request = create_request();
        request.machine_id = Some("m-1".to_string());
        assert_eq!(
            request.validate().unwrap_err().to_string(),
            "only one of `instanceTypeId` or `machineId` can be specified in request, not both"
        );

        let mut request = create_request();
        request.instance_type_id = None;
        assert_eq!(
            request.validate().unwrap_err().to_string(),
            "either `instanceTypeId` or `machineId` must be specified"
        );
    }

    #[test]
    fn test_create_interface_bounds() {
        let mut request = create_request();
        request.interfaces.clear();
        assert!(request.validate().is_err());

        let mut request = create_request();
        request.interfaces = (0..17).map(|_| subnet_interface()).collect();
        assert_eq!(
            request.validate().unwrap_err().to_string(),
            "at most 16 Interfaces can be specified"
        );
    }

    #[test]
    fn test_name_and_labels() {
        let mut request = create_request();
        request.name = "a".to_string();
        assert!(request.validate().is_err());

        let mut labels = BTreeMap::new();
        for i in 0..11 {
            labels.insert(format!("k{i}"), "v".to_string());
        }
        assert!(validate_labels(&labels).is_err());

        let mut labels = BTreeMap::new();
        labels.insert(String::new(), "v".to_string());
        assert_eq!(
            validate_labels(&labels).unwrap_err().to_string(),
            "one or more labels do not have a key specified"
        );
    }

    #[test]
    fn test_nvlink_interfaces_share_partition() {
        let partition = Uuid::new_v4();
        let ok = vec![
            NvLinkInterfaceRequest {
                nvlink_logical_partition_id: partition,
                device_instance: 0,
            },
            NvLinkInterfaceRequest {
                nvlink_logical_partition_id: partition,
                device_instance: 1,
            },
        ];
        assert_eq!(validate_nvlink_interfaces(&ok).unwrap(), Some(partition));

        let mixed = vec![
            ok[0].clone(),
            NvLinkInterfaceRequest {
                nvlink_logical_partition_id: Uuid::new_v4(),
                device_instance: 1,
            },
        ];
        assert!(validate_nvlink_interfaces(&mixed).is_err());

        let out_of_range = vec![NvLinkInterfaceRequest {
            nvlink_logical_partition_id: partition,
            device_instance: 4,
        }];
        assert!(validate_nvlink_interfaces(&out_of_range).is_err());
    }

    #[test]
    fn test_duplicate_dpu_deployment_rejected() {
        let deployment = DpuExtensionServiceDeploymentRequest {
            dpu_extension_service_id: Uuid::new_v4(),
            version: "1.0".to_string(),
        };
        let err = validate_dpu_deployments(&[deployment.clone(), deployment]).unwrap_err();
        assert!(err.to_string().starts_with("duplicate deployment requests"));
    }

    #[test]
    fn test_infiniband_interface_must_be_physical() {
        let interface = InfiniBandInterfaceRequest {
            partition_id: Uuid::new_v4(),
            device: "MT28908".to_string(),
            vendor: None,
            device_instance: 0,
            is_physical: false,
            virtual_function_id: None,
        };
        assert!(interface.validate().is_err());
    }

    #[test]
    fn test_update_reboot_is_exclusive() {
        let mut request = InstanceUpdateRequest {
            trigger_reboot: Some(true),
            name: Some("renamed".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let mut request = InstanceUpdateRequest {
            apply_updates_on_reboot: Some(true),
            ..Default::default()
        };
        assert!(request.validate().is_err());

        let mut request = InstanceUpdateRequest {
            trigger_reboot: Some(true),
            apply_updates_on_reboot: Some(true),
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_machine_health_issue() {
        let issue = MachineHealthIssue {
            category: "Hardware".to_string(),
            summary: Some("fan failure".to_string()),
            details: None,
        };
        assert!(issue.validate().is_ok());

        let bad = MachineHealthIssue {
            category: "Cosmic".to_string(),
            ..issue.clone()
        };
        assert!(bad.validate().is_err());

        let missing = MachineHealthIssue {
            summary: None,
            ..issue
        };
        assert!(missing.validate().is_err());
    }

    #[test]
    fn test_vpc_virtualization_type_checked() {
        let request = VpcCreateRequest {
            name: "vpc-1".to_string(),
            site_id: Uuid::new_v4(),
            network_virtualization_type: Some("VXLAN".to_string()),
            ..Default::default()
        };
        assert!(request.validate().is_err());
    }
}
