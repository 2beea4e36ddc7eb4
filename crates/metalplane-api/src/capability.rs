// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Hardware capability checks for instance interfaces.
//!
//! Capabilities are looked up on the instance type first and fall back to
//! the machine's own discovered capabilities when the type declares none of
//! the category in question.

use std::collections::{HashMap, HashSet};

use metalplane_core::model::{CapabilityOwner, MachineCapability};
use metalplane_core::status::{CapabilityType, DeviceType};
use metalplane_core::store::Reader;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::request::{InfiniBandInterfaceRequest, InterfaceRequest, NvLinkInterfaceRequest};

fn missing(message: impl Into<String>) -> ApiError {
    ApiError::CapabilityMissing(message.into())
}

/// Where capabilities are looked up.
#[derive(Debug, Clone, Copy)]
pub struct CapabilitySource<'a> {
    /// Instance type of the instance, if created by type.
    pub instance_type_id: Option<Uuid>,
    /// Backing machine.
    pub machine_id: &'a str,
}

impl CapabilitySource<'_> {
    /// Load capabilities of one category, optionally narrowed to a device type.
    pub async fn load<R>(
        &self,
        reader: &mut R,
        capability_type: CapabilityType,
        device_type: Option<DeviceType>,
    ) -> Result<Vec<MachineCapability>>
    where
        R: Reader + ?Sized,
    {
        let matches = |c: &MachineCapability| device_type.is_none() || c.device_type == device_type;

        if let Some(instance_type_id) = self.instance_type_id {
            let caps: Vec<_> = reader
                .list_capabilities(CapabilityOwner::InstanceType(instance_type_id), capability_type)
                .await?
                .into_iter()
                .filter(matches)
                .collect();
            if !caps.is_empty() {
                return Ok(caps);
            }
        }

        Ok(reader
            .list_capabilities(CapabilityOwner::Machine(self.machine_id), capability_type)
            .await?
            .into_iter()
            .filter(matches)
            .collect())
    }
}

/// Interfaces to check against one machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterfaceSet<'a> {
    /// Ethernet interfaces.
    pub interfaces: &'a [InterfaceRequest],
    /// InfiniBand interfaces.
    pub infiniband: &'a [InfiniBandInterfaceRequest],
    /// NVLink interfaces.
    pub nvlink: &'a [NvLinkInterfaceRequest],
    /// VPC default NVLink partition.
    pub default_nvlink_partition: Option<Uuid>,
}

/// NVLink interface to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNvLink {
    /// Logical partition.
    pub partition_id: Uuid,
    /// GPU device name, set for generated interfaces.
    pub device: Option<String>,
    /// GPU index.
    pub device_instance: i32,
}

/// Check every interface class against the machine's capabilities.
///
/// Returns the NVLink interfaces to create, which are generated from the VPC
/// default partition when the request names none.
pub async fn validate<R>(
    reader: &mut R,
    source: CapabilitySource<'_>,
    set: InterfaceSet<'_>,
) -> Result<Vec<PlannedNvLink>>
where
    R: Reader + ?Sized,
{
    if !set.infiniband.is_empty() {
        let caps = source
            .load(reader, CapabilityType::InfiniBand, None)
            .await?;
        if caps.is_empty() {
            return Err(missing(
                "InfiniBand Interfaces cannot be specified if Instance Type or Machine doesn't have InfiniBand Capability",
            ));
        }
        validate_infiniband(&caps, set.infiniband)?;
    }

    if set.interfaces.iter().any(InterfaceRequest::is_multi_ethernet) {
        let caps = source
            .load(reader, CapabilityType::Network, Some(DeviceType::Dpu))
            .await?;
        if caps.is_empty() {
            return Err(missing(
                "Device and Device Instance cannot be specified if Instance Type doesn't have Network Capability with DPU device type",
            ));
        }
        validate_multi_ethernet(&caps, set.interfaces)?;
    }

    if set.nvlink.is_empty() && set.default_nvlink_partition.is_none() {
        return Ok(Vec::new());
    }

    let caps = source
        .load(reader, CapabilityType::Gpu, Some(DeviceType::NvLink))
        .await?;

    if !set.nvlink.is_empty() {
        if caps.is_empty() {
            return Err(missing(
                "NVLink Interfaces cannot be specified if Instance Type doesn't have NVLink GPU Capability",
            ));
        }
        validate_nvlink(&caps, set.nvlink)?;
        return Ok(set
            .nvlink
            .iter()
            .map(|i| PlannedNvLink {
                partition_id: i.nvlink_logical_partition_id,
                device: None,
                device_instance: i.device_instance,
            })
            .collect());
    }

    let Some(partition_id) = set.default_nvlink_partition else {
        return Ok(Vec::new());
    };
    Ok(default_nvlink_interfaces(&caps, partition_id))
}

/// One interface per GPU of every NVLink capability, on `partition_id`.
pub fn default_nvlink_interfaces(caps: &[MachineCapability], partition_id: Uuid) -> Vec<PlannedNvLink> {
    caps.iter()
        .filter_map(|cap| cap.count.map(|count| (cap, count)))
        .flat_map(|(cap, count)| {
            (0..count).map(move |device_instance| PlannedNvLink {
                partition_id,
                device: Some(cap.name.clone()),
                device_instance,
            })
        })
        .collect()
}

/// Check device interfaces against DPU network capabilities.
pub fn validate_multi_ethernet(caps: &[MachineCapability], interfaces: &[InterfaceRequest]) -> Result<()> {
    let counts: HashMap<&str, i32> = caps
        .iter()
        .filter_map(|c| c.count.map(|n| (c.name.as_str(), n)))
        .collect();

    let mut seen = HashSet::new();
    for interface in interfaces {
        let (Some(device), Some(instance)) = (&interface.device, interface.device_instance) else {
            continue;
        };
        let slot = if interface.is_physical {
            format!("{device}-{instance}-physical")
        } else {
            format!(
                "{device}-{instance}-virtual-{}",
                interface.virtual_function_id.unwrap_or_default()
            )
        };

        let Some(&count) = counts.get(device.as_str()) else {
            return Err(missing(format!(
                "Device {device} is not present in the Instance Type's network capabilities"
            )));
        };
        if seen.contains(&slot) {
            return Err(missing(format!(
                "Duplicate Interface configuration specified for Device {device}, Device Instance: {instance}"
            )));
        }
        if instance >= count {
            return Err(missing(format!(
                "Device Instance: {instance} for Device {device} exceeds Instance Type's network capability count"
            )));
        }
        seen.insert(slot);
    }
    Ok(())
}

/// Check InfiniBand interfaces against InfiniBand capabilities.
pub fn validate_infiniband(
    caps: &[MachineCapability],
    interfaces: &[InfiniBandInterfaceRequest],
) -> Result<()> {
    let counts: HashMap<&str, i32> = caps
        .iter()
        .filter_map(|c| c.count.map(|n| (c.name.as_str(), n)))
        .collect();
    let inactive: HashMap<&str, &[i32]> = caps
        .iter()
        .map(|c| (c.name.as_str(), c.inactive_devices.as_slice()))
        .collect();
    let vendors: HashSet<&str> = caps.iter().filter_map(|c| c.vendor.as_deref()).collect();

    let mut seen = HashSet::new();
    for interface in interfaces {
        let device = interface.device.as_str();
        let instance = interface.device_instance;

        if !seen.insert((device, instance)) {
            return Err(missing(format!(
                "Duplicate InfiniBand interface configuration specified for Device {device}, Device Instance: {instance}"
            )));
        }
        let Some(&count) = counts.get(device) else {
            return Err(missing(format!(
                "Device {device} is not present in Instance Type's InfiniBand Capabilities"
            )));
        };
        if let Some(vendor) = interface.vendor.as_deref() {
            if !vendors.contains(vendor) {
                return Err(missing(format!(
                    "Vendor {vendor} is not present in Instance Type's InfiniBand Capabilities"
                )));
            }
        }
        if instance >= count {
            return Err(missing(format!(
                "Device Instance: {instance} for Device {device} exceeds Instance Type's InfiniBand Capabilities count"
            )));
        }
        if inactive
            .get(device)
            .is_some_and(|devices| devices.contains(&instance))
        {
            warn!(device, device_instance = instance, "Requested inactive InfiniBand device");
            return Err(missing(format!(
                "Device Instance: {instance} for Device {device} is inactive"
            )));
        }
    }
    Ok(())
}

/// Every GPU must be listed: the interface count equals the capability count.
pub fn validate_nvlink(caps: &[MachineCapability], interfaces: &[NvLinkInterfaceRequest]) -> Result<()> {
    for cap in caps {
        if let Some(count) = cap.count {
            if interfaces.len() != count as usize {
                return Err(missing(
                    "number of NVLink Interfaces must match the number of GPU indexes",
                ));
            }
        }
    }
    Ok(())
}
