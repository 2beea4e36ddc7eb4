// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Eligibility of referenced resources.
//!
//! These checks run before any transaction opens. They confirm that the
//! subnets, prefixes, partitions, security groups, key groups and extension
//! services a request names exist, belong to the tenant and are usable at the
//! instance's site.

use metalplane_core::model::{SshKeyGroup, Vpc};
use metalplane_core::status::{NetworkVirtualizationType, ResourceStatus};
use metalplane_core::store::Reader;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::request::{
    DpuExtensionServiceDeploymentRequest, InfiniBandInterfaceRequest, InterfaceRequest,
    NvLinkInterfaceRequest,
};

fn ineligible(message: impl Into<String>) -> ApiError {
    ApiError::ResourceNotEligible(message.into())
}

/// Subnets and prefixes must be Ready, owned by the tenant and in `vpc`.
pub async fn check_interfaces<R>(
    reader: &mut R,
    tenant_id: Uuid,
    vpc: &Vpc,
    interfaces: &[InterfaceRequest],
) -> Result<()>
where
    R: Reader + ?Sized,
{
    for interface in interfaces {
        if let Some(subnet_id) = interface.subnet_id {
            let subnet = reader.get_subnet(subnet_id).await?.ok_or_else(|| {
                ineligible(format!(
                    "Subnet: {subnet_id} specified in request data is not found in DB"
                ))
            })?;
            if subnet.tenant_id != tenant_id {
                return Err(ineligible(format!(
                    "Subnet: {subnet_id} specified in request is not owned by Tenant"
                )));
            }
            if subnet.status != ResourceStatus::Ready {
                return Err(ineligible(format!(
                    "Subnet: {subnet_id} specified in request data is not in Ready state"
                )));
            }
            if subnet.vpc_id != vpc.id {
                return Err(ineligible(format!(
                    "Subnet: {subnet_id} specified in request does not match with VPC"
                )));
            }
            if vpc.network_virtualization_type != NetworkVirtualizationType::EthernetVirtualizer {
                return Err(ineligible(format!(
                    "VPC: {} specified in request must have Ethernet network virtualization type in order to create Subnet based interfaces",
                    vpc.id
                )));
            }
        }

        if let Some(prefix_id) = interface.vpc_prefix_id {
            let prefix = reader.get_vpc_prefix(prefix_id).await?.ok_or_else(|| {
                ineligible(format!(
                    "VPC Prefix: {prefix_id} specified in request data is not found in DB"
                ))
            })?;
            if prefix.tenant_id != tenant_id {
                return Err(ineligible(format!(
                    "VPC Prefix: {prefix_id} specified in request is not owned by Tenant"
                )));
            }
            if prefix.status != ResourceStatus::Ready {
                return Err(ineligible(format!(
                    "VPC Prefix: {prefix_id} specified in request data is not in Ready state"
                )));
            }
            if prefix.vpc_id != vpc.id {
                return Err(ineligible(format!(
                    "VPC Prefix: {prefix_id} specified in request does not match with VPC"
                )));
            }
            if vpc.network_virtualization_type != NetworkVirtualizationType::Fnn {
                return Err(ineligible(format!(
                    "VPC: {} specified in request must have FNN network virtualization type in order to create VPC Prefix based interfaces",
                    vpc.id
                )));
            }
        }
    }
    Ok(())
}

/// InfiniBand partitions must be at the site, owned by the tenant and Ready.
pub async fn check_infiniband<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    interfaces: &[InfiniBandInterfaceRequest],
) -> Result<()>
where
    R: Reader + ?Sized,
{
    for interface in interfaces {
        let id = interface.partition_id;
        let partition = reader.get_infiniband_partition(id).await?.ok_or_else(|| {
            ineligible(format!(
                "Could not find InfiniBand Partition with ID: {id} specified in request data"
            ))
        })?;
        if partition.site_id != site_id {
            return Err(ineligible(format!(
                "InfiniBand Partition: {id} specified in request does not match with Instance Site"
            )));
        }
        if partition.tenant_id != tenant_id {
            return Err(ineligible(format!(
                "InfiniBand Partition: {id} specified in request is not owned by Tenant"
            )));
        }
        if partition.controller_ib_partition_id.is_none()
            || partition.status != ResourceStatus::Ready
        {
            return Err(ineligible(format!(
                "InfiniBand Partition: {id} specified in request data is not in Ready state"
            )));
        }
    }
    Ok(())
}

/// NVLink partitions must match the VPC default, or else be at the site,
/// owned by the tenant and Ready.
pub async fn check_nvlink<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    default_partition: Option<Uuid>,
    interfaces: &[NvLinkInterfaceRequest],
) -> Result<()>
where
    R: Reader + ?Sized,
{
    for interface in interfaces {
        let id = interface.nvlink_logical_partition_id;
        let partition = reader.get_nvlink_partition(id).await?.ok_or_else(|| {
            ineligible(format!(
                "Could not find NVLink Logical Partition with ID: {id} specified in request data"
            ))
        })?;

        if let Some(default) = default_partition {
            if partition.id != default {
                return Err(ineligible(
                    "NVLink Logical Partition specified for NVLink Interface does not match NVLink Logical Partition of VPC",
                ));
            }
            continue;
        }

        if partition.site_id != site_id {
            return Err(ineligible(format!(
                "NVLink Logical Partition: {id} specified in request does not match with Instance Site"
            )));
        }
        if partition.tenant_id != tenant_id {
            return Err(ineligible(format!(
                "NVLink Logical Partition: {id} specified in request data is not owned by Tenant"
            )));
        }
        if partition.status != ResourceStatus::Ready {
            return Err(ineligible(format!(
                "NVLink Logical Partition: {id} specified in request data is not in Ready state"
            )));
        }
    }
    Ok(())
}

/// The security group must exist at the site and belong to the tenant.
pub async fn check_network_security_group<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    group_id: &str,
) -> Result<()>
where
    R: Reader + ?Sized,
{
    let group = reader
        .get_network_security_group(group_id)
        .await?
        .ok_or_else(|| {
            ineligible(format!(
                "Could not find NetworkSecurityGroup with ID: {group_id} specified in request"
            ))
        })?;
    if group.site_id != site_id {
        warn!(group_id, site_id = %site_id, "Security group belongs to another site");
        return Err(ApiError::forbidden(
            "NetworkSecurityGroup with ID specified in request data does not belong to Site",
        ));
    }
    if group.tenant_id != tenant_id {
        return Err(ApiError::forbidden(
            "NetworkSecurityGroup with ID specified in request data does not belong to Tenant",
        ));
    }
    Ok(())
}

/// Key groups must belong to the tenant and be associated with the site.
pub async fn check_ssh_key_groups<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    group_ids: &[Uuid],
) -> Result<Vec<SshKeyGroup>>
where
    R: Reader + ?Sized,
{
    let mut groups = Vec::with_capacity(group_ids.len());
    for &id in group_ids {
        let group = reader.get_ssh_key_group(id).await?.ok_or_else(|| {
            ineligible(format!(
                "SSH Key Group: {id} specified in request data was not found in DB"
            ))
        })?;
        if group.tenant_id != tenant_id {
            return Err(ineligible(format!(
                "SSH Key Group with ID: {id} does not belong to Tenant"
            )));
        }
        if !reader.is_ssh_key_group_at_site(id, site_id).await? {
            return Err(ineligible(format!(
                "SSH Key Group: {id} specified in request data is not associated with the Site where Instance is being created"
            )));
        }
        if !groups.iter().any(|g: &SshKeyGroup| g.id == id) {
            groups.push(group);
        }
    }
    Ok(groups)
}

/// Extension services must belong to the tenant, live at the site and
/// publish the requested version.
pub async fn check_dpu_deployments<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    deployments: &[DpuExtensionServiceDeploymentRequest],
) -> Result<()>
where
    R: Reader + ?Sized,
{
    for deployment in deployments {
        let id = deployment.dpu_extension_service_id;
        let service = reader.get_dpu_extension_service(id).await?.ok_or_else(|| {
            ineligible(format!(
                "DPU Extension Service: {id} specified in request data is not found in DB"
            ))
        })?;
        if service.tenant_id != tenant_id {
            return Err(ApiError::forbidden(format!(
                "DPU Extension Service: {id} does not belong to current Tenant"
            )));
        }
        if service.site_id != site_id {
            return Err(ApiError::forbidden(format!(
                "DPU Extension Service: {id} does not belong to Site where Instance is being created"
            )));
        }
        if !service.versions.iter().any(|v| v == &deployment.version) {
            return Err(ineligible(format!(
                "Version: {} was not found for DPU Extension Service: {id}",
                deployment.version
            )));
        }
    }
    Ok(())
}
