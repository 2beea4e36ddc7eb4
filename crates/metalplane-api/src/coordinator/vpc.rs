// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! VPC create, update, virtualization change and delete.

use chrono::Utc;
use metalplane_core::model::{Site, StatusDetail, Tenant, Vpc};
use metalplane_core::status::{self, NetworkVirtualizationType, ResourceStatus, VpcStatus};
use metalplane_core::store::{Reader, Transaction};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    Coordinator, invalid_transition, registered_site, require_allocation, rollback,
    status_history, tenant_for_org, to_payload,
};
use crate::eligibility;
use crate::error::{ApiError, Result};
use crate::request::{VpcCreateRequest, VpcUpdateRequest, VpcVirtualizationUpdateRequest};
use crate::workflow::WorkflowOp;

/// A VPC with its status history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcRecord {
    /// The VPC row.
    #[serde(flatten)]
    pub vpc: Vpc,
    /// Status history, oldest first.
    pub status_history: Vec<StatusDetail>,
}

impl Coordinator {
    /// Create a VPC and provision it on its site.
    #[instrument(skip(self, request, cancel), fields(name = %request.name))]
    pub async fn create_vpc(
        &self,
        org: &str,
        request: VpcCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<VpcRecord> {
        request.validate()?;
        let (tenant, site, virtualization) = self.validate_create_vpc(org, &request).await?;

        let op = WorkflowOp::CreateVpc;
        let mut tx = self.begin(op).await?;
        let prepared = persist_new_vpc(tx.as_mut(), org, &tenant, &site, virtualization, &request)
            .await;
        let (record, payload) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };

        let vpc_id = record.vpc.id;
        self.run_and_settle(tx, site.id, op, vpc_id, payload, cancel)
            .await?;

        info!(vpc_id = %vpc_id, site_id = %site.id, tenant_id = %tenant.id, "VPC created");
        Ok(record)
    }

    async fn validate_create_vpc(
        &self,
        org: &str,
        request: &VpcCreateRequest,
    ) -> Result<(Tenant, Site, NetworkVirtualizationType)> {
        let mut reader = self.reader().await?;
        let reader = reader.as_mut();

        let site = registered_site(
            reader,
            request.site_id,
            "Could not find Site with ID specified in request data",
            "Site specified in request data must be in Registered state in order to proceed",
        )
        .await?;

        let tenant = tenant_for_org(reader, org, ApiError::Forbidden).await?;
        require_allocation(
            reader,
            tenant.id,
            site.id,
            "Tenant does not have any Allocations for Site specified in request data",
        )
        .await?;

        if let Some(group_id) = request.network_security_group_id.as_deref() {
            eligibility::check_network_security_group(reader, tenant.id, site.id, group_id)
                .await?;
        }

        let virtualization = match request
            .network_virtualization_type
            .as_deref()
            .and_then(NetworkVirtualizationType::parse)
        {
            Some(requested) => requested,
            None if site.native_networking_enabled => NetworkVirtualizationType::Fnn,
            None => NetworkVirtualizationType::EthernetVirtualizer,
        };
        if virtualization == NetworkVirtualizationType::Fnn && !site.native_networking_enabled {
            return Err(ApiError::validation(
                "Site specified in request data must have native networking enabled in order to create FNN VPCs",
            ));
        }

        if let Some(partition_id) = request.nvlink_logical_partition_id {
            if !site.nvlink_partition_enabled {
                return Err(ApiError::validation(
                    "Site specified in request data must have NVLink Partition enabled in order to create VPC with default NVLink Partition",
                ));
            }
            check_default_partition(reader, tenant.id, site.id, partition_id).await?;
        }

        Ok((tenant, site, virtualization))
    }

    /// Update VPC attributes.
    #[instrument(skip(self, request, cancel))]
    pub async fn update_vpc(
        &self,
        org: &str,
        vpc_id: Uuid,
        request: VpcUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<VpcRecord> {
        request.validate()?;
        self.validate_update_vpc(org, vpc_id, &request).await?;

        let op = WorkflowOp::UpdateVpc;
        let mut tx = self.begin(op).await?;
        let (record, payload) = match apply_vpc_update(tx.as_mut(), vpc_id, &request).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, record.vpc.site_id, op, vpc_id, payload, cancel)
            .await?;

        info!(vpc_id = %vpc_id, "VPC updated");
        Ok(record)
    }

    async fn validate_update_vpc(
        &self,
        org: &str,
        vpc_id: Uuid,
        request: &VpcUpdateRequest,
    ) -> Result<()> {
        let mut reader = self.reader().await?;
        let reader = reader.as_mut();

        let (tenant, vpc) = owned_vpc(reader, org, vpc_id).await?;
        require_allocation(
            reader,
            tenant.id,
            vpc.site_id,
            "Tenant does not have any Allocations with Site specified in request data",
        )
        .await?;

        if let Some(name) = request.name.as_deref() {
            let clash = reader.find_vpc_by_name(tenant.id, name).await?;
            if clash.is_some_and(|other| other.id != vpc.id) {
                return Err(ApiError::Conflict(
                    "Another VPC with specified name already exists for Tenant".to_string(),
                ));
            }
        }

        match request.network_security_group_id.as_deref() {
            None | Some("") => {}
            Some(group_id) => {
                eligibility::check_network_security_group(reader, tenant.id, vpc.site_id, group_id)
                    .await?;
            }
        }

        if let Some(partition_id) = request.nvlink_logical_partition_id {
            if vpc.nvlink_logical_partition_id == Some(partition_id) {
                return Ok(());
            }
            let site = reader
                .get_site(vpc.site_id)
                .await?
                .ok_or_else(|| ApiError::internal("Failed to retrieve Site associated with VPC"))?;
            if !site.nvlink_partition_enabled {
                return Err(ApiError::validation(format!(
                    "Site: {} specified in request data must have NVLink Partition enabled in order to update VPC with default NVLink Partition",
                    site.id
                )));
            }
            if let Some(current) = vpc.nvlink_logical_partition_id {
                if reader.count_vpc_nvlink_interfaces(vpc.id, current).await? > 0 {
                    return Err(ApiError::forbidden(
                        "Existing default NVLink Logical Partition is already being used by an Instance from the VPC",
                    ));
                }
            }
            check_default_partition(reader, tenant.id, vpc.site_id, partition_id).await?;
        }
        Ok(())
    }

    /// Switch a VPC to FNN virtualization.
    #[instrument(skip(self, request, cancel))]
    pub async fn update_vpc_virtualization(
        &self,
        org: &str,
        vpc_id: Uuid,
        request: VpcVirtualizationUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<VpcRecord> {
        {
            let mut reader = self.reader().await?;
            let reader = reader.as_mut();

            let vpc = reader
                .get_vpc(vpc_id)
                .await?
                .ok_or_else(|| ApiError::NotFound("Could not retrieve VPC to update".to_string()))?;
            match NetworkVirtualizationType::parse(&request.network_virtualization_type) {
                Some(NetworkVirtualizationType::Fnn) => {}
                _ => {
                    return Err(ApiError::validation(
                        "virtualization type can only be updated to FNN",
                    ));
                }
            }
            if vpc.network_virtualization_type == NetworkVirtualizationType::Fnn {
                return Err(ApiError::validation(
                    "VPC virtualization type is already set to FNN",
                ));
            }

            let tenant = tenant_for_org(reader, org, ApiError::Forbidden).await?;
            if vpc.tenant_id != tenant.id {
                return Err(ApiError::forbidden("VPC does not belong to current Tenant"));
            }
            require_allocation(
                reader,
                tenant.id,
                vpc.site_id,
                "Tenant does not have access to Site, VPC cannot be updated",
            )
            .await?;
        }

        let op = WorkflowOp::UpdateVpcVirtualization;
        let mut tx = self.begin(op).await?;
        let (record, payload) = match switch_to_fnn(tx.as_mut(), vpc_id).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, record.vpc.site_id, op, vpc_id, payload, cancel)
            .await?;

        info!(vpc_id = %vpc_id, "VPC virtualization updated to FNN");
        Ok(record)
    }

    /// Start deleting a VPC on its site.
    #[instrument(skip(self, cancel))]
    pub async fn delete_vpc(
        &self,
        org: &str,
        vpc_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let site_id = {
            let mut reader = self.reader().await?;
            let reader = reader.as_mut();

            let vpc = reader.get_vpc(vpc_id).await?.ok_or_else(|| {
                ApiError::NotFound("Could not find VPC with specified ID".to_string())
            })?;
            if vpc.org != org {
                return Err(ApiError::validation(
                    "Org specified in request does not match org of Tenant associated with VPC",
                ));
            }
            registered_site(
                reader,
                vpc.site_id,
                "Could not find Site associated with VPC",
                "Site associated with VPC must be in Registered state in order to proceed",
            )
            .await?;

            if reader.count_subnets(vpc.id).await? > 0 {
                return Err(ApiError::validation(
                    "Cannot delete VPC, one or more Subnets exist for this VPC",
                ));
            }
            if reader.count_vpc_prefixes(vpc.id).await? > 0 {
                return Err(ApiError::validation(
                    "Cannot delete VPC, one or more VPC prefixes exist for this VPC",
                ));
            }
            if reader.count_vpc_instances(vpc.id).await? > 0 {
                return Err(ApiError::validation(
                    "Cannot delete VPC, one or more instances for this VPC",
                ));
            }
            vpc.site_id
        };

        let op = WorkflowOp::DeleteVpc;
        let mut tx = self.begin(op).await?;
        let payload = match mark_deleting(tx.as_mut(), vpc_id).await {
            Ok(payload) => payload,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, site_id, op, vpc_id, payload, cancel)
            .await?;

        info!(vpc_id = %vpc_id, "VPC deletion initiated");
        Ok(())
    }
}

/// The VPC, which must belong to the tenant of `org`.
async fn owned_vpc<R>(reader: &mut R, org: &str, vpc_id: Uuid) -> Result<(Tenant, Vpc)>
where
    R: Reader + ?Sized,
{
    let vpc = reader
        .get_vpc(vpc_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Could not retrieve VPC to update".to_string()))?;
    let tenant = tenant_for_org(reader, org, ApiError::Forbidden).await?;
    if vpc.tenant_id != tenant.id {
        return Err(ApiError::forbidden("VPC does not belong to current Tenant"));
    }
    Ok((tenant, vpc))
}

/// A default NVLink partition must be at the site, Ready and the tenant's.
async fn check_default_partition<R>(
    reader: &mut R,
    tenant_id: Uuid,
    site_id: Uuid,
    partition_id: Uuid,
) -> Result<()>
where
    R: Reader + ?Sized,
{
    let partition = reader
        .get_nvlink_partition(partition_id)
        .await?
        .ok_or_else(|| {
            ApiError::validation("Invalid NVLink Logical Partition ID specified in request data")
        })?;
    if partition.site_id != site_id {
        return Err(ApiError::forbidden(
            "NVLink Logical Partition with ID specified in request data does not belong to Site",
        ));
    }
    if partition.status != ResourceStatus::Ready {
        return Err(ApiError::forbidden(
            "NVLink Logical Partition with ID specified in request data is not in Ready state",
        ));
    }
    if partition.tenant_id != tenant_id {
        return Err(ApiError::forbidden(
            "NVLink Logical Partition with ID specified in request data does not belong to Tenant",
        ));
    }
    Ok(())
}

async fn persist_new_vpc<T>(
    tx: &mut T,
    org: &str,
    tenant: &Tenant,
    site: &Site,
    virtualization: NetworkVirtualizationType,
    request: &VpcCreateRequest,
) -> Result<(VpcRecord, Value)>
where
    T: Transaction + ?Sized,
{
    if tx.find_vpc_by_name(tenant.id, &request.name).await?.is_some() {
        return Err(ApiError::Conflict(
            "A Vpc with specified name already exists for Tenant".to_string(),
        ));
    }

    let now = Utc::now();
    let id = Uuid::new_v4();
    let vpc = Vpc {
        id,
        name: request.name.clone(),
        description: request.description.clone(),
        org: org.to_string(),
        tenant_id: tenant.id,
        site_id: site.id,
        network_virtualization_type: virtualization,
        network_security_group_id: request.network_security_group_id.clone(),
        nvlink_logical_partition_id: request.nvlink_logical_partition_id,
        controller_vpc_id: Some(id),
        labels: Json(request.labels.clone().unwrap_or_default()),
        status: VpcStatus::Ready,
        created: now,
        updated: now,
    };
    tx.insert_vpc(&vpc).await?;
    tx.append_status_detail(
        &id.to_string(),
        VpcStatus::Ready.as_str(),
        "VPC successfully provisioned on Site",
    )
    .await?;

    let record = VpcRecord {
        status_history: status_history(tx, id).await?,
        vpc,
    };
    let payload = to_payload(&record.vpc)?;
    Ok((record, payload))
}

async fn apply_vpc_update<T>(
    tx: &mut T,
    vpc_id: Uuid,
    request: &VpcUpdateRequest,
) -> Result<(VpcRecord, Value)>
where
    T: Transaction + ?Sized,
{
    let mut vpc = tx
        .get_vpc(vpc_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Could not retrieve VPC to update".to_string()))?;

    if let Some(name) = &request.name {
        vpc.name = name.clone();
    }
    if let Some(description) = &request.description {
        vpc.description = Some(description.clone());
    }
    if let Some(labels) = &request.labels {
        vpc.labels = Json(labels.clone());
    }
    match request.network_security_group_id.as_deref() {
        None => {}
        Some("") => vpc.network_security_group_id = None,
        Some(group_id) => vpc.network_security_group_id = Some(group_id.to_string()),
    }
    if let Some(partition_id) = request.nvlink_logical_partition_id {
        vpc.nvlink_logical_partition_id = Some(partition_id);
    }
    vpc.updated = Utc::now();
    tx.update_vpc(&vpc).await?;

    let record = VpcRecord {
        status_history: status_history(tx, vpc.id).await?,
        vpc,
    };
    let payload = to_payload(&record.vpc)?;
    Ok((record, payload))
}

async fn switch_to_fnn<T>(tx: &mut T, vpc_id: Uuid) -> Result<(VpcRecord, Value)>
where
    T: Transaction + ?Sized,
{
    let mut vpc = tx
        .get_vpc(vpc_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Could not retrieve VPC to update".to_string()))?;
    if vpc.network_virtualization_type == NetworkVirtualizationType::Fnn {
        warn!(vpc_id = %vpc_id, "VPC switched to FNN by a concurrent request");
        return Err(ApiError::validation("VPC virtualization type is already set to FNN"));
    }
    vpc.network_virtualization_type = NetworkVirtualizationType::Fnn;
    vpc.updated = Utc::now();
    tx.update_vpc(&vpc).await?;

    let payload = json!({
        "vpcId": vpc.id,
        "networkVirtualizationType": vpc.network_virtualization_type,
    });
    let record = VpcRecord {
        status_history: status_history(tx, vpc.id).await?,
        vpc,
    };
    Ok((record, payload))
}

async fn mark_deleting<T>(tx: &mut T, vpc_id: Uuid) -> Result<Value>
where
    T: Transaction + ?Sized,
{
    let mut vpc = tx.get_vpc(vpc_id).await?.ok_or_else(|| {
        ApiError::NotFound("Could not find VPC with specified ID".to_string())
    })?;
    vpc.status = status::transition(vpc.status, VpcStatus::Deleting).map_err(invalid_transition)?;
    vpc.updated = Utc::now();
    tx.update_vpc(&vpc).await?;
    tx.append_status_detail(
        &vpc.id.to_string(),
        VpcStatus::Deleting.as_str(),
        "received request for deletion, pending processing",
    )
    .await?;

    Ok(json!({
        "vpcId": vpc.id,
        "siteId": vpc.site_id,
    }))
}
