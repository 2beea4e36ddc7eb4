// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Instance create, update, reboot and delete.

use chrono::{DateTime, Utc};
use metalplane_core::model::{
    DpuExtensionServiceDeployment, InfiniBandInterface, Instance, Interface, NvLinkInterface,
    Site, SshKeyGroupInstanceAssociation, StatusDetail, Tenant, Vpc,
};
use metalplane_core::status::{
    self, DeploymentStatus, InstanceStatus, InterfaceStatus, PowerStatus, VpcStatus,
};
use metalplane_core::store::{Reader, Transaction};
use serde::Serialize;
use serde_json::{Value, json};
use sqlx::types::Json;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    Coordinator, invalid_transition, registered_site, rollback, status_history, tenant_for_org,
    to_payload,
};
use crate::capability::{self, CapabilitySource, InterfaceSet, PlannedNvLink};
use crate::eligibility;
use crate::error::{ApiError, Result};
use crate::request::{
    DpuExtensionServiceDeploymentRequest, InfiniBandInterfaceRequest, InstanceCreateRequest,
    InstanceDeleteRequest, InstanceUpdateRequest, InterfaceRequest,
};
use crate::selector::{self, MachineRequest};
use crate::workflow::WorkflowOp;

/// An instance with its children, as returned to clients and sent to sites.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRecord {
    /// The instance row.
    #[serde(flatten)]
    pub instance: Instance,
    /// Ethernet interfaces.
    pub interfaces: Vec<Interface>,
    /// InfiniBand interfaces.
    pub infiniband_interfaces: Vec<InfiniBandInterface>,
    /// NVLink interfaces.
    #[serde(rename = "nvLinkInterfaces")]
    pub nvlink_interfaces: Vec<NvLinkInterface>,
    /// DPU extension service deployments.
    pub dpu_extension_service_deployments: Vec<DpuExtensionServiceDeployment>,
    /// Attached SSH key groups.
    pub ssh_key_group_ids: Vec<Uuid>,
    /// Status history, oldest first.
    pub status_history: Vec<StatusDetail>,
}

/// Everything validation learned about a create request.
struct CreatePlan {
    tenant: Tenant,
    vpc: Vpc,
    site: Site,
}

/// Everything validation learned about an update, reboot or delete.
struct ExistingInstance {
    tenant: Tenant,
    instance: Instance,
    vpc: Vpc,
}

impl Coordinator {
    /// Create an instance and provision it on its site.
    #[instrument(skip(self, request, cancel), fields(name = %request.name))]
    pub async fn create_instance(
        &self,
        org: &str,
        mut request: InstanceCreateRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        request.validate()?;
        let plan = self.validate_create(org, &request).await?;

        let machine_request = match (&request.machine_id, request.instance_type_id) {
            (Some(machine_id), _) => MachineRequest::Explicit {
                machine_id: machine_id.clone(),
                allow_unhealthy: request.allow_unhealthy_machine.unwrap_or(false),
            },
            (None, Some(instance_type_id)) => MachineRequest::ByType { instance_type_id },
            (None, None) => {
                return Err(ApiError::validation(
                    "either `instanceTypeId` or `machineId` must be specified",
                ));
            }
        };

        let op = WorkflowOp::CreateInstance;
        let mut tx = self.begin(op).await?;
        let prepared = persist_new_instance(
            tx.as_mut(),
            &plan,
            &request,
            &machine_request,
            &self.config.lock_policy,
        )
        .await;
        let (record, payload) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };

        let instance_id = record.instance.id;
        self.run_and_settle(tx, plan.site.id, op, instance_id, payload, cancel)
            .await?;

        info!(
            instance_id = %instance_id,
            machine_id = %record.instance.machine_id,
            tenant_id = %plan.tenant.id,
            "Instance created"
        );
        Ok(record)
    }

    async fn validate_create(&self, org: &str, request: &InstanceCreateRequest) -> Result<CreatePlan> {
        let mut reader = self.reader().await?;
        let reader = reader.as_mut();

        let tenant = tenant_for_org(reader, org, ApiError::Validation).await?;
        if tenant.id != request.tenant_id {
            return Err(ApiError::validation(
                "TenantID in request does not match tenant in org",
            ));
        }

        let vpc = reader.get_vpc(request.vpc_id).await?.ok_or_else(|| {
            ApiError::validation("Could not find VPC with ID specified in request data")
        })?;
        if vpc.tenant_id != tenant.id {
            return Err(ApiError::validation(
                "VPC specified in request is not owned by Tenant",
            ));
        }
        if vpc.status != VpcStatus::Ready {
            return Err(ApiError::validation(
                "VPC specified in request data is not ready",
            ));
        }

        let site = registered_site(
            reader,
            vpc.site_id,
            "The Site where this Instance is being created could not be found",
            "The Site where this Instance is being created is not in Registered state",
        )
        .await?;

        eligibility::check_interfaces(reader, tenant.id, &vpc, &request.interfaces).await?;
        eligibility::check_infiniband(reader, tenant.id, site.id, &request.infiniband_interfaces)
            .await?;
        eligibility::check_nvlink(
            reader,
            tenant.id,
            site.id,
            vpc.nvlink_logical_partition_id,
            &request.nvlink_interfaces,
        )
        .await?;
        eligibility::check_ssh_key_groups(reader, tenant.id, site.id, &request.ssh_key_group_ids)
            .await?;
        eligibility::check_dpu_deployments(
            reader,
            tenant.id,
            site.id,
            &request.dpu_extension_service_deployments,
        )
        .await?;
        if let Some(group_id) = request.network_security_group_id.as_deref() {
            eligibility::check_network_security_group(reader, tenant.id, site.id, group_id)
                .await?;
        }

        Ok(CreatePlan { tenant, vpc, site })
    }

    /// Update an instance, or reboot it when the request asks for one.
    #[instrument(skip(self, request, cancel))]
    pub async fn update_instance(
        &self,
        org: &str,
        instance_id: Uuid,
        mut request: InstanceUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        request.validate()?;
        let existing = self
            .load_existing(
                org,
                instance_id,
                "Could not retrieve Instance to update",
                "Site is not in Registered state - cannot update Instance",
            )
            .await?;
        if matches!(
            existing.instance.status,
            InstanceStatus::Terminating | InstanceStatus::Terminated
        ) {
            return Err(ApiError::Conflict(
                "Instance is terminating and cannot be updated".to_string(),
            ));
        }
        if existing.instance.is_missing_on_site {
            return Err(ApiError::Conflict(
                "Instance is missing on site and cannot be updated".to_string(),
            ));
        }

        if request.is_reboot() {
            return self.reboot_instance(existing, &request, cancel).await;
        }

        self.validate_update(&existing, &request).await?;

        let op = WorkflowOp::UpdateInstance;
        let mut tx = self.begin(op).await?;
        let (record, payload) = match apply_update(tx.as_mut(), &existing, &request).await {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, record.instance.site_id, op, instance_id, payload, cancel)
            .await?;

        info!(instance_id = %instance_id, status = %record.instance.status, "Instance updated");
        Ok(record)
    }

    async fn reboot_instance(
        &self,
        existing: ExistingInstance,
        request: &InstanceUpdateRequest,
        cancel: &CancellationToken,
    ) -> Result<InstanceRecord> {
        let op = WorkflowOp::RebootInstance;
        let instance_id = existing.instance.id;
        let site_id = existing.instance.site_id;

        let mut tx = self.begin(op).await?;
        let (record, payload) = match mark_rebooting(tx.as_mut(), existing.instance, request).await
        {
            Ok(prepared) => prepared,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, site_id, op, instance_id, payload, cancel)
            .await?;

        info!(instance_id = %instance_id, "Instance reboot initiated");
        Ok(record)
    }

    async fn validate_update(
        &self,
        existing: &ExistingInstance,
        request: &InstanceUpdateRequest,
    ) -> Result<()> {
        let mut reader = self.reader().await?;
        let reader = reader.as_mut();
        let (tenant, instance, vpc) = (&existing.tenant, &existing.instance, &existing.vpc);

        if let Some(name) = request.name.as_deref() {
            let clash = reader
                .find_instance_by_name(tenant.id, instance.site_id, name)
                .await?;
            if clash.is_some_and(|other| other.id != instance.id) {
                return Err(ApiError::Conflict(
                    "Another Instance with specified name already exists for Tenant".to_string(),
                ));
            }
        }

        if let Some(interfaces) = &request.interfaces {
            eligibility::check_interfaces(reader, tenant.id, vpc, interfaces).await?;
        }
        if let Some(interfaces) = &request.infiniband_interfaces {
            eligibility::check_infiniband(reader, tenant.id, instance.site_id, interfaces).await?;
        }
        if let Some(interfaces) = &request.nvlink_interfaces {
            if vpc.nvlink_logical_partition_id.is_some()
                && !reader.list_nvlink_interfaces(instance.id).await?.is_empty()
            {
                return Err(ApiError::validation(
                    "Cannot update NVLink Interfaces if VPC has default NVLink Logical Partition and NVLink Interfaces already exist for the Instance",
                ));
            }
            eligibility::check_nvlink(
                reader,
                tenant.id,
                instance.site_id,
                vpc.nvlink_logical_partition_id,
                interfaces,
            )
            .await?;
        }
        if let Some(ids) = &request.ssh_key_group_ids {
            eligibility::check_ssh_key_groups(reader, tenant.id, instance.site_id, ids).await?;
        }
        if let Some(deployments) = &request.dpu_extension_service_deployments {
            eligibility::check_dpu_deployments(reader, tenant.id, instance.site_id, deployments)
                .await?;
        }
        match request.network_security_group_id.as_deref() {
            None | Some("") => {}
            Some(group_id) => {
                eligibility::check_network_security_group(
                    reader,
                    tenant.id,
                    instance.site_id,
                    group_id,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Start deleting an instance on its site.
    #[instrument(skip(self, request, cancel))]
    pub async fn delete_instance(
        &self,
        org: &str,
        instance_id: Uuid,
        request: InstanceDeleteRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        request.validate()?;
        let existing = self
            .load_existing(
                org,
                instance_id,
                "Could not find Instance with specified ID",
                "Site associated with Instance must be in Registered state in order to proceed",
            )
            .await?;
        if request.is_repair_tenant == Some(true) && !existing.tenant.targeted_instance_creation {
            return Err(ApiError::forbidden(
                "Tenant does not have capability to set IsRepairTenant",
            ));
        }

        let op = WorkflowOp::DeleteInstance;
        let site_id = existing.instance.site_id;
        let mut tx = self.begin(op).await?;
        let payload = match mark_terminating(tx.as_mut(), existing.instance, &request).await {
            Ok(payload) => payload,
            Err(err) => return Err(rollback(tx, err).await),
        };
        self.run_and_settle(tx, site_id, op, instance_id, payload, cancel)
            .await?;

        info!(instance_id = %instance_id, "Instance deletion initiated");
        Ok(())
    }

    /// Load an instance the caller's org owns at a Registered site.
    async fn load_existing(
        &self,
        org: &str,
        instance_id: Uuid,
        not_found: &str,
        not_registered: &str,
    ) -> Result<ExistingInstance> {
        let mut reader = self.reader().await?;
        let reader = reader.as_mut();

        let instance = reader
            .get_instance(instance_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(not_found.to_string()))?;

        let tenant = tenant_for_org(reader, org, ApiError::Forbidden).await?;
        if instance.tenant_id != tenant.id {
            return Err(ApiError::forbidden(
                "Org specified in request does not match Org of Tenant associated with Instance",
            ));
        }

        registered_site(
            reader,
            instance.site_id,
            "Could not find Site associated with Instance",
            not_registered,
        )
        .await?;

        let vpc = reader
            .get_vpc(instance.vpc_id)
            .await?
            .ok_or_else(|| ApiError::internal("Could not retrieve VPC associated with Instance"))?;

        Ok(ExistingInstance {
            tenant,
            instance,
            vpc,
        })
    }
}

async fn persist_new_instance<T>(
    tx: &mut T,
    plan: &CreatePlan,
    request: &InstanceCreateRequest,
    machine_request: &MachineRequest,
    policy: &metalplane_core::lock::LockPolicy,
) -> Result<(InstanceRecord, Value)>
where
    T: Transaction + ?Sized,
{
    let CreatePlan { tenant, vpc, site } = plan;

    if tx
        .find_instance_by_name(tenant.id, site.id, &request.name)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "An Instance with specified name already exists for Tenant".to_string(),
        ));
    }

    let reservation =
        selector::reserve(tx, tenant, site.id, &site.name, machine_request, policy).await?;

    let nvlink = capability::validate(
        tx,
        CapabilitySource {
            instance_type_id: reservation.capability_instance_type_id,
            machine_id: &reservation.machine.id,
        },
        InterfaceSet {
            interfaces: &request.interfaces,
            infiniband: &request.infiniband_interfaces,
            nvlink: &request.nvlink_interfaces,
            default_nvlink_partition: vpc.nvlink_logical_partition_id,
        },
    )
    .await?;

    let now = Utc::now();
    let id = Uuid::new_v4();
    let instance = Instance {
        id,
        name: request.name.clone(),
        description: request.description.clone(),
        tenant_id: tenant.id,
        site_id: site.id,
        vpc_id: vpc.id,
        machine_id: reservation.machine.id.clone(),
        instance_type_id: reservation.instance_type_id,
        allocation_id: reservation.constraint.as_ref().map(|c| c.allocation_id),
        allocation_constraint_id: reservation.constraint.as_ref().map(|c| c.id),
        controller_instance_id: Some(id),
        ipxe_script: request.ipxe_script.clone(),
        user_data: request.user_data.clone(),
        always_boot_with_custom_ipxe: request.always_boot_with_custom_ipxe.unwrap_or(false),
        phone_home_enabled: request.phone_home_enabled.unwrap_or(false),
        network_security_group_id: request.network_security_group_id.clone(),
        labels: Json(request.labels.clone().unwrap_or_default()),
        status: InstanceStatus::Pending,
        power_status: PowerStatus::Rebooting,
        is_missing_on_site: false,
        created: now,
        updated: now,
    };
    tx.insert_instance(&instance).await?;

    associate_ssh_key_groups(tx, &instance, &request.ssh_key_group_ids, now).await?;
    insert_interfaces(tx, id, &request.interfaces, now).await?;
    insert_infiniband_interfaces(tx, &instance, &request.infiniband_interfaces, now).await?;
    insert_nvlink_interfaces(tx, &instance, &nvlink, now).await?;
    insert_deployments(tx, &instance, &request.dpu_extension_service_deployments, now).await?;

    tx.append_status_detail(
        &id.to_string(),
        InstanceStatus::Pending.as_str(),
        "received instance creation request, pending",
    )
    .await?;

    let record = load_record(tx, instance).await?;
    let payload = to_payload(&record)?;
    Ok((record, payload))
}

async fn apply_update<T>(
    tx: &mut T,
    existing: &ExistingInstance,
    request: &InstanceUpdateRequest,
) -> Result<(InstanceRecord, Value)>
where
    T: Transaction + ?Sized,
{
    let mut instance = tx
        .get_instance(existing.instance.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Could not retrieve Instance to update".to_string()))?;

    let nvlink = if request.changes_interfaces() {
        let capability_instance_type_id = match instance.instance_type_id {
            Some(id) => Some(id),
            None => tx
                .get_machine(&instance.machine_id)
                .await?
                .and_then(|machine| machine.instance_type_id),
        };
        let planned = capability::validate(
            tx,
            CapabilitySource {
                instance_type_id: capability_instance_type_id,
                machine_id: &instance.machine_id,
            },
            InterfaceSet {
                interfaces: request.interfaces.as_deref().unwrap_or_default(),
                infiniband: request.infiniband_interfaces.as_deref().unwrap_or_default(),
                nvlink: request.nvlink_interfaces.as_deref().unwrap_or_default(),
                default_nvlink_partition: request
                    .nvlink_interfaces
                    .as_ref()
                    .and(existing.vpc.nvlink_logical_partition_id),
            },
        )
        .await?;
        instance.status = status::transition(instance.status, InstanceStatus::Configuring)
            .map_err(invalid_transition)?;
        planned
    } else {
        Vec::new()
    };

    if let Some(name) = &request.name {
        instance.name = name.clone();
    }
    if let Some(description) = &request.description {
        instance.description = Some(description.clone());
    }
    if let Some(script) = &request.ipxe_script {
        instance.ipxe_script = Some(script.clone());
    }
    if let Some(user_data) = &request.user_data {
        instance.user_data = Some(user_data.clone());
    }
    if let Some(always) = request.always_boot_with_custom_ipxe {
        instance.always_boot_with_custom_ipxe = always;
    }
    if let Some(enabled) = request.phone_home_enabled {
        instance.phone_home_enabled = enabled;
    }
    if let Some(labels) = &request.labels {
        instance.labels = Json(labels.clone());
    }
    match request.network_security_group_id.as_deref() {
        None => {}
        Some("") => instance.network_security_group_id = None,
        Some(group_id) => instance.network_security_group_id = Some(group_id.to_string()),
    }
    let now = Utc::now();
    instance.updated = now;
    tx.update_instance(&instance).await?;

    if let Some(interfaces) = &request.interfaces {
        for old in tx.list_interfaces(instance.id).await? {
            if old.status != InterfaceStatus::Deleting {
                let next = status::transition(old.status, InterfaceStatus::Deleting)
                    .map_err(invalid_transition)?;
                tx.set_interface_status(old.id, next).await?;
            }
        }
        insert_interfaces(tx, instance.id, interfaces, now).await?;
    }
    if let Some(interfaces) = &request.infiniband_interfaces {
        for old in tx.list_infiniband_interfaces(instance.id).await? {
            if old.status != InterfaceStatus::Deleting {
                let next = status::transition(old.status, InterfaceStatus::Deleting)
                    .map_err(invalid_transition)?;
                tx.set_infiniband_interface_status(old.id, next).await?;
            }
        }
        insert_infiniband_interfaces(tx, &instance, interfaces, now).await?;
    }
    if request.nvlink_interfaces.is_some() {
        for old in tx.list_nvlink_interfaces(instance.id).await? {
            if old.status != InterfaceStatus::Deleting {
                let next = status::transition(old.status, InterfaceStatus::Deleting)
                    .map_err(invalid_transition)?;
                tx.set_nvlink_interface_status(old.id, next).await?;
            }
        }
        insert_nvlink_interfaces(tx, &instance, &nvlink, now).await?;
    }

    if let Some(ids) = &request.ssh_key_group_ids {
        let current = tx.list_ssh_key_group_associations(instance.id).await?;
        for association in &current {
            if !ids.contains(&association.ssh_key_group_id) {
                tx.delete_ssh_key_group_association(association.id).await?;
            }
        }
        let added: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| !current.iter().any(|a| a.ssh_key_group_id == *id))
            .collect();
        associate_ssh_key_groups(tx, &instance, &added, now).await?;
    }

    if let Some(deployments) = &request.dpu_extension_service_deployments {
        let current = tx.list_dpu_deployments(instance.id).await?;
        let wanted = |d: &DpuExtensionServiceDeployment| {
            deployments.iter().any(|r| {
                r.dpu_extension_service_id == d.dpu_extension_service_id && r.version == d.version
            })
        };
        for deployment in &current {
            if deployment.status != DeploymentStatus::Terminating && !wanted(deployment) {
                let next = status::transition(deployment.status, DeploymentStatus::Terminating)
                    .map_err(invalid_transition)?;
                tx.set_dpu_deployment_status(deployment.id, next).await?;
            }
        }
        let added: Vec<DpuExtensionServiceDeploymentRequest> = deployments
            .iter()
            .filter(|r| {
                !current.iter().any(|d| {
                    d.status != DeploymentStatus::Terminating
                        && d.dpu_extension_service_id == r.dpu_extension_service_id
                        && d.version == r.version
                })
            })
            .cloned()
            .collect();
        insert_deployments(tx, &instance, &added, now).await?;
    }

    tx.append_status_detail(
        &instance.id.to_string(),
        instance.status.as_str(),
        "received Instance config update request, processing",
    )
    .await?;

    let record = load_record(tx, instance).await?;
    let payload = to_payload(&record)?;
    Ok((record, payload))
}

async fn mark_rebooting<T>(
    tx: &mut T,
    mut instance: Instance,
    request: &InstanceUpdateRequest,
) -> Result<(InstanceRecord, Value)>
where
    T: Transaction + ?Sized,
{
    let apply_updates = request.apply_updates_on_reboot.unwrap_or(false);
    instance.power_status = PowerStatus::Rebooting;
    instance.updated = Utc::now();
    tx.update_instance(&instance).await?;

    let message = if apply_updates {
        "received Instance reboot request with apply updates, processing"
    } else {
        "received Instance reboot request, processing"
    };
    tx.append_status_detail(
        &instance.id.to_string(),
        PowerStatus::Rebooting.as_str(),
        message,
    )
    .await?;

    let payload = json!({
        "instanceId": instance.id,
        "machineId": instance.machine_id,
        "bootWithCustomIpxe": request.reboot_with_custom_ipxe.unwrap_or(false),
        "applyUpdatesOnReboot": apply_updates,
    });
    let record = load_record(tx, instance).await?;
    Ok((record, payload))
}

async fn mark_terminating<T>(
    tx: &mut T,
    mut instance: Instance,
    request: &InstanceDeleteRequest,
) -> Result<Value>
where
    T: Transaction + ?Sized,
{
    instance.status = status::transition(instance.status, InstanceStatus::Terminating)
        .map_err(invalid_transition)?;
    instance.updated = Utc::now();
    tx.update_instance(&instance).await?;

    tx.append_status_detail(
        &instance.id.to_string(),
        InstanceStatus::Terminating.as_str(),
        "Instance deletion successfully initiated on Site",
    )
    .await?;

    Ok(json!({
        "instanceId": instance.id,
        "machineId": instance.machine_id,
        "machineHealthIssue": request.machine_health_issue,
        "isRepairTenant": request.is_repair_tenant.unwrap_or(false),
    }))
}

async fn insert_interfaces<T>(
    tx: &mut T,
    instance_id: Uuid,
    interfaces: &[InterfaceRequest],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: Transaction + ?Sized,
{
    for request in interfaces {
        tx.insert_interface(&Interface {
            id: Uuid::new_v4(),
            instance_id,
            subnet_id: request.subnet_id,
            vpc_prefix_id: request.vpc_prefix_id,
            device: request.device.clone(),
            device_instance: request.device_instance,
            virtual_function_id: request.virtual_function_id,
            is_physical: request.is_physical,
            status: InterfaceStatus::Pending,
            created: now,
        })
        .await?;
    }
    Ok(())
}

async fn insert_infiniband_interfaces<T>(
    tx: &mut T,
    instance: &Instance,
    interfaces: &[InfiniBandInterfaceRequest],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: Transaction + ?Sized,
{
    for request in interfaces {
        tx.insert_infiniband_interface(&InfiniBandInterface {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            site_id: instance.site_id,
            infiniband_partition_id: request.partition_id,
            device: request.device.clone(),
            vendor: request.vendor.clone(),
            device_instance: request.device_instance,
            is_physical: request.is_physical,
            virtual_function_id: request.virtual_function_id,
            status: InterfaceStatus::Pending,
            created: now,
        })
        .await?;
    }
    Ok(())
}

async fn insert_nvlink_interfaces<T>(
    tx: &mut T,
    instance: &Instance,
    planned: &[PlannedNvLink],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: Transaction + ?Sized,
{
    for interface in planned {
        tx.insert_nvlink_interface(&NvLinkInterface {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            site_id: instance.site_id,
            nvlink_logical_partition_id: interface.partition_id,
            device: interface.device.clone(),
            device_instance: interface.device_instance,
            status: InterfaceStatus::Pending,
            created: now,
        })
        .await?;
    }
    Ok(())
}

async fn insert_deployments<T>(
    tx: &mut T,
    instance: &Instance,
    deployments: &[DpuExtensionServiceDeploymentRequest],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: Transaction + ?Sized,
{
    for request in deployments {
        tx.insert_dpu_deployment(&DpuExtensionServiceDeployment {
            id: Uuid::new_v4(),
            instance_id: instance.id,
            site_id: instance.site_id,
            tenant_id: instance.tenant_id,
            dpu_extension_service_id: request.dpu_extension_service_id,
            version: request.version.clone(),
            status: DeploymentStatus::Pending,
            created: now,
        })
        .await?;
    }
    Ok(())
}

async fn associate_ssh_key_groups<T>(
    tx: &mut T,
    instance: &Instance,
    group_ids: &[Uuid],
    now: DateTime<Utc>,
) -> Result<()>
where
    T: Transaction + ?Sized,
{
    let mut seen = Vec::with_capacity(group_ids.len());
    for &group_id in group_ids {
        if seen.contains(&group_id) {
            continue;
        }
        seen.push(group_id);
        tx.insert_ssh_key_group_association(&SshKeyGroupInstanceAssociation {
            id: Uuid::new_v4(),
            ssh_key_group_id: group_id,
            instance_id: instance.id,
            site_id: instance.site_id,
            created: now,
        })
        .await?;
    }
    Ok(())
}

/// Assemble the instance with its current children.
async fn load_record<R>(reader: &mut R, instance: Instance) -> Result<InstanceRecord>
where
    R: Reader + ?Sized,
{
    let id = instance.id;
    Ok(InstanceRecord {
        interfaces: reader.list_interfaces(id).await?,
        infiniband_interfaces: reader.list_infiniband_interfaces(id).await?,
        nvlink_interfaces: reader.list_nvlink_interfaces(id).await?,
        dpu_extension_service_deployments: reader.list_dpu_deployments(id).await?,
        ssh_key_group_ids: reader
            .list_ssh_key_group_associations(id)
            .await?
            .into_iter()
            .map(|a| a.ssh_key_group_id)
            .collect(),
        status_history: status_history(reader, id).await?,
        instance,
    })
}
