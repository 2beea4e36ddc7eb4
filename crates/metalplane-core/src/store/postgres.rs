// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! PostgreSQL store.
//!
//! Readers borrow a pooled connection; transactions wrap a
//! `sqlx::Transaction` and use `pg_try_advisory_xact_lock`, so locks vanish
//! with the transaction. A transaction dropped without commit is rolled back
//! by sqlx when the connection returns to the pool.

use std::ops::DerefMut;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, PgPool, Postgres};
use tracing::debug;
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
use crate::status::{CapabilityType, DeploymentStatus, InterfaceStatus};

/// Upper bound on how long a statement waits for a row lock.
const LOCK_TIMEOUT: &str = "SET LOCAL lock_timeout = '300s'";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a store over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn reader(&self) -> Result<Box<dyn Reader>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgSession { conn }))
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(LOCK_TIMEOUT).execute(&mut *tx).await?;
        Ok(Box::new(PgSession { conn: tx }))
    }
}

/// A connection-bound handle; `C` is either a pooled connection or a
/// transaction.
pub struct PgSession<C> {
    conn: C,
}

/// Reader over a pooled connection.
pub type PostgresReader = PgSession<PoolConnection<Postgres>>;

/// Open PostgreSQL transaction.
pub type PostgresTransaction = PgSession<sqlx::Transaction<'static, Postgres>>;

impl<C> PgSession<C>
where
    C: DerefMut<Target = PgConnection>,
{
    fn conn(&mut self) -> &mut PgConnection {
        &mut self.conn
    }
}

fn expect_row(rows: u64, entity: &'static str, id: impl ToString) -> Result<()> {
    if rows == 0 {
        return Err(StoreError::NotFound {
            entity,
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl<C> Reader for PgSession<C>
where
    C: DerefMut<Target = PgConnection> + Send + 'static,
{
    // ========================================================================
    // Tenancy and Sites
    // ========================================================================

    async fn get_tenant_by_org(&mut self, org: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE org = $1")
            .bind(org)
            .fetch_optional(self.conn())
            .await?;
        Ok(tenant)
    }

    async fn get_site(&mut self, id: Uuid) -> Result<Option<Site>> {
        let site = sqlx::query_as::<_, Site>("SELECT * FROM sites WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(site)
    }

    async fn list_allocations(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
    ) -> Result<Vec<Allocation>> {
        let allocations = sqlx::query_as::<_, Allocation>(
            r#"
            SELECT * FROM allocations
            WHERE tenant_id = $1 AND site_id = $2
            ORDER BY created, id
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .fetch_all(self.conn())
        .await?;
        Ok(allocations)
    }

    async fn list_instance_type_constraints(
        &mut self,
        allocation_ids: &[Uuid],
        instance_type_id: Uuid,
    ) -> Result<Vec<AllocationConstraint>> {
        let constraints = sqlx::query_as::<_, AllocationConstraint>(
            r#"
            SELECT * FROM allocation_constraints
            WHERE allocation_id = ANY($1)
              AND resource_type = 'InstanceType'
              AND resource_type_id = $2
            ORDER BY created, id
            "#,
        )
        .bind(allocation_ids)
        .bind(instance_type_id)
        .fetch_all(self.conn())
        .await?;
        Ok(constraints)
    }

    // ========================================================================
    // Hardware
    // ========================================================================

    async fn get_instance_type(&mut self, id: Uuid) -> Result<Option<InstanceType>> {
        let instance_type =
            sqlx::query_as::<_, InstanceType>("SELECT * FROM instance_types WHERE id = $1")
                .bind(id)
                .fetch_optional(self.conn())
                .await?;
        Ok(instance_type)
    }

    async fn get_machine(&mut self, id: &str) -> Result<Option<Machine>> {
        let machine = sqlx::query_as::<_, Machine>(
            r#"
            SELECT id, site_id, instance_type_id, is_assigned, is_missing_on_site, status, created
            FROM machines WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;
        Ok(machine)
    }

    async fn list_available_machines(
        &mut self,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Machine>> {
        let machines = sqlx::query_as::<_, Machine>(
            r#"
            SELECT id, site_id, instance_type_id, is_assigned, is_missing_on_site, status, created
            FROM machines
            WHERE site_id = $1
              AND instance_type_id = $2
              AND NOT is_assigned
              AND NOT is_missing_on_site
              AND status = 'Ready'
            ORDER BY created, id
            "#,
        )
        .bind(site_id)
        .bind(instance_type_id)
        .fetch_all(self.conn())
        .await?;
        Ok(machines)
    }

    async fn list_capabilities(
        &mut self,
        owner: CapabilityOwner<'_>,
        capability_type: CapabilityType,
    ) -> Result<Vec<MachineCapability>> {
        let capabilities = match owner {
            CapabilityOwner::InstanceType(instance_type_id) => {
                sqlx::query_as::<_, MachineCapability>(
                    r#"
                    SELECT * FROM machine_capabilities
                    WHERE instance_type_id = $1 AND capability_type = $2
                    ORDER BY "index", id
                    "#,
                )
                .bind(instance_type_id)
                .bind(capability_type)
                .fetch_all(self.conn())
                .await?
            }
            CapabilityOwner::Machine(machine_id) => {
                sqlx::query_as::<_, MachineCapability>(
                    r#"
                    SELECT * FROM machine_capabilities
                    WHERE machine_id = $1 AND capability_type = $2
                    ORDER BY "index", id
                    "#,
                )
                .bind(machine_id)
                .bind(capability_type)
                .fetch_all(self.conn())
                .await?
            }
        };
        Ok(capabilities)
    }

    // ========================================================================
    // Networking
    // ========================================================================

    async fn get_vpc(&mut self, id: Uuid) -> Result<Option<Vpc>> {
        let vpc = sqlx::query_as::<_, Vpc>("SELECT * FROM vpcs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(vpc)
    }

    async fn find_vpc_by_name(&mut self, tenant_id: Uuid, name: &str) -> Result<Option<Vpc>> {
        let vpc = sqlx::query_as::<_, Vpc>(
            "SELECT * FROM vpcs WHERE tenant_id = $1 AND name = $2 ORDER BY created LIMIT 1",
        )
        .bind(tenant_id)
        .bind(name)
        .fetch_optional(self.conn())
        .await?;
        Ok(vpc)
    }

    async fn get_subnet(&mut self, id: Uuid) -> Result<Option<Subnet>> {
        let subnet = sqlx::query_as::<_, Subnet>("SELECT * FROM subnets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(subnet)
    }

    async fn get_vpc_prefix(&mut self, id: Uuid) -> Result<Option<VpcPrefix>> {
        let prefix = sqlx::query_as::<_, VpcPrefix>("SELECT * FROM vpc_prefixes WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(prefix)
    }

    async fn get_infiniband_partition(
        &mut self,
        id: Uuid,
    ) -> Result<Option<InfiniBandPartition>> {
        let partition = sqlx::query_as::<_, InfiniBandPartition>(
            "SELECT * FROM infiniband_partitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;
        Ok(partition)
    }

    async fn get_nvlink_partition(
        &mut self,
        id: Uuid,
    ) -> Result<Option<NvLinkLogicalPartition>> {
        let partition = sqlx::query_as::<_, NvLinkLogicalPartition>(
            "SELECT * FROM nvlink_logical_partitions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;
        Ok(partition)
    }

    async fn get_network_security_group(
        &mut self,
        id: &str,
    ) -> Result<Option<NetworkSecurityGroup>> {
        let group = sqlx::query_as::<_, NetworkSecurityGroup>(
            "SELECT * FROM network_security_groups WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;
        Ok(group)
    }

    async fn get_ssh_key_group(&mut self, id: Uuid) -> Result<Option<SshKeyGroup>> {
        let group = sqlx::query_as::<_, SshKeyGroup>("SELECT * FROM ssh_key_groups WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(group)
    }

    async fn is_ssh_key_group_at_site(&mut self, group_id: Uuid, site_id: Uuid) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM ssh_key_group_sites
                WHERE ssh_key_group_id = $1 AND site_id = $2
            )
            "#,
        )
        .bind(group_id)
        .bind(site_id)
        .fetch_one(self.conn())
        .await?;
        Ok(exists)
    }

    async fn get_dpu_extension_service(
        &mut self,
        id: Uuid,
    ) -> Result<Option<DpuExtensionService>> {
        let service = sqlx::query_as::<_, DpuExtensionService>(
            "SELECT * FROM dpu_extension_services WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.conn())
        .await?;
        Ok(service)
    }

    async fn count_subnets(&mut self, vpc_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subnets WHERE vpc_id = $1")
            .bind(vpc_id)
            .fetch_one(self.conn())
            .await?;
        Ok(count)
    }

    async fn count_vpc_prefixes(&mut self, vpc_id: Uuid) -> Result<i64> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vpc_prefixes WHERE vpc_id = $1")
                .bind(vpc_id)
                .fetch_one(self.conn())
                .await?;
        Ok(count)
    }

    async fn count_vpc_instances(&mut self, vpc_id: Uuid) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM instances WHERE vpc_id = $1 AND status <> 'Terminated'",
        )
        .bind(vpc_id)
        .fetch_one(self.conn())
        .await?;
        Ok(count)
    }

    async fn count_vpc_nvlink_interfaces(
        &mut self,
        vpc_id: Uuid,
        partition_id: Uuid,
    ) -> Result<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM nvlink_interfaces n
            JOIN instances i ON i.id = n.instance_id
            WHERE i.vpc_id = $1
              AND n.nvlink_logical_partition_id = $2
              AND n.status <> 'Deleting'
              AND i.status <> 'Terminated'
            "#,
        )
        .bind(vpc_id)
        .bind(partition_id)
        .fetch_one(self.conn())
        .await?;
        Ok(count)
    }

    // ========================================================================
    // Instances
    // ========================================================================

    async fn get_instance(&mut self, id: Uuid) -> Result<Option<Instance>> {
        let instance = sqlx::query_as::<_, Instance>("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(self.conn())
            .await?;
        Ok(instance)
    }

    async fn find_instance_by_name(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        name: &str,
    ) -> Result<Option<Instance>> {
        let instance = sqlx::query_as::<_, Instance>(
            r#"
            SELECT * FROM instances
            WHERE tenant_id = $1 AND site_id = $2 AND name = $3 AND status <> 'Terminated'
            ORDER BY created
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .bind(name)
        .fetch_optional(self.conn())
        .await?;
        Ok(instance)
    }

    async fn list_active_instances(
        &mut self,
        tenant_id: Uuid,
        site_id: Uuid,
        instance_type_id: Uuid,
    ) -> Result<Vec<Instance>> {
        let instances = sqlx::query_as::<_, Instance>(
            r#"
            SELECT * FROM instances
            WHERE tenant_id = $1
              AND site_id = $2
              AND instance_type_id = $3
              AND status <> 'Terminated'
            ORDER BY created, id
            "#,
        )
        .bind(tenant_id)
        .bind(site_id)
        .bind(instance_type_id)
        .fetch_all(self.conn())
        .await?;
        Ok(instances)
    }

    async fn list_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<Interface>> {
        let interfaces = sqlx::query_as::<_, Interface>(
            "SELECT * FROM interfaces WHERE instance_id = $1 ORDER BY created, id",
        )
        .bind(instance_id)
        .fetch_all(self.conn())
        .await?;
        Ok(interfaces)
    }

    async fn list_infiniband_interfaces(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<InfiniBandInterface>> {
        let interfaces = sqlx::query_as::<_, InfiniBandInterface>(
            "SELECT * FROM infiniband_interfaces WHERE instance_id = $1 ORDER BY created, id",
        )
        .bind(instance_id)
        .fetch_all(self.conn())
        .await?;
        Ok(interfaces)
    }

    async fn list_nvlink_interfaces(&mut self, instance_id: Uuid) -> Result<Vec<NvLinkInterface>> {
        let interfaces = sqlx::query_as::<_, NvLinkInterface>(
            "SELECT * FROM nvlink_interfaces WHERE instance_id = $1 ORDER BY device_instance, id",
        )
        .bind(instance_id)
        .fetch_all(self.conn())
        .await?;
        Ok(interfaces)
    }

    async fn list_dpu_deployments(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<DpuExtensionServiceDeployment>> {
        let deployments = sqlx::query_as::<_, DpuExtensionServiceDeployment>(
            r#"
            SELECT * FROM dpu_extension_service_deployments
            WHERE instance_id = $1
            ORDER BY created, id
            "#,
        )
        .bind(instance_id)
        .fetch_all(self.conn())
        .await?;
        Ok(deployments)
    }

    async fn list_ssh_key_group_associations(
        &mut self,
        instance_id: Uuid,
    ) -> Result<Vec<SshKeyGroupInstanceAssociation>> {
        let associations = sqlx::query_as::<_, SshKeyGroupInstanceAssociation>(
            r#"
            SELECT * FROM ssh_key_group_instance_associations
            WHERE instance_id = $1
            ORDER BY created, id
            "#,
        )
        .bind(instance_id)
        .fetch_all(self.conn())
        .await?;
        Ok(associations)
    }

    async fn list_status_details(&mut self, entity_id: &str) -> Result<Vec<StatusDetail>> {
        let details = sqlx::query_as::<_, StatusDetail>(
            "SELECT * FROM status_details WHERE entity_id = $1 ORDER BY created, id",
        )
        .bind(entity_id)
        .fetch_all(self.conn())
        .await?;
        Ok(details)
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn try_acquire_advisory_lock(&mut self, key: LockKey) -> Result<bool> {
        let acquired = sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key.value())
            .fetch_one(self.conn())
            .await?;
        debug!(lock_key = %key, acquired, "Advisory lock attempt");
        Ok(acquired)
    }

    async fn set_machine_assigned(&mut self, machine_id: &str, assigned: bool) -> Result<()> {
        let result =
            sqlx::query("UPDATE machines SET is_assigned = $2, updated = NOW() WHERE id = $1")
                .bind(machine_id)
                .bind(assigned)
                .execute(self.conn())
                .await?;
        expect_row(result.rows_affected(), "machine", machine_id)
    }

    async fn insert_instance(&mut self, instance: &Instance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (
                id, name, description, tenant_id, site_id, vpc_id, machine_id,
                instance_type_id, allocation_id, allocation_constraint_id, controller_instance_id,
                ipxe_script, user_data, always_boot_with_custom_ipxe, phone_home_enabled,
                network_security_group_id, labels, status, power_status, is_missing_on_site,
                created, updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21, $22)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.name)
        .bind(&instance.description)
        .bind(instance.tenant_id)
        .bind(instance.site_id)
        .bind(instance.vpc_id)
        .bind(&instance.machine_id)
        .bind(instance.instance_type_id)
        .bind(instance.allocation_id)
        .bind(instance.allocation_constraint_id)
        .bind(instance.controller_instance_id)
        .bind(&instance.ipxe_script)
        .bind(&instance.user_data)
        .bind(instance.always_boot_with_custom_ipxe)
        .bind(instance.phone_home_enabled)
        .bind(&instance.network_security_group_id)
        .bind(&instance.labels)
        .bind(instance.status)
        .bind(instance.power_status)
        .bind(instance.is_missing_on_site)
        .bind(instance.created)
        .bind(instance.updated)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn update_instance(&mut self, instance: &Instance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE instances SET
                name = $2,
                description = $3,
                controller_instance_id = $4,
                ipxe_script = $5,
                user_data = $6,
                always_boot_with_custom_ipxe = $7,
                phone_home_enabled = $8,
                network_security_group_id = $9,
                labels = $10,
                status = $11,
                power_status = $12,
                updated = $13
            WHERE id = $1
            "#,
        )
        .bind(instance.id)
        .bind(&instance.name)
        .bind(&instance.description)
        .bind(instance.controller_instance_id)
        .bind(&instance.ipxe_script)
        .bind(&instance.user_data)
        .bind(instance.always_boot_with_custom_ipxe)
        .bind(instance.phone_home_enabled)
        .bind(&instance.network_security_group_id)
        .bind(&instance.labels)
        .bind(instance.status)
        .bind(instance.power_status)
        .bind(instance.updated)
        .execute(self.conn())
        .await?;
        expect_row(result.rows_affected(), "instance", instance.id)
    }

    async fn insert_interface(&mut self, interface: &Interface) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO interfaces (
                id, instance_id, subnet_id, vpc_prefix_id, device, device_instance,
                virtual_function_id, is_physical, status, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(interface.id)
        .bind(interface.instance_id)
        .bind(interface.subnet_id)
        .bind(interface.vpc_prefix_id)
        .bind(&interface.device)
        .bind(interface.device_instance)
        .bind(interface.virtual_function_id)
        .bind(interface.is_physical)
        .bind(interface.status)
        .bind(interface.created)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn set_interface_status(&mut self, id: Uuid, status: InterfaceStatus) -> Result<()> {
        let result = sqlx::query("UPDATE interfaces SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.conn())
            .await?;
        expect_row(result.rows_affected(), "interface", id)
    }

    async fn insert_infiniband_interface(
        &mut self,
        interface: &InfiniBandInterface,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO infiniband_interfaces (
                id, instance_id, site_id, infiniband_partition_id, device, vendor,
                device_instance, is_physical, virtual_function_id, status, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(interface.id)
        .bind(interface.instance_id)
        .bind(interface.site_id)
        .bind(interface.infiniband_partition_id)
        .bind(&interface.device)
        .bind(&interface.vendor)
        .bind(interface.device_instance)
        .bind(interface.is_physical)
        .bind(interface.virtual_function_id)
        .bind(interface.status)
        .bind(interface.created)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn set_infiniband_interface_status(
        &mut self,
        id: Uuid,
        status: InterfaceStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE infiniband_interfaces SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.conn())
            .await?;
        expect_row(result.rows_affected(), "infiniband interface", id)
    }

    async fn insert_nvlink_interface(&mut self, interface: &NvLinkInterface) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO nvlink_interfaces (
                id, instance_id, site_id, nvlink_logical_partition_id, device,
                device_instance, status, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(interface.id)
        .bind(interface.instance_id)
        .bind(interface.site_id)
        .bind(interface.nvlink_logical_partition_id)
        .bind(&interface.device)
        .bind(interface.device_instance)
        .bind(interface.status)
        .bind(interface.created)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn set_nvlink_interface_status(
        &mut self,
        id: Uuid,
        status: InterfaceStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE nvlink_interfaces SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(self.conn())
            .await?;
        expect_row(result.rows_affected(), "nvlink interface", id)
    }

    async fn insert_dpu_deployment(
        &mut self,
        deployment: &DpuExtensionServiceDeployment,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO dpu_extension_service_deployments (
                id, instance_id, site_id, tenant_id, dpu_extension_service_id, version,
                status, created
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(deployment.id)
        .bind(deployment.instance_id)
        .bind(deployment.site_id)
        .bind(deployment.tenant_id)
        .bind(deployment.dpu_extension_service_id)
        .bind(&deployment.version)
        .bind(deployment.status)
        .bind(deployment.created)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn set_dpu_deployment_status(
        &mut self,
        id: Uuid,
        status: DeploymentStatus,
    ) -> Result<()> {
        let result =
            sqlx::query("UPDATE dpu_extension_service_deployments SET status = $2 WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(self.conn())
                .await?;
        expect_row(
            result.rows_affected(),
            "dpu extension service deployment",
            id,
        )
    }

    async fn insert_ssh_key_group_association(
        &mut self,
        association: &SshKeyGroupInstanceAssociation,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ssh_key_group_instance_associations (
                id, ssh_key_group_id, instance_id, site_id, created
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(association.id)
        .bind(association.ssh_key_group_id)
        .bind(association.instance_id)
        .bind(association.site_id)
        .bind(association.created)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn delete_ssh_key_group_association(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM ssh_key_group_instance_associations WHERE id = $1")
            .bind(id)
            .execute(self.conn())
            .await?;
        Ok(())
    }

    async fn insert_vpc(&mut self, vpc: &Vpc) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vpcs (
                id, name, description, org, tenant_id, site_id, network_virtualization_type,
                network_security_group_id, nvlink_logical_partition_id, controller_vpc_id,
                labels, status, created, updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(vpc.id)
        .bind(&vpc.name)
        .bind(&vpc.description)
        .bind(&vpc.org)
        .bind(vpc.tenant_id)
        .bind(vpc.site_id)
        .bind(vpc.network_virtualization_type)
        .bind(&vpc.network_security_group_id)
        .bind(vpc.nvlink_logical_partition_id)
        .bind(vpc.controller_vpc_id)
        .bind(&vpc.labels)
        .bind(vpc.status)
        .bind(vpc.created)
        .bind(vpc.updated)
        .execute(self.conn())
        .await?;
        Ok(())
    }

    async fn update_vpc(&mut self, vpc: &Vpc) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE vpcs SET
                name = $2,
                description = $3,
                network_virtualization_type = $4,
                network_security_group_id = $5,
                nvlink_logical_partition_id = $6,
                controller_vpc_id = $7,
                labels = $8,
                status = $9,
                updated = $10
            WHERE id = $1
            "#,
        )
        .bind(vpc.id)
        .bind(&vpc.name)
        .bind(&vpc.description)
        .bind(vpc.network_virtualization_type)
        .bind(&vpc.network_security_group_id)
        .bind(vpc.nvlink_logical_partition_id)
        .bind(vpc.controller_vpc_id)
        .bind(&vpc.labels)
        .bind(vpc.status)
        .bind(vpc.updated)
        .execute(self.conn())
        .await?;
        expect_row(result.rows_affected(), "vpc", vpc.id)
    }

    async fn append_status_detail(
        &mut self,
        entity_id: &str,
        status: &str,
        message: &str,
    ) -> Result<StatusDetail> {
        let detail = sqlx::query_as::<_, StatusDetail>(
            r#"
            INSERT INTO status_details (id, entity_id, status, message, created)
            VALUES ($1, $2, $3, $4, clock_timestamp())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entity_id)
        .bind(status)
        .bind(message)
        .fetch_one(self.conn())
        .await?;
        Ok(detail)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let session = *self;
        session.conn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let session = *self;
        session.conn.rollback().await?;
        Ok(())
    }
}
