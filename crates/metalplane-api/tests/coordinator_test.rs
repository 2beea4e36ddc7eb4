// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordinator tests against the in-memory store and the mock gateway.

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use common::{CapabilityHolder, Fixture, GPU_DEVICE, IB_DEVICE, ORG};
use metalplane_api::coordinator::Coordinator;
use metalplane_api::error::ApiError;
use metalplane_api::request::{
    InfiniBandInterfaceRequest, InstanceDeleteRequest, InstanceUpdateRequest, InterfaceRequest,
    NvLinkInterfaceRequest, VpcCreateRequest, VpcVirtualizationUpdateRequest,
};
use metalplane_api::workflow::{MockGateway, UnconfiguredGateway};
use metalplane_core::model::NetworkSecurityGroup;
use metalplane_core::status::{
    CapabilityType, DeviceType, InstanceStatus, InterfaceStatus, NetworkVirtualizationType,
    PowerStatus, ResourceStatus, VpcStatus,
};
use metalplane_core::store::{Reader, Store};
use tokio_util::sync::CancellationToken;

fn token() -> CancellationToken {
    CancellationToken::new()
}

// ============================================================================
// Instance creation
// ============================================================================

#[tokio::test]
async fn test_create_instance_commits_after_workflow_success() {
    let fixture = Fixture::new();
    let constraint = fixture.add_constraint(2, 0);
    fixture.add_machine("machine-1");
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let record = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap();

    let instance = fixture.store.instance(record.instance.id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.power_status, PowerStatus::Rebooting);
    assert_eq!(instance.machine_id, "machine-1");
    assert_eq!(instance.instance_type_id, Some(fixture.instance_type.id));
    assert_eq!(instance.allocation_id, Some(fixture.allocation.id));
    assert_eq!(instance.allocation_constraint_id, Some(constraint.id));
    assert_eq!(instance.controller_instance_id, Some(instance.id));
    assert!(fixture.store.machine("machine-1").unwrap().is_assigned);

    let calls = gateway.calls().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].site_id, fixture.site.id);
    assert_eq!(calls[0].request.workflow_name, "CreateInstanceV2");
    assert_eq!(
        calls[0].request.workflow_id,
        format!("instance-create-{}", instance.id)
    );

    let history = fixture.store.status_details(&instance.id.to_string());
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, "Pending");
    assert_eq!(history[0].message, "received instance creation request, pending");

    assert_eq!(record.interfaces.len(), 1);
    assert!(record.interfaces[0].is_physical);
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_create_instance_respects_constraint_capacity() {
    let fixture = Fixture::new();
    fixture.add_constraint(2, 0);
    for id in ["machine-1", "machine-2", "machine-3"] {
        fixture.add_machine(id);
    }
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    for name in ["web-1", "web-2"] {
        coordinator
            .create_instance(ORG, fixture.create_request(name), &token())
            .await
            .unwrap();
    }

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-3"), &token())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::CapacityExceeded(_)));
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(fixture.store.instances().len(), 2);
    assert!(!fixture.store.machine("machine-3").unwrap().is_assigned);
}

#[tokio::test]
async fn test_create_instance_binds_oldest_constraint_first() {
    let fixture = Fixture::new();
    let newer = fixture.add_constraint(1, 30);
    let older = fixture.add_constraint(1, 5);
    fixture.add_machine("machine-1");
    fixture.add_machine("machine-2");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let first = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap();
    let second = coordinator
        .create_instance(ORG, fixture.create_request("web-2"), &token())
        .await
        .unwrap();

    assert_eq!(first.instance.allocation_constraint_id, Some(older.id));
    assert_eq!(second.instance.allocation_constraint_id, Some(newer.id));
}

#[tokio::test]
async fn test_create_instance_without_free_machine() {
    let fixture = Fixture::new();
    fixture.add_constraint(5, 0);
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::NoMachineAvailable(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(gateway.calls().await.is_empty());
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_create_instance_without_constraint_for_type() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-1");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::NoConstraint(_)));
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
}

#[tokio::test]
async fn test_create_instance_rejects_duplicate_name() {
    let fixture = Fixture::new();
    fixture.add_constraint(5, 0);
    fixture.add_machine("machine-1");
    fixture.add_machine("machine-2");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap();
    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert!(!fixture.store.machine("machine-2").unwrap().is_assigned);
}

#[tokio::test]
async fn test_create_instance_rejects_foreign_tenant_id() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request("web-1");
    request.tenant_id = uuid::Uuid::new_v4();
    let err = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(
        err.to_string(),
        "TenantID in request does not match tenant in org"
    );
}

#[tokio::test]
async fn test_create_instance_on_specific_machine() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-7");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let record = coordinator
        .create_instance(
            ORG,
            fixture.create_request_for_machine("web-1", "machine-7"),
            &token(),
        )
        .await
        .unwrap();

    assert_eq!(record.instance.machine_id, "machine-7");
    assert_eq!(record.instance.instance_type_id, None);
    assert_eq!(record.instance.allocation_constraint_id, None);
    assert!(fixture.store.machine("machine-7").unwrap().is_assigned);
}

#[tokio::test]
async fn test_specific_machine_requires_targeted_capability() {
    let fixture = Fixture::with_targeted_creation(false);
    fixture.add_machine("machine-7");
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_instance(
            ORG,
            fixture.create_request_for_machine("web-1", "machine-7"),
            &token(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Forbidden(_)));
    assert!(gateway.calls().await.is_empty());
    assert!(!fixture.store.machine("machine-7").unwrap().is_assigned);
}

// ============================================================================
// Interface capabilities and referenced resources
// ============================================================================

fn ib_interface(partition_id: uuid::Uuid) -> InfiniBandInterfaceRequest {
    InfiniBandInterfaceRequest {
        partition_id,
        device: IB_DEVICE.to_string(),
        vendor: None,
        device_instance: 0,
        is_physical: true,
        virtual_function_id: None,
    }
}

#[tokio::test]
async fn test_create_instance_with_infiniband_by_type() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::InstanceType(fixture.instance_type.id),
        CapabilityType::InfiniBand,
        IB_DEVICE,
        2,
        None,
    );
    let partition = fixture.add_infiniband_partition(ResourceStatus::Ready);
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request("web-1");
    request.infiniband_interfaces = vec![ib_interface(partition.id)];
    let record = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap();

    assert_eq!(record.infiniband_interfaces.len(), 1);
    let interface = &record.infiniband_interfaces[0];
    assert_eq!(interface.infiniband_partition_id, partition.id);
    assert_eq!(interface.device, IB_DEVICE);
    assert_eq!(interface.status, InterfaceStatus::Pending);
}

#[tokio::test]
async fn test_specific_machine_uses_capabilities_of_its_instance_type() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::InstanceType(fixture.instance_type.id),
        CapabilityType::InfiniBand,
        IB_DEVICE,
        1,
        None,
    );
    let partition = fixture.add_infiniband_partition(ResourceStatus::Ready);
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request_for_machine("web-1", "machine-1");
    request.infiniband_interfaces = vec![ib_interface(partition.id)];
    let record = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap();

    assert_eq!(record.instance.instance_type_id, None);
    assert_eq!(record.infiniband_interfaces.len(), 1);
}

#[tokio::test]
async fn test_specific_machine_falls_back_to_its_own_capabilities() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::Machine("machine-1"),
        CapabilityType::InfiniBand,
        IB_DEVICE,
        1,
        None,
    );
    let partition = fixture.add_infiniband_partition(ResourceStatus::Ready);
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request_for_machine("web-1", "machine-1");
    request.infiniband_interfaces = vec![ib_interface(partition.id)];
    let record = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap();

    assert_eq!(record.infiniband_interfaces.len(), 1);
}

#[tokio::test]
async fn test_infiniband_without_capability_is_rejected() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let partition = fixture.add_infiniband_partition(ResourceStatus::Ready);
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let mut request = fixture.create_request("web-1");
    request.infiniband_interfaces = vec![ib_interface(partition.id)];
    let err = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::CapabilityMissing(_)));
    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert!(gateway.calls().await.is_empty());
    assert!(fixture.store.instances().is_empty());
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_infiniband_on_unready_partition_is_not_eligible() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::InstanceType(fixture.instance_type.id),
        CapabilityType::InfiniBand,
        IB_DEVICE,
        1,
        None,
    );
    let partition = fixture.add_infiniband_partition(ResourceStatus::Provisioning);
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let mut request = fixture.create_request("web-1");
    request.infiniband_interfaces = vec![ib_interface(partition.id)];
    let err = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::ResourceNotEligible(_)));
    assert!(gateway.calls().await.is_empty());
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
}

#[tokio::test]
async fn test_update_of_specific_machine_instance_uses_instance_type_capabilities() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::InstanceType(fixture.instance_type.id),
        CapabilityType::InfiniBand,
        IB_DEVICE,
        1,
        None,
    );
    let partition = fixture.add_infiniband_partition(ResourceStatus::Ready);
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));
    let instance_id = coordinator
        .create_instance(
            ORG,
            fixture.create_request_for_machine("web-1", "machine-1"),
            &token(),
        )
        .await
        .unwrap()
        .instance
        .id;

    let request = InstanceUpdateRequest {
        infiniband_interfaces: Some(vec![ib_interface(partition.id)]),
        ..Default::default()
    };
    let record = coordinator
        .update_instance(ORG, instance_id, request, &token())
        .await
        .unwrap();

    assert_eq!(record.instance.status, InstanceStatus::Configuring);
    let mut reader = fixture.store.reader().await.unwrap();
    let interfaces = reader.list_infiniband_interfaces(instance_id).await.unwrap();
    assert_eq!(interfaces.len(), 1);
    assert_eq!(interfaces[0].status, InterfaceStatus::Pending);
}

#[tokio::test]
async fn test_vpc_default_nvlink_partition_generates_interfaces() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    fixture.add_capability(
        CapabilityHolder::InstanceType(fixture.instance_type.id),
        CapabilityType::Gpu,
        GPU_DEVICE,
        4,
        Some(DeviceType::NvLink),
    );
    let (vpc, subnet, partition) = fixture.add_nvlink_vpc("vpc-gpu");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request("train-1");
    request.vpc_id = vpc.id;
    request.interfaces = vec![InterfaceRequest {
        subnet_id: Some(subnet.id),
        ..Default::default()
    }];
    let record = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap();

    let mut indexes: Vec<i32> = record
        .nvlink_interfaces
        .iter()
        .map(|i| i.device_instance)
        .collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert!(record.nvlink_interfaces.iter().all(|i| {
        i.nvlink_logical_partition_id == partition.id
            && i.device.as_deref() == Some(GPU_DEVICE)
            && i.status == InterfaceStatus::Pending
    }));
}

#[tokio::test]
async fn test_nvlink_interfaces_require_gpu_capability() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let (vpc, subnet, partition) = fixture.add_nvlink_vpc("vpc-gpu");
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let mut request = fixture.create_request("train-1");
    request.vpc_id = vpc.id;
    request.interfaces = vec![InterfaceRequest {
        subnet_id: Some(subnet.id),
        ..Default::default()
    }];
    request.nvlink_interfaces = vec![NvLinkInterfaceRequest {
        nvlink_logical_partition_id: partition.id,
        device_instance: 0,
    }];
    let err = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::CapabilityMissing(_)));
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
}

#[tokio::test]
async fn test_foreign_security_group_is_forbidden() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    fixture
        .store
        .insert_network_security_group(NetworkSecurityGroup {
            id: "nsg-theirs".to_string(),
            name: "theirs".to_string(),
            tenant_id: uuid::Uuid::new_v4(),
            site_id: fixture.site.id,
        });
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let mut request = fixture.create_request("web-1");
    request.network_security_group_id = Some("nsg-theirs".to_string());
    let err = coordinator
        .create_instance(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert!(gateway.calls().await.is_empty());
}

// ============================================================================
// Remote outcomes
// ============================================================================

#[tokio::test]
async fn test_remote_failure_rolls_back_everything() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let gateway = Arc::new(MockGateway::failing(
        "CarbideAlreadyExists",
        "instance already exists",
    ));
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::CONFLICT);
    assert!(
        err.to_string()
            .starts_with("Failed to execute sync workflow to create Instance on Site")
    );
    assert!(fixture.store.instances().is_empty());
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
    assert!(gateway.terminations().await.is_empty());
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_without_site_gateway_nothing_is_persisted() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let coordinator = Coordinator::new(
        fixture.store.clone(),
        Arc::new(UnconfiguredGateway),
        common::test_config(),
    );

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Internal(ref m) if m == "Failed to retrieve client for Site"));
    assert!(fixture.store.instances().is_empty());
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_rolls_back_and_terminates() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let gateway = Arc::new(MockGateway::hanging());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout(_)));
    assert!(fixture.store.instances().is_empty());
    assert!(!fixture.store.machine("machine-1").unwrap().is_assigned);
    assert_eq!(fixture.store.held_lock_count(), 0);

    let calls = gateway.calls().await;
    let terminations = gateway.terminations().await;
    assert_eq!(terminations.len(), 1);
    assert_eq!(terminations[0].workflow_id, calls[0].request.workflow_id);
    assert_eq!(terminations[0].deadline, Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn test_failed_termination_reports_desync() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let gateway = Arc::new(MockGateway::hanging().with_failing_terminate());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Desync(_)));
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(err.to_string().contains("may be de-synced"));
    assert!(fixture.store.instances().is_empty());
}

#[tokio::test]
async fn test_cancelled_request_counts_as_timeout() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let gateway = Arc::new(MockGateway::hanging());
    let coordinator = fixture.coordinator(gateway.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = coordinator
        .create_instance(ORG, fixture.create_request("web-1"), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Timeout(_)));
    assert!(err.to_string().contains("context canceled"));
    assert_eq!(gateway.terminations().await.len(), 1);
    assert!(fixture.store.instances().is_empty());
}

// ============================================================================
// Contention
// ============================================================================

#[tokio::test]
async fn test_parallel_creates_on_same_machine() {
    let fixture = Fixture::new();
    fixture.add_machine("machine-7");
    let gateway = Arc::new(MockGateway::new().with_delay(Duration::from_millis(50)));
    let coordinator = fixture.coordinator(gateway.clone());

    let cancel = token();
    let (first, second) = futures::join!(
        coordinator.create_instance(
            ORG,
            fixture.create_request_for_machine("web-1", "machine-7"),
            &cancel
        ),
        coordinator.create_instance(
            ORG,
            fixture.create_request_for_machine("web-2", "machine-7"),
            &cancel
        ),
    );

    let outcomes = [first, second];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    let failure = outcomes.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(failure, ApiError::Conflict(_)));
    assert_eq!(fixture.store.instances().len(), 1);
    assert_eq!(gateway.calls().await.len(), 1);
    assert_eq!(fixture.store.held_lock_count(), 0);
}

#[tokio::test]
async fn test_parallel_creates_by_type_for_same_tenant() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    fixture.add_machine("machine-2");
    let gateway = Arc::new(MockGateway::new().with_delay(Duration::from_millis(50)));
    let coordinator = fixture.coordinator(gateway.clone());

    let cancel = token();
    let (first, second) = futures::join!(
        coordinator.create_instance(ORG, fixture.create_request("web-1"), &cancel),
        coordinator.create_instance(ORG, fixture.create_request("web-2"), &cancel),
    );

    assert_eq!([&first, &second].iter().filter(|r| r.is_ok()).count(), 1);
    let failure = first.err().or(second.err()).unwrap();
    assert!(matches!(failure, ApiError::Conflict(_)));
    assert_eq!(fixture.store.instances().len(), 1);
}

// ============================================================================
// Update, reboot and delete
// ============================================================================

async fn created_instance(fixture: &Fixture) -> uuid::Uuid {
    fixture.add_constraint(5, 0);
    fixture.add_machine("machine-1");
    fixture
        .coordinator(Arc::new(MockGateway::new()))
        .create_instance(ORG, fixture.create_request("web-1"), &token())
        .await
        .unwrap()
        .instance
        .id
}

#[tokio::test]
async fn test_reboot_instance() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let request = InstanceUpdateRequest {
        trigger_reboot: Some(true),
        apply_updates_on_reboot: Some(true),
        ..Default::default()
    };
    let record = coordinator
        .update_instance(ORG, instance_id, request, &token())
        .await
        .unwrap();

    assert_eq!(record.instance.power_status, PowerStatus::Rebooting);
    let calls = gateway.calls().await;
    assert_eq!(calls[0].request.workflow_name, "RebootInstanceV2");
    assert_eq!(calls[0].request.payload["applyUpdatesOnReboot"], true);
    let history = fixture.store.status_details(&instance_id.to_string());
    assert_eq!(
        history.last().unwrap().message,
        "received Instance reboot request with apply updates, processing"
    );
}

#[tokio::test]
async fn test_update_instance_replaces_interfaces() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let request = InstanceUpdateRequest {
        name: Some("web-renamed".to_string()),
        interfaces: Some(vec![InterfaceRequest {
            subnet_id: Some(fixture.subnet.id),
            ..Default::default()
        }]),
        ..Default::default()
    };
    let record = coordinator
        .update_instance(ORG, instance_id, request, &token())
        .await
        .unwrap();

    assert_eq!(record.instance.name, "web-renamed");
    assert_eq!(record.instance.status, InstanceStatus::Configuring);
    assert_eq!(
        gateway.calls().await[0].request.workflow_id,
        format!("instance-update-{instance_id}")
    );

    let mut reader = fixture.store.reader().await.unwrap();
    let interfaces = reader.list_interfaces(instance_id).await.unwrap();
    assert_eq!(interfaces.len(), 2);
    assert_eq!(
        interfaces
            .iter()
            .filter(|i| i.status == InterfaceStatus::Deleting)
            .count(),
        1
    );
    assert_eq!(
        interfaces
            .iter()
            .filter(|i| i.status == InterfaceStatus::Pending)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_failed_update_keeps_instance() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let coordinator = fixture.coordinator(Arc::new(MockGateway::failing(
        "CarbideInvalidArgument",
        "bad config",
    )));

    let request = InstanceUpdateRequest {
        name: Some("web-renamed".to_string()),
        ..Default::default()
    };
    let err = coordinator
        .update_instance(ORG, instance_id, request, &token())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fixture.store.instance(instance_id).unwrap().name, "web-1");
}

#[tokio::test]
async fn test_delete_instance_tolerates_missing_site_object() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let gateway = Arc::new(MockGateway::not_found());
    let coordinator = fixture.coordinator(gateway.clone());

    coordinator
        .delete_instance(ORG, instance_id, InstanceDeleteRequest::default(), &token())
        .await
        .unwrap();

    let instance = fixture.store.instance(instance_id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Terminating);
    assert_eq!(
        gateway.calls().await[0].request.workflow_name,
        "DeleteInstanceV2"
    );
    let history = fixture.store.status_details(&instance_id.to_string());
    assert_eq!(
        history.last().unwrap().message,
        "Instance deletion successfully initiated on Site"
    );
}

#[tokio::test]
async fn test_failed_delete_keeps_status() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let coordinator = fixture.coordinator(Arc::new(MockGateway::failing(
        "CarbideUnavailable",
        "site agent offline",
    )));

    let err = coordinator
        .delete_instance(ORG, instance_id, InstanceDeleteRequest::default(), &token())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    let instance = fixture.store.instance(instance_id).unwrap();
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(fixture.store.status_details(&instance_id.to_string()).len(), 1);
}

#[tokio::test]
async fn test_terminating_instance_cannot_be_updated() {
    let fixture = Fixture::new();
    let instance_id = created_instance(&fixture).await;
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    coordinator
        .delete_instance(ORG, instance_id, InstanceDeleteRequest::default(), &token())
        .await
        .unwrap();

    let request = InstanceUpdateRequest {
        name: Some("web-renamed".to_string()),
        ..Default::default()
    };
    let err = coordinator
        .update_instance(ORG, instance_id, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert_eq!(gateway.calls().await.len(), 1);
}

#[tokio::test]
async fn test_delete_unknown_instance() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let err = coordinator
        .delete_instance(
            ORG,
            uuid::Uuid::new_v4(),
            InstanceDeleteRequest::default(),
            &token(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::NotFound(_)));
    assert_eq!(err.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_repair_tenant_flag_requires_capability() {
    let fixture = Fixture::with_targeted_creation(false);
    let instance_id = created_instance(&fixture).await;
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let request = InstanceDeleteRequest {
        is_repair_tenant: Some(true),
        ..Default::default()
    };
    let err = coordinator
        .delete_instance(ORG, instance_id, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Forbidden(_)));
    assert_eq!(
        fixture.store.instance(instance_id).unwrap().status,
        InstanceStatus::Pending
    );
}

// ============================================================================
// VPCs
// ============================================================================

fn vpc_request(fixture: &Fixture, name: &str) -> VpcCreateRequest {
    VpcCreateRequest {
        name: name.to_string(),
        site_id: fixture.site.id,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_vpc() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let record = coordinator
        .create_vpc(ORG, vpc_request(&fixture, "vpc-two"), &token())
        .await
        .unwrap();

    let vpc = fixture.store.vpc(record.vpc.id).unwrap();
    assert_eq!(vpc.status, VpcStatus::Ready);
    assert_eq!(
        vpc.network_virtualization_type,
        NetworkVirtualizationType::EthernetVirtualizer
    );
    assert_eq!(vpc.controller_vpc_id, Some(vpc.id));
    assert_eq!(record.status_history.len(), 1);

    let calls = gateway.calls().await;
    assert_eq!(calls[0].request.workflow_name, "CreateVPCV2");
    assert_eq!(calls[0].request.workflow_id, format!("vpc-create-{}", vpc.id));
}

#[tokio::test]
async fn test_create_vpc_name_conflict() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .create_vpc(ORG, vpc_request(&fixture, "vpc-main"), &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    assert!(gateway.calls().await.is_empty());
    assert_eq!(fixture.store.vpcs().len(), 1);
}

#[tokio::test]
async fn test_create_fnn_vpc_requires_native_networking() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let request = VpcCreateRequest {
        network_virtualization_type: Some("FNN".to_string()),
        ..vpc_request(&fixture, "vpc-fnn")
    };
    let err = coordinator
        .create_vpc(ORG, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn test_create_vpc_remote_failure_persists_nothing() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(Arc::new(MockGateway::failing(
        "CarbideInvalidArgument",
        "bad vpc",
    )));

    let err = coordinator
        .create_vpc(ORG, vpc_request(&fixture, "vpc-two"), &token())
        .await
        .unwrap_err();

    assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    assert_eq!(fixture.store.vpcs().len(), 1);
}

#[tokio::test]
async fn test_delete_vpc_with_subnets_is_rejected() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let err = coordinator
        .delete_vpc(ORG, fixture.vpc.id, &token())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Cannot delete VPC, one or more Subnets exist for this VPC"
    );
    assert!(gateway.calls().await.is_empty());
}

#[tokio::test]
async fn test_delete_empty_vpc() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());
    let vpc_id = coordinator
        .create_vpc(ORG, vpc_request(&fixture, "vpc-two"), &token())
        .await
        .unwrap()
        .vpc
        .id;

    coordinator.delete_vpc(ORG, vpc_id, &token()).await.unwrap();

    assert_eq!(fixture.store.vpc(vpc_id).unwrap().status, VpcStatus::Deleting);
    let calls = gateway.calls().await;
    assert_eq!(calls[1].request.workflow_id, format!("vpc-delete-{vpc_id}"));
    assert_eq!(calls[1].request.payload["siteId"], fixture.site.id.to_string());
}

#[tokio::test]
async fn test_delete_vpc_of_other_org() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let err = coordinator
        .delete_vpc("other-org", fixture.vpc.id, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(fixture.store.vpc(fixture.vpc.id).unwrap().status, VpcStatus::Ready);
}

#[tokio::test]
async fn test_update_vpc_virtualization_to_fnn() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let coordinator = fixture.coordinator(gateway.clone());

    let request = VpcVirtualizationUpdateRequest {
        network_virtualization_type: "FNN".to_string(),
    };
    let record = coordinator
        .update_vpc_virtualization(ORG, fixture.vpc.id, request, &token())
        .await
        .unwrap();

    assert_eq!(
        record.vpc.network_virtualization_type,
        NetworkVirtualizationType::Fnn
    );
    assert_eq!(
        gateway.calls().await[0].request.workflow_id,
        format!("vpc-update-virtualization-{}", fixture.vpc.id)
    );

    let again = VpcVirtualizationUpdateRequest {
        network_virtualization_type: "FNN".to_string(),
    };
    let err = coordinator
        .update_vpc_virtualization(ORG, fixture.vpc.id, again, &token())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "VPC virtualization type is already set to FNN");
}

#[tokio::test]
async fn test_update_vpc_virtualization_rejects_other_types() {
    let fixture = Fixture::new();
    let coordinator = fixture.coordinator(Arc::new(MockGateway::new()));

    let request = VpcVirtualizationUpdateRequest {
        network_virtualization_type: "ETHERNET_VIRTUALIZER".to_string(),
    };
    let err = coordinator
        .update_vpc_virtualization(ORG, fixture.vpc.id, request, &token())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
}
