// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Router tests driving requests through the full axum stack.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::{Fixture, ORG};
use http_body_util::BodyExt;
use metalplane_api::error::{ApiError, Result};
use metalplane_api::http::{self, AppState, Authorizer, PRINCIPAL_HEADER};
use metalplane_api::workflow::MockGateway;
use metalplane_core::status::{InstanceStatus, VpcStatus};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(fixture: &Fixture, gateway: Arc<MockGateway>) -> Router {
    http::router(AppState::new(fixture.coordinator(gateway)))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let fixture = Fixture::new();
    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn test_create_instance_returns_created() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");

    let body = json!({
        "name": "web-1",
        "tenantId": fixture.tenant.id,
        "instanceTypeId": fixture.instance_type.id,
        "vpcId": fixture.vpc.id,
        "ipxeScript": "#!ipxe\nchain http://boot.local/menu",
        "interfaces": [{ "subnetId": fixture.subnet.id }],
    });
    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(json_request(
            "POST",
            &format!("/v2/org/{ORG}/carbide/instance"),
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let record = body_json(response).await;
    assert_eq!(record["name"], "web-1");
    assert_eq!(record["machineId"], "machine-1");
    assert_eq!(record["status"], "Pending");
    assert_eq!(record["interfaces"].as_array().unwrap().len(), 1);
    assert_eq!(record["statusHistory"].as_array().unwrap().len(), 1);
    assert!(record["nvLinkInterfaces"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let fixture = Fixture::new();
    let request = Request::post(format!("/v2/org/{ORG}/carbide/instance"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{ not json"))
        .unwrap();

    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Failed to parse request data")
    );
}

#[tokio::test]
async fn test_capacity_error_renders_forbidden() {
    let fixture = Fixture::new();
    fixture.add_constraint(0, 0);
    fixture.add_machine("machine-1");

    let body = serde_json::to_value(fixture.create_request("web-1")).unwrap();
    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(json_request(
            "POST",
            &format!("/v2/org/{ORG}/carbide/instance"),
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["code"], "CAPACITY_EXCEEDED");
}

#[tokio::test]
async fn test_delete_instance_without_body_is_accepted() {
    let fixture = Fixture::new();
    fixture.add_constraint(1, 0);
    fixture.add_machine("machine-1");
    let instance_id = fixture
        .coordinator(Arc::new(MockGateway::new()))
        .create_instance(
            ORG,
            fixture.create_request("web-1"),
            &tokio_util::sync::CancellationToken::new(),
        )
        .await
        .unwrap()
        .instance
        .id;

    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(
            Request::delete(format!("/v2/org/{ORG}/carbide/instance/{instance_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_text(response).await, "Deletion request was accepted");
    assert_eq!(
        fixture.store.instance(instance_id).unwrap().status,
        InstanceStatus::Terminating
    );
}

#[tokio::test]
async fn test_delete_instance_with_unknown_health_category() {
    let fixture = Fixture::new();
    let body = json!({ "machineHealthIssue": { "category": "Cosmic" } });

    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(json_request(
            "DELETE",
            &format!("/v2/org/{ORG}/carbide/instance/{}", uuid::Uuid::new_v4()),
            body,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_create_vpc_and_delete_it() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());

    let response = app(&fixture, gateway.clone())
        .oneshot(json_request(
            "POST",
            &format!("/v2/org/{ORG}/carbide/vpc"),
            json!({ "name": "vpc-two", "siteId": fixture.site.id }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let record = body_json(response).await;
    assert_eq!(record["status"], "Ready");
    let vpc_id: uuid::Uuid = serde_json::from_value(record["id"].clone()).unwrap();

    let response = app(&fixture, gateway)
        .oneshot(
            Request::delete(format!("/v2/org/{ORG}/carbide/vpc/{vpc_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_text(response).await, "Deletion request was accepted");
    assert_eq!(fixture.store.vpc(vpc_id).unwrap().status, VpcStatus::Deleting);
}

#[tokio::test]
async fn test_unknown_vpc_is_not_found() {
    let fixture = Fixture::new();
    let response = app(&fixture, Arc::new(MockGateway::new()))
        .oneshot(json_request(
            "PATCH",
            &format!("/v2/org/{ORG}/carbide/vpc/{}", uuid::Uuid::new_v4()),
            json!({ "name": "renamed" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

struct PrincipalRequired;

#[async_trait]
impl Authorizer for PrincipalRequired {
    async fn authorize(&self, _org: &str, principal: Option<&str>) -> Result<()> {
        match principal {
            Some("admin@acme") => Ok(()),
            _ => Err(ApiError::forbidden("User is not authorized for Org")),
        }
    }
}

#[tokio::test]
async fn test_authorizer_rejects_before_any_work() {
    let fixture = Fixture::new();
    let gateway = Arc::new(MockGateway::new());
    let state = AppState::new(fixture.coordinator(gateway.clone()))
        .with_authorizer(Arc::new(PrincipalRequired));

    let mut request = json_request(
        "POST",
        &format!("/v2/org/{ORG}/carbide/vpc"),
        json!({ "name": "vpc-two", "siteId": fixture.site.id }),
    );
    request
        .headers_mut()
        .insert(PRINCIPAL_HEADER, "intruder@elsewhere".parse().unwrap());
    let response = http::router(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(gateway.calls().await.is_empty());
    assert_eq!(fixture.store.vpcs().len(), 1);
}
