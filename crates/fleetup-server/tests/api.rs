// crates/fleetup-server/tests/api.rs
// ============================================================================
// Module: HTTP API Integration Tests
// Description: End-to-end scenarios over the full router and memory ports.
// Purpose: Pin the wire behaviour of upload, planning, dispatch, and abort.
// Dependencies: fleetup-server, fleetup-core, reqwest, tokio
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use time::OffsetDateTime;

use fleetup_artifact::ArtifactBuilder;
use fleetup_artifact::PayloadFile;
use fleetup_artifact::UpdateBuilder;
use fleetup_core::DeviceId;
use fleetup_core::DeviceListItem;
use fleetup_core::DeviceSearch;
use fleetup_core::GenerateArtifactJob;
use fleetup_core::InMemoryDataStore;
use fleetup_core::InMemoryObjectStore;
use fleetup_core::InventoryClient;
use fleetup_core::InventoryError;
use fleetup_core::ReindexDeploymentJob;
use fleetup_core::RequestScope;
use fleetup_core::WorkflowsClient;
use fleetup_core::WorkflowsError;
use fleetup_server::AppState;
use fleetup_server::FleetupConfig;
use fleetup_server::PresignVendor;
use fleetup_server::build_router;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// Inventory fake mapping device ids to types.
struct FakeInventory {
    /// Device types by device id.
    types: HashMap<String, String>,
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn get_device_type(
        &self,
        _scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<String, InventoryError> {
        self.types
            .get(device_id.as_str())
            .cloned()
            .ok_or_else(|| InventoryError::DeviceTypeUnknown(device_id.clone()))
    }

    async fn get_device_types(
        &self,
        _scope: &RequestScope,
        device_ids: &[DeviceId],
    ) -> Result<HashMap<DeviceId, String>, InventoryError> {
        Ok(device_ids
            .iter()
            .filter_map(|id| {
                self.types.get(id.as_str()).map(|ty| (id.clone(), ty.clone()))
            })
            .collect())
    }

    async fn search_devices(
        &self,
        _scope: &RequestScope,
        _search: &DeviceSearch,
    ) -> Result<(Vec<DeviceListItem>, u64), InventoryError> {
        Ok((Vec::new(), 0))
    }

    async fn check_health(&self) -> Result<(), InventoryError> {
        Ok(())
    }
}

/// Workflows fake accepting every job.
struct FakeWorkflows;

#[async_trait]
impl WorkflowsClient for FakeWorkflows {
    async fn start_generate_artifact(
        &self,
        _scope: &RequestScope,
        _job: &GenerateArtifactJob,
    ) -> Result<(), WorkflowsError> {
        Ok(())
    }

    async fn start_reindex_reporting(
        &self,
        _scope: &RequestScope,
        _device_id: &DeviceId,
    ) -> Result<(), WorkflowsError> {
        Ok(())
    }

    async fn start_reindex_reporting_deployment(
        &self,
        _scope: &RequestScope,
        _job: &ReindexDeploymentJob,
    ) -> Result<(), WorkflowsError> {
        Ok(())
    }

    async fn start_reindex_reporting_deployment_batch(
        &self,
        _scope: &RequestScope,
        _jobs: &[ReindexDeploymentJob],
    ) -> Result<(), WorkflowsError> {
        Ok(())
    }

    async fn check_health(&self) -> Result<(), WorkflowsError> {
        Ok(())
    }
}

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Running server over in-memory ports.
struct Harness {
    /// Base URL of the bound listener.
    base: String,
    /// HTTP client.
    client: reqwest::Client,
}

impl Harness {
    async fn start(device_types: &[(&str, &str)]) -> Self {
        let store = Arc::new(InMemoryDataStore::new());
        let objects: Arc<dyn fleetup_core::ObjectStore> = Arc::new(InMemoryObjectStore::new());
        let config = FleetupConfig::default_config();
        let vendor = Arc::new(PresignVendor::new(Arc::clone(&objects), &config.presign));
        let state = AppState {
            store,
            objects,
            inventory: Arc::new(FakeInventory {
                types: device_types
                    .iter()
                    .map(|(id, ty)| ((*id).to_string(), (*ty).to_string()))
                    .collect(),
            }),
            workflows: Arc::new(FakeWorkflows),
            reporting: None,
            vendor,
            config: Arc::new(config),
        };
        let app = build_router(state);
        let listener =
            tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
        let addr = listener.local_addr().expect("listener addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    fn management(&self, path: &str) -> String {
        format!("{}/api/management/v1/deployments{path}", self.base)
    }

    fn devices(&self, path: &str) -> String {
        format!("{}/api/devices/v1/deployments{path}", self.base)
    }

    fn internal(&self, path: &str) -> String {
        format!("{}/api/internal/v1/deployments{path}", self.base)
    }

    /// Device bearer token with the `sub` claim set.
    fn device_token(device: &str) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::json!({ "sub": device }).to_string().as_bytes());
        format!("Bearer {header}.{payload}.")
    }

    /// Uploads an artifact container; returns the response.
    async fn upload(&self, name: &str, types: &[&str]) -> reqwest::Response {
        let bytes = ArtifactBuilder::new(name, types)
            .update(UpdateBuilder {
                type_info: "rootfs-image".to_string(),
                files: vec![PayloadFile {
                    name: "rootfs.ext4".to_string(),
                    date: OffsetDateTime::UNIX_EPOCH,
                    bytes: vec![0xA5; 2_048],
                }],
            })
            .into_bytes()
            .expect("serialize");
        let form = reqwest::multipart::Form::new()
            .text("description", "integration upload")
            .part(
                "artifact",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name("artifact.fupa")
                    .mime_str("application/octet-stream")
                    .expect("mime"),
            );
        self.client
            .post(self.management("/artifacts"))
            .header("X-MEN-RequestID", "it-upload")
            .multipart(form)
            .send()
            .await
            .expect("upload request")
    }

    /// Creates a deployment for explicit devices; returns its id.
    async fn deploy(&self, name: &str, artifact_name: &str, devices: &[&str]) -> String {
        let response = self
            .client
            .post(self.management("/deployments"))
            .json(&serde_json::json!({
                "name": name,
                "artifact_name": artifact_name,
                "devices": devices,
            }))
            .send()
            .await
            .expect("deploy request");
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.expect("deploy body");
        body["id"].as_str().expect("deployment id").to_string()
    }

    /// Polls `/next` for a device.
    async fn next(&self, device: &str, device_type: &str) -> reqwest::Response {
        self.client
            .post(self.devices("/device/deployments/next"))
            .header(reqwest::header::AUTHORIZATION, Self::device_token(device))
            .json(&serde_json::json!({ "device_type": device_type }))
            .send()
            .await
            .expect("next request")
    }

    /// Posts a device status callback.
    async fn status(&self, id: &str, status: &str) -> reqwest::Response {
        self.client
            .put(self.devices(&format!("/device/deployments/{id}/status")))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .expect("status request")
    }
}

// ============================================================================
// SECTION: Scenarios
// ============================================================================

#[tokio::test]
async fn upload_then_lookup_succeeds() {
    let harness = Harness::start(&[]).await;
    let response = harness.upload("release-1", &["qemu", "rpi3"]).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: serde_json::Value = response.json().await.expect("body");
    assert!(body["id"].is_string());

    let listed = harness
        .client
        .get(harness.management("/artifacts"))
        .send()
        .await
        .expect("list");
    assert_eq!(listed.headers()["X-Total-Count"], "1");
    let artifacts: serde_json::Value = listed.json().await.expect("artifacts");
    assert_eq!(artifacts[0]["name"], "release-1");
}

#[tokio::test]
async fn conflicting_artifact_is_rejected_with_422() {
    let harness = Harness::start(&[]).await;
    assert_eq!(harness.upload("release-1", &["qemu", "rpi3"]).await.status(), StatusCode::CREATED);
    let second = harness.upload("release-1", &["rpi3"]).await;
    assert_eq!(second.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: serde_json::Value = second.json().await.expect("error body");
    assert!(body["error"].as_str().expect("error").contains("already exists"));
    assert!(body["request_id"].is_string());
}

#[tokio::test]
async fn deployment_reaches_finished_through_device_callbacks() {
    let harness = Harness::start(&[("d1", "qemu")]).await;
    assert_eq!(harness.upload("release-1", &["qemu"]).await.status(), StatusCode::CREATED);
    let deployment_id = harness.deploy("p", "release-1", &["d1"]).await;

    // Dispatch: payload carries a signed source and the row id.
    let next = harness.next("d1", "qemu").await;
    assert_eq!(next.status(), StatusCode::OK);
    let instructions: serde_json::Value = next.json().await.expect("instructions");
    let dd_id = instructions["id"].as_str().expect("dd id").to_string();
    assert!(
        instructions["artifact"]["source"]["uri"].as_str().expect("uri").contains("memory://")
    );

    // A repeated poll returns the same assignment.
    let again = harness.next("d1", "qemu").await;
    assert_eq!(again.status(), StatusCode::OK);
    let repeated: serde_json::Value = again.json().await.expect("instructions");
    assert_eq!(repeated["id"].as_str(), Some(dd_id.as_str()));

    assert_eq!(harness.status(&dd_id, "installing").await.status(), StatusCode::NO_CONTENT);
    assert_eq!(harness.status(&dd_id, "success").await.status(), StatusCode::NO_CONTENT);

    let deployment = harness
        .client
        .get(harness.management(&format!("/deployments/{deployment_id}")))
        .send()
        .await
        .expect("get deployment");
    let view: serde_json::Value = deployment.json().await.expect("view");
    assert_eq!(view["status"], "finished");
    assert_eq!(view["stats"]["success"], 1);
    assert!(view["finished"].is_string());

    // Nothing further is due.
    assert_eq!(harness.next("d1", "qemu").await.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn incompatible_device_finishes_deployment_immediately() {
    let harness = Harness::start(&[("d2", "beagle")]).await;
    assert_eq!(harness.upload("release-1", &["qemu"]).await.status(), StatusCode::CREATED);
    let deployment_id = harness.deploy("p", "release-1", &["d2"]).await;
    let view: serde_json::Value = harness
        .client
        .get(harness.management(&format!("/deployments/{deployment_id}")))
        .send()
        .await
        .expect("get deployment")
        .json()
        .await
        .expect("view");
    assert_eq!(view["status"], "finished");
    assert_eq!(view["stats"]["noartifact"], 1);
}

#[tokio::test]
async fn abort_mid_flight_conflicts_late_success() {
    let harness = Harness::start(&[("d1", "qemu")]).await;
    assert_eq!(harness.upload("release-1", &["qemu"]).await.status(), StatusCode::CREATED);
    let deployment_id = harness.deploy("p", "release-1", &["d1"]).await;
    let next = harness.next("d1", "qemu").await;
    let instructions: serde_json::Value = next.json().await.expect("instructions");
    let dd_id = instructions["id"].as_str().expect("dd id").to_string();

    let aborted = harness
        .client
        .put(harness.management(&format!("/deployments/{deployment_id}/status")))
        .json(&serde_json::json!({ "status": "aborted" }))
        .send()
        .await
        .expect("abort");
    assert_eq!(aborted.status(), StatusCode::NO_CONTENT);

    let late = harness.status(&dd_id, "success").await;
    assert_eq!(late.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn log_upload_is_one_shot_over_the_wire() {
    let harness = Harness::start(&[("d1", "qemu")]).await;
    assert_eq!(harness.upload("release-1", &["qemu"]).await.status(), StatusCode::CREATED);
    harness.deploy("p", "release-1", &["d1"]).await;
    let next = harness.next("d1", "qemu").await;
    let instructions: serde_json::Value = next.json().await.expect("instructions");
    let dd_id = instructions["id"].as_str().expect("dd id").to_string();

    let log = serde_json::json!({
        "messages": [
            { "level": "error", "message": "update failed", "timestamp": "2026-01-01T00:00:00Z" }
        ]
    });
    let first = harness
        .client
        .put(harness.devices(&format!("/device/deployments/{dd_id}/log")))
        .json(&log)
        .send()
        .await
        .expect("first log");
    assert_eq!(first.status(), StatusCode::NO_CONTENT);
    let second = harness
        .client
        .put(harness.devices(&format!("/device/deployments/{dd_id}/log")))
        .json(&log)
        .send()
        .await
        .expect("second log");
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn device_without_identity_is_rejected() {
    let harness = Harness::start(&[]).await;
    let response = harness
        .client
        .post(harness.devices("/device/deployments/next"))
        .json(&serde_json::json!({ "device_type": "qemu" }))
        .send()
        .await
        .expect("next");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn probes_answer() {
    let harness = Harness::start(&[]).await;
    let alive = harness.client.get(harness.internal("/alive")).send().await.expect("alive");
    assert_eq!(alive.status(), StatusCode::NO_CONTENT);
    let health = harness.client.get(harness.internal("/health")).send().await.expect("health");
    assert_eq!(health.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn releases_group_uploaded_artifacts() {
    let harness = Harness::start(&[]).await;
    assert_eq!(harness.upload("release-1", &["qemu"]).await.status(), StatusCode::CREATED);
    assert_eq!(harness.upload("release-1", &["rpi3"]).await.status(), StatusCode::CREATED);
    assert_eq!(harness.upload("release-2", &["qemu"]).await.status(), StatusCode::CREATED);
    let response = harness
        .client
        .get(harness.management("/releases"))
        .send()
        .await
        .expect("releases");
    assert_eq!(response.headers()["X-Total-Count"], "2");
    let releases: serde_json::Value = response.json().await.expect("body");
    let release_1 = releases
        .as_array()
        .expect("array")
        .iter()
        .find(|release| release["name"] == "release-1")
        .expect("release-1");
    assert_eq!(release_1["artifacts"].as_array().expect("members").len(), 2);
}
