// crates/fleetup-clients/tests/clients.rs
// ============================================================================
// Module: External Client Tests
// Description: Wire-level coverage of the service clients over stub servers.
// Purpose: Pin paths, headers, and error mapping without real upstreams.
// Dependencies: fleetup-clients, tiny_http, tokio
// ============================================================================

use std::sync::mpsc;
use std::thread;

use fleetup_clients::ClientConfig;
use fleetup_clients::InventoryHttpClient;
use fleetup_clients::ReportingHttpClient;
use fleetup_clients::WorkflowsHttpClient;
use fleetup_clients::build_http_client;
use fleetup_core::DeviceId;
use fleetup_core::DeviceSearch;
use fleetup_core::GenerateArtifactJob;
use fleetup_core::InventoryClient;
use fleetup_core::InventoryError;
use fleetup_core::ReportingClient;
use fleetup_core::RequestId;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;
use fleetup_core::WorkflowsClient;
use fleetup_core::WorkflowsError;

// ============================================================================
// SECTION: Stub Server
// ============================================================================

/// What the stub observed about one request.
struct SeenRequest {
    /// Request path with query.
    url: String,
    /// Value of the request-id header, when present.
    request_id: Option<String>,
    /// Request body.
    body: String,
}

/// Serves exactly one canned response and reports the observed request.
fn stub_one(status: u16, headers: &[(&str, &str)], body: &str) -> (String, mpsc::Receiver<SeenRequest>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("bind stub");
    let addr = server.server_addr().to_ip().expect("stub addr");
    let base = format!("http://{addr}");
    let (tx, rx) = mpsc::channel();
    let canned_body = body.to_string();
    let canned_headers: Vec<(String, String)> = headers
        .iter()
        .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
        .collect();
    thread::spawn(move || {
        let Ok(mut request) = server.recv() else {
            return;
        };
        let mut body = String::new();
        let _ = std::io::Read::read_to_string(request.as_reader(), &mut body);
        let request_id = request
            .headers()
            .iter()
            .find(|header| header.field.equiv("X-MEN-RequestID"))
            .map(|header| header.value.as_str().to_string());
        let seen = SeenRequest {
            url: request.url().to_string(),
            request_id,
            body,
        };
        let mut response = tiny_http::Response::from_string(canned_body).with_status_code(status);
        for (name, value) in &canned_headers {
            if let Ok(header) = tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()) {
                response = response.with_header(header);
            }
        }
        let _ = request.respond(response);
        let _ = tx.send(seen);
    });
    (base, rx)
}

fn scope() -> RequestScope {
    RequestScope::new(TenantId::new("acme"), RequestId::new("req-123"))
}

// ============================================================================
// SECTION: Inventory
// ============================================================================

#[tokio::test]
async fn inventory_extracts_device_type_attribute() {
    let body = r#"[{"id":"d1","attributes":[{"name":"device_type","value":"qemu","scope":"identity"}]}]"#;
    let (base, rx) = stub_one(200, &[("Content-Type", "application/json")], body);
    let client = InventoryHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );

    let device_type = client
        .get_device_type(&scope(), &DeviceId::new("d1"))
        .await
        .expect("lookup");
    assert_eq!(device_type, "qemu");

    let seen = rx.recv().expect("request observed");
    assert_eq!(seen.url, "/api/internal/v1/inventory/tenants/acme/devices/search");
    assert_eq!(seen.request_id.as_deref(), Some("req-123"));
    assert!(seen.body.contains("\"device_ids\":[\"d1\"]"));
}

#[tokio::test]
async fn inventory_maps_missing_attribute_to_unknown_type() {
    let body = r#"[{"id":"d1","attributes":[{"name":"group","value":"lab"}]}]"#;
    let (base, _rx) = stub_one(200, &[("Content-Type", "application/json")], body);
    let client = InventoryHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );

    let err = client
        .get_device_type(&scope(), &DeviceId::new("d1"))
        .await
        .expect_err("missing attribute");
    assert!(matches!(err, InventoryError::DeviceTypeUnknown(_)));
}

#[tokio::test]
async fn inventory_surfaces_upstream_errors_as_unavailable() {
    let (base, _rx) = stub_one(503, &[], "upstream down");
    let client = InventoryHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );
    let err = client
        .get_device_type(&scope(), &DeviceId::new("d1"))
        .await
        .expect_err("503");
    assert!(matches!(err, InventoryError::Unavailable(_)));
}

// ============================================================================
// SECTION: Workflows
// ============================================================================

#[tokio::test]
async fn workflows_accepts_2xx_and_sends_tenant() {
    let (base, rx) = stub_one(201, &[], "");
    let client = WorkflowsHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );
    let job = GenerateArtifactJob {
        artifact_id: "11111111-2222-3333-4444-555555555555".to_string(),
        name: "release-1".to_string(),
        device_types_compatible: vec!["qemu".to_string()],
        generator: "single_file".to_string(),
        args: String::new(),
    };
    client.start_generate_artifact(&scope(), &job).await.expect("accepted");
    let seen = rx.recv().expect("request observed");
    assert_eq!(seen.url, "/api/v1/workflow/generate_artifact");
    assert!(seen.body.contains("\"tenant_id\":\"acme\""));
    assert!(seen.body.contains("\"request_id\":\"req-123\""));
}

#[tokio::test]
async fn workflows_maps_404_to_undefined() {
    let (base, _rx) = stub_one(404, &[], "no such workflow");
    let client = WorkflowsHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );
    let err = client
        .start_reindex_reporting(&scope(), &DeviceId::new("d1"))
        .await
        .expect_err("undefined workflow");
    assert!(matches!(err, WorkflowsError::WorkflowUndefined(name) if name == "reindex_reporting"));
}

// ============================================================================
// SECTION: Reporting
// ============================================================================

#[tokio::test]
async fn reporting_search_reads_total_count_header() {
    let body = r#"[{"id":"d1","attributes":[{"name":"device_type","value":"qemu"}]}]"#;
    let (base, rx) = stub_one(
        200,
        &[("Content-Type", "application/json"), ("X-Total-Count", "42")],
        body,
    );
    let client = ReportingHttpClient::new(
        build_http_client().expect("client"),
        ClientConfig::parse(&base).expect("config"),
    );
    let search = DeviceSearch {
        page: 1,
        per_page: 20,
        group: Some("lab".to_string()),
        ..DeviceSearch::default()
    };
    let (devices, total) = client.search(&scope(), &search).await.expect("search");
    assert_eq!(devices.len(), 1);
    assert_eq!(total, 42);
    assert_eq!(devices[0].device_type.as_deref(), Some("qemu"));
    let seen = rx.recv().expect("request observed");
    assert_eq!(seen.url, "/api/internal/v1/reporting/tenants/acme/devices/search");
}
