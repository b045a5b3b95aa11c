// crates/fleetup-clients/src/workflows.rs
// ============================================================================
// Module: Workflows HTTP Client
// Description: Asynchronous job triggers against the workflows service.
// Purpose: Implement the WorkflowsClient port over the workflow REST API.
// Dependencies: fleetup-core, reqwest, serde_json, tracing
// ============================================================================

//! ## Overview
//! Workflows are fire-and-forget jobs addressed by name. A 2xx response
//! means the job was accepted; a 404 means the workflow is not defined on
//! the upstream (surfaced as its own error kind so operators can tell a
//! misconfiguration from an outage); anything else is `Unavailable`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use fleetup_core::DeviceId;
use fleetup_core::GenerateArtifactJob;
use fleetup_core::ReindexDeploymentJob;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;
use fleetup_core::WorkflowsClient;
use fleetup_core::WorkflowsError;

use crate::ClientConfig;
use crate::REQUEST_ID_HEADER;

// ============================================================================
// SECTION: Workflow Names
// ============================================================================

/// Workflow generating an artifact from raw input.
const GENERATE_ARTIFACT: &str = "generate_artifact";
/// Workflow reindexing one device in reporting.
const REINDEX_REPORTING: &str = "reindex_reporting";
/// Workflow reindexing one device-deployment pair in reporting.
const REINDEX_REPORTING_DEPLOYMENT: &str = "reindex_reporting_deployment";

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// Device reindex job body.
#[derive(Debug, Serialize)]
struct ReindexDeviceBody<'a> {
    /// Request correlation id.
    request_id: &'a str,
    /// Tenant identifier.
    tenant_id: &'a str,
    /// Device identifier.
    device_id: &'a str,
    /// Service emitting the job.
    service: &'static str,
}

/// Device-deployment reindex job body.
#[derive(Debug, Serialize)]
struct ReindexDeploymentBody<'a> {
    /// Request correlation id.
    request_id: &'a str,
    /// Tenant identifier.
    tenant_id: &'a str,
    /// Device identifier.
    device_id: String,
    /// Deployment identifier.
    deployment_id: String,
    /// Device-deployment identifier.
    id: String,
    /// Service emitting the job.
    service: &'a str,
}

/// Artifact generation job body.
#[derive(Debug, Serialize)]
struct GenerateArtifactBody<'a> {
    /// Request correlation id.
    request_id: &'a str,
    /// Tenant identifier.
    tenant_id: &'a str,
    /// Job parameters.
    #[serde(flatten)]
    job: &'a GenerateArtifactJob,
}

/// Serializable tenant value for workflow bodies.
fn tenant_value(tenant: &TenantId) -> &str {
    tenant.as_str()
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP implementation of the workflows port.
pub struct WorkflowsHttpClient {
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Service base URL.
    config: ClientConfig,
}

impl WorkflowsHttpClient {
    /// Builds a workflows client.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            client,
            config,
        }
    }

    /// Starts one named workflow with a JSON body.
    async fn start<T: Serialize + Sync>(
        &self,
        scope: &RequestScope,
        name: &str,
        batch: bool,
        body: &T,
    ) -> Result<(), WorkflowsError> {
        let suffix = if batch { "/batch" } else { "" };
        let url = self.config.endpoint(&format!("/api/v1/workflow/{name}{suffix}"));
        let response = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, scope.request_id.as_str())
            .timeout(scope.call_deadline())
            .json(body)
            .send()
            .await
            .map_err(|err| WorkflowsError::Unavailable(err.to_string()))?;
        let status = response.status();
        if status.is_success() {
            debug!(
                request_id = scope.request_id.as_str(),
                workflow = name,
                "workflow started"
            );
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(WorkflowsError::WorkflowUndefined(name.to_string()));
        }
        Err(WorkflowsError::Unavailable(format!("workflow {name} returned {status}")))
    }
}

#[async_trait]
impl WorkflowsClient for WorkflowsHttpClient {
    async fn start_generate_artifact(
        &self,
        scope: &RequestScope,
        job: &GenerateArtifactJob,
    ) -> Result<(), WorkflowsError> {
        let body = GenerateArtifactBody {
            request_id: scope.request_id.as_str(),
            tenant_id: tenant_value(&scope.tenant),
            job,
        };
        self.start(scope, GENERATE_ARTIFACT, false, &body).await
    }

    async fn start_reindex_reporting(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<(), WorkflowsError> {
        let body = ReindexDeviceBody {
            request_id: scope.request_id.as_str(),
            tenant_id: tenant_value(&scope.tenant),
            device_id: device_id.as_str(),
            service: "deployments",
        };
        self.start(scope, REINDEX_REPORTING, false, &body).await
    }

    async fn start_reindex_reporting_deployment(
        &self,
        scope: &RequestScope,
        job: &ReindexDeploymentJob,
    ) -> Result<(), WorkflowsError> {
        let body = reindex_deployment_body(scope, job);
        self.start(scope, REINDEX_REPORTING_DEPLOYMENT, false, &body).await
    }

    async fn start_reindex_reporting_deployment_batch(
        &self,
        scope: &RequestScope,
        jobs: &[ReindexDeploymentJob],
    ) -> Result<(), WorkflowsError> {
        let bodies: Vec<ReindexDeploymentBody<'_>> =
            jobs.iter().map(|job| reindex_deployment_body(scope, job)).collect();
        self.start(scope, REINDEX_REPORTING_DEPLOYMENT, true, &bodies).await
    }

    async fn check_health(&self) -> Result<(), WorkflowsError> {
        let url = self.config.endpoint("/api/v1/health");
        let response = self
            .client
            .get(&url)
            .timeout(fleetup_core::scope::DEFAULT_CALL_DEADLINE)
            .send()
            .await
            .map_err(|err| WorkflowsError::Unavailable(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WorkflowsError::Unavailable(format!(
                "workflows health returned {}",
                response.status()
            )))
        }
    }
}

/// Builds one device-deployment reindex body.
fn reindex_deployment_body<'a>(
    scope: &'a RequestScope,
    job: &ReindexDeploymentJob,
) -> ReindexDeploymentBody<'a> {
    ReindexDeploymentBody {
        request_id: scope.request_id.as_str(),
        tenant_id: tenant_value(&scope.tenant),
        device_id: job.device_id.to_string(),
        deployment_id: job.deployment_id.to_string(),
        id: job.id.to_string(),
        service: "deployments",
    }
}
