// crates/fleetup-server/src/api/management.rs
// ============================================================================
// Module: Management API
// Description: Operator-facing artifact, deployment, and release endpoints.
// Purpose: Expose ingestion, planning, and rollout control over REST.
// Dependencies: axum, fleetup-core, crate::ingest, crate::presign
// ============================================================================

//! ## Overview
//! The management surface lives under `/api/management/v1/deployments`.
//! Artifact uploads arrive as multipart with a fixed permitted part set
//! ending in the `artifact` file part; deployments are planned
//! synchronously at creation time; status changes are restricted to
//! abort/pause/resume.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::Multipart;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use bytes::Bytes;
use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;

use fleetup_core::ArtifactFilter;
use fleetup_core::ArtifactId;
use fleetup_core::DeploymentConstructor;
use fleetup_core::DeploymentFilter;
use fleetup_core::DeploymentId;
use fleetup_core::DeploymentStatus;
use fleetup_core::DeploymentType;
use fleetup_core::DeviceControl;
use fleetup_core::DeviceDeploymentQuery;
use fleetup_core::DeviceFilter;
use fleetup_core::DeviceId;
use fleetup_core::DeviceSelector;
use fleetup_core::GenerateArtifactJob;
use fleetup_core::ObjectKey;
use fleetup_core::PhaseSpec;
use fleetup_core::Planner;
use fleetup_core::RequestScope;
use fleetup_core::SortOrder;
use fleetup_core::StorageUsage;
use fleetup_core::UploadIntent;
use fleetup_core::model::limits::STORAGE_LIMIT;

use crate::api::PageQuery;
use crate::error::ApiError;
use crate::identity::Scoped;
use crate::ingest;
use crate::ingest::UploadMeta;
use crate::ingest::UploadSource;
use crate::state::AppState;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the management router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/artifacts", get(list_artifacts).post(upload_artifact))
        .route("/artifacts/generate", post(generate_artifact))
        .route("/artifacts/directupload", post(direct_upload))
        .route(
            "/artifacts/{id}",
            get(get_artifact).put(edit_artifact).delete(delete_artifact),
        )
        .route("/artifacts/{id}/download", get(download_artifact))
        .route("/deployments", get(list_deployments).post(create_deployment))
        .route("/deployments/{id}", get(get_deployment))
        .route("/deployments/{id}/status", put(set_deployment_status))
        .route("/deployments/{id}/devices", get(list_deployment_devices))
        .route("/deployments/{id}/devices/{device_id}/log", get(get_device_log))
        .route("/releases", get(list_releases))
        .route("/limits/storage", get(get_storage_limit))
}

// ============================================================================
// SECTION: Artifact Upload
// ============================================================================

/// Multipart parts accepted by the upload endpoint, in any order before
/// the final `artifact` file part.
const PERMITTED_PARTS: &[&str] =
    &["size", "description", "artifact_id", "type", "args", "name", "device_types_compatible"];

/// Upload source over the trailing multipart file part.
struct FieldSource<'a> {
    /// The artifact file part.
    field: axum::extract::multipart::Field<'a>,
}

#[async_trait]
impl UploadSource for FieldSource<'_> {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, String> {
        self.field.chunk().await.map_err(|err| err.to_string())
    }
}

/// Handles `POST /artifacts` (multipart upload).
async fn upload_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    match try_upload_artifact(&state, &scope, multipart).await {
        Ok(outcome) => (
            StatusCode::CREATED,
            [(
                axum::http::header::LOCATION,
                format!("/api/management/v1/deployments/artifacts/{}", outcome.artifact_id),
            )],
            Json(serde_json::json!({ "id": outcome.artifact_id })),
        )
            .into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Upload implementation shared with the internal tenant endpoint.
pub(crate) async fn try_upload_artifact(
    state: &AppState,
    scope: &RequestScope,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<ingest::IngestOutcome, ApiError> {
    let mut multipart = multipart.map_err(|_| ApiError::UnsupportedMediaType)?;
    let mut meta = UploadMeta::default();
    loop {
        let field = multipart
            .next_field()
            .await
            .map_err(|err| ApiError::InvalidInput(format!("multipart read failed: {err}")))?;
        let Some(field) = field else {
            return Err(ApiError::InvalidInput("artifact part missing".to_string()));
        };
        let name = field.name().unwrap_or_default().to_string();
        // The artifact part must be a file (non-empty content type) and is
        // consumed as a stream; everything after it is rejected.
        if name == "artifact" {
            if field.content_type().unwrap_or_default().is_empty() {
                return Err(ApiError::InvalidInput("artifact part must be a file".to_string()));
            }
            let mut source = FieldSource {
                field,
            };
            return ingest::ingest_artifact(
                state.store.as_ref(),
                state.objects.clone(),
                scope,
                meta,
                &mut source,
                state.config.storage.max_image_size,
                OffsetDateTime::now_utc(),
            )
            .await;
        }
        if !PERMITTED_PARTS.contains(&name.as_str()) {
            return Err(ApiError::InvalidInput(format!("unexpected multipart field: {name}")));
        }
        let value = field
            .text()
            .await
            .map_err(|err| ApiError::InvalidInput(format!("multipart field invalid: {err}")))?;
        match name.as_str() {
            "size" => {
                let size = value
                    .parse()
                    .map_err(|_| ApiError::InvalidInput("size must be an integer".to_string()))?;
                meta.declared_size = Some(size);
            }
            "description" => meta.description = Some(value),
            "artifact_id" => {
                let id = ArtifactId::parse(&value).ok_or_else(|| {
                    ApiError::InvalidInput("artifact_id must be a uuid".to_string())
                })?;
                meta.artifact_id = Some(id);
            }
            "name" => meta.declared_name = Some(value),
            "device_types_compatible" => {
                meta.declared_device_types =
                    value.split(',').map(|part| part.trim().to_string()).collect();
            }
            // `type` and `args` only matter for the generate flow.
            _ => {}
        }
    }
}

// ============================================================================
// SECTION: Artifact Management
// ============================================================================

/// Query parameters for the artifact listing.
#[derive(Debug, Deserialize)]
struct ArtifactListQuery {
    /// Exact release-name filter.
    #[serde(default)]
    name: Option<String>,
    /// Sort direction over modification time.
    #[serde(default)]
    sort: Option<String>,
    /// 1-based page number.
    #[serde(default = "crate::api::default_page")]
    page: u32,
    /// Page size.
    #[serde(default = "crate::api::default_per_page")]
    per_page: u32,
}

/// Handles `GET /artifacts`.
async fn list_artifacts(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Query(query): Query<ArtifactListQuery>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let sort = match query.sort.as_deref() {
        Some("asc") => SortOrder::Ascending,
        _ => SortOrder::Descending,
    };
    let filter = ArtifactFilter {
        name: query.name,
    };
    let page = crate::api::clamp_pagination(query.page, query.per_page);
    match state.store.list_artifacts(&scope, &filter, page, sort).await {
        Ok((artifacts, total)) => {
            ([("X-Total-Count", total.to_string())], Json(artifacts)).into_response()
        }
        Err(error) => ApiError::from(error).into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /artifacts/{id}`.
async fn get_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    match try_get_artifact(&state, &scope, &id).await {
        Ok(artifact) => Json(artifact).into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

async fn try_get_artifact(
    state: &AppState,
    scope: &RequestScope,
    id: &str,
) -> Result<fleetup_core::Artifact, ApiError> {
    let id = parse_artifact_id(id)?;
    state.store.artifact(scope, id).await?.ok_or(ApiError::NotFound)
}

/// Body of the artifact edit endpoint.
#[derive(Debug, Deserialize)]
struct ArtifactEdit {
    /// New description.
    #[serde(default)]
    description: Option<String>,
}

/// Handles `PUT /artifacts/{id}`.
async fn edit_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
    Json(body): Json<ArtifactEdit>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        let id = parse_artifact_id(&id)?;
        if state.store.update_artifact_description(&scope, id, body.description).await? {
            Ok(StatusCode::NO_CONTENT)
        } else {
            Err(ApiError::NotFound)
        }
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `DELETE /artifacts/{id}`.
async fn delete_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        let id = parse_artifact_id(&id)?;
        if state.store.exist_unfinished_by_artifact_id(&scope, id).await? {
            return Err(ApiError::Conflict(
                "artifact is referenced by an active deployment".to_string(),
            ));
        }
        if !state.store.delete_artifact(&scope, id).await? {
            return Err(ApiError::NotFound);
        }
        // The blob may outlive the row only until this best-effort delete.
        let key = ObjectKey::for_artifact(&scope.tenant, id);
        let _ = state.objects.delete(&scope, &key).await;
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /artifacts/{id}/download`.
async fn download_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let artifact = try_get_artifact(&state, &scope, &id).await?;
        let key = ObjectKey::for_artifact(&scope.tenant, artifact.id);
        let link = state
            .objects
            .presign_get(
                &scope,
                &key,
                state.config.storage.download_ttl(),
                Some(&artifact.filename()),
            )
            .await?;
        Ok(Json(link))
    }
    .await;
    match outcome {
        Ok(link) => link.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Body of the generate endpoint.
#[derive(Debug, Deserialize)]
struct GenerateRequest {
    /// Release name of the generated artifact.
    name: String,
    /// Device types the generated artifact is compatible with.
    device_types_compatible: Vec<String>,
    /// Generator type tag.
    #[serde(rename = "type")]
    generator: String,
    /// Opaque generator arguments.
    #[serde(default)]
    args: String,
}

/// Handles `POST /artifacts/generate`.
async fn generate_artifact(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Json(body): Json<GenerateRequest>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        if body.name.trim().is_empty() || body.device_types_compatible.is_empty() {
            return Err(ApiError::InvalidInput(
                "name and device_types_compatible must be set".to_string(),
            ));
        }
        let artifact_id = ArtifactId::random();
        // The intent lets the storage daemon reap the blob if the
        // generator never commits an artifact row.
        let intent = UploadIntent {
            artifact_id,
            tenant: scope.tenant.clone(),
            expire: OffsetDateTime::now_utc() + state.config.storage.upload_ttl(),
        };
        state.store.insert_upload_intent(&scope, &intent).await?;
        let job = GenerateArtifactJob {
            artifact_id: artifact_id.to_string(),
            name: body.name,
            device_types_compatible: body.device_types_compatible,
            generator: body.generator,
            args: body.args,
        };
        state.workflows.start_generate_artifact(&scope, &job).await?;
        Ok((StatusCode::CREATED, Json(serde_json::json!({ "id": artifact_id }))))
    }
    .await;
    match outcome {
        Ok(created) => created.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `POST /artifacts/directupload`.
async fn direct_upload(State(state): State<AppState>, Scoped(scope): Scoped) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = ingest::create_direct_upload(
        state.store.as_ref(),
        state.objects.as_ref(),
        &scope,
        state.config.storage.upload_ttl(),
        OffsetDateTime::now_utc(),
    )
    .await;
    match outcome {
        Ok((artifact_id, link)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "id": artifact_id,
                "uri": link.uri,
                "expire": link.expire,
                "headers": link.headers,
            })),
        )
            .into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Deployments
// ============================================================================

/// Wire shape of the deployment-creation body.
#[derive(Debug, Deserialize)]
struct NewDeployment {
    /// Operator-assigned name.
    name: String,
    /// Target release name.
    artifact_name: String,
    /// Specific artifact ids, when restricted.
    #[serde(default)]
    artifacts: Vec<ArtifactId>,
    /// Explicit device ids.
    #[serde(default)]
    devices: Option<Vec<DeviceId>>,
    /// Inventory group selector.
    #[serde(default)]
    group: Option<String>,
    /// Dynamic filter selector.
    #[serde(default)]
    filter: Option<Vec<DeviceFilter>>,
    /// Phase plan.
    #[serde(default)]
    phases: Vec<PhaseSpec>,
    /// Max-devices cap; 0 means unlimited.
    #[serde(default)]
    max_devices: u32,
    /// Per-device failure retries.
    #[serde(default)]
    retries: u32,
    /// Install even when already running the artifact.
    #[serde(default)]
    force_installation: bool,
    /// Payload kind.
    #[serde(default, rename = "type")]
    deployment_type: DeploymentType,
    /// Opaque update control map.
    #[serde(default)]
    update_control_map: Option<serde_json::Value>,
}

impl NewDeployment {
    /// Converts the wire body into the validated constructor.
    fn into_constructor(self) -> Result<DeploymentConstructor, ApiError> {
        let selector = match (self.devices, self.group, self.filter) {
            (Some(devices), None, None) => DeviceSelector::Devices(devices),
            (None, Some(group), None) => DeviceSelector::Group(group),
            (None, None, Some(filter)) => DeviceSelector::Filter(filter),
            _ => {
                return Err(ApiError::InvalidInput(
                    "exactly one of devices, group, or filter must be set".to_string(),
                ));
            }
        };
        Ok(DeploymentConstructor {
            name: self.name,
            artifact_name: self.artifact_name,
            artifacts: self.artifacts,
            selector,
            phases: self.phases,
            max_devices: self.max_devices,
            retries: self.retries,
            force_installation: self.force_installation,
            deployment_type: self.deployment_type,
            update_control_map: self.update_control_map,
        })
    }
}

/// Deployment row plus its derived status, as returned on the wire.
#[derive(Debug, Serialize)]
struct DeploymentView {
    /// The deployment row.
    #[serde(flatten)]
    deployment: fleetup_core::Deployment,
    /// Derived aggregate status.
    status: DeploymentStatus,
}

impl DeploymentView {
    fn new(deployment: fleetup_core::Deployment, now: OffsetDateTime) -> Self {
        let status = deployment.status(now);
        Self {
            deployment,
            status,
        }
    }
}

/// Handles `POST /deployments`.
async fn create_deployment(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Json(body): Json<NewDeployment>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let constructor = body.into_constructor()?;
        let planner = Planner::new(
            state.store.as_ref(),
            state.inventory.as_ref(),
            state.reporting.as_deref(),
        );
        let deployment = planner
            .create_deployment(&scope, &constructor, OffsetDateTime::now_utc())
            .await?;
        Ok((
            StatusCode::CREATED,
            [(
                axum::http::header::LOCATION,
                format!("/api/management/v1/deployments/deployments/{}", deployment.id),
            )],
            Json(serde_json::json!({ "id": deployment.id })),
        ))
    }
    .await;
    match outcome {
        Ok(created) => created.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Query parameters for the deployment listing.
#[derive(Debug, Deserialize)]
struct DeploymentListQuery {
    /// Substring filter on the deployment name.
    #[serde(default)]
    search: Option<String>,
    /// 1-based page number.
    #[serde(default = "crate::api::default_page")]
    page: u32,
    /// Page size.
    #[serde(default = "crate::api::default_per_page")]
    per_page: u32,
}

/// Handles `GET /deployments`.
async fn list_deployments(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Query(query): Query<DeploymentListQuery>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let filter = DeploymentFilter {
        name: query.search,
        unfinished_only: false,
    };
    let page = crate::api::clamp_pagination(query.page, query.per_page);
    match state.store.list_deployments(&scope, &filter, page).await {
        Ok((deployments, total)) => {
            let now = OffsetDateTime::now_utc();
            let views: Vec<DeploymentView> =
                deployments.into_iter().map(|d| DeploymentView::new(d, now)).collect();
            ([("X-Total-Count", total.to_string())], Json(views)).into_response()
        }
        Err(error) => ApiError::from(error).into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /deployments/{id}`.
async fn get_deployment(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let id = parse_deployment_id(&id)?;
        let deployment = state.store.deployment(&scope, id).await?.ok_or(ApiError::NotFound)?;
        Ok(Json(DeploymentView::new(deployment, OffsetDateTime::now_utc())))
    }
    .await;
    match outcome {
        Ok(view) => view.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Body of the deployment status endpoint.
#[derive(Debug, Deserialize)]
struct DeploymentStatusChange {
    /// Requested state: `aborted`, `paused`, or `resumed`.
    status: String,
}

/// Handles `PUT /deployments/{id}/status`.
async fn set_deployment_status(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
    Json(body): Json<DeploymentStatusChange>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        let id = parse_deployment_id(&id)?;
        let control = DeviceControl::new(state.store.as_ref());
        match body.status.as_str() {
            "aborted" => {
                control.abort_deployment(&scope, id, OffsetDateTime::now_utc()).await?;
            }
            "paused" => control.set_paused(&scope, id, true).await?,
            "resumed" | "continue" => control.set_paused(&scope, id, false).await?,
            other => {
                return Err(ApiError::InvalidInput(format!(
                    "unsupported deployment status: {other}"
                )));
            }
        }
        Ok(StatusCode::NO_CONTENT)
    }
    .await;
    match outcome {
        Ok(status) => status.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /deployments/{id}/devices`.
async fn list_deployment_devices(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome = async {
        let id = parse_deployment_id(&id)?;
        if state.store.deployment(&scope, id).await?.is_none() {
            return Err(ApiError::NotFound);
        }
        let pagination = page.pagination();
        let query = DeviceDeploymentQuery {
            skip: pagination.skip(),
            limit: pagination.limit(),
            deployment_id: Some(id),
            active_only: false,
            include_finished: true,
        };
        Ok(Json(state.store.device_deployments(&scope, &query).await?))
    }
    .await;
    match outcome {
        Ok(rows) => rows.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /deployments/{id}/devices/{device_id}/log`.
async fn get_device_log(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Path((id, device_id)): Path<(String, String)>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let id = parse_deployment_id(&id)?;
        let query = DeviceDeploymentQuery {
            skip: 0,
            limit: 0,
            deployment_id: Some(id),
            active_only: false,
            include_finished: true,
        };
        let rows = state.store.device_deployments(&scope, &query).await?;
        let row = rows
            .into_iter()
            .find(|row| row.device_id == DeviceId::new(device_id.clone()))
            .ok_or(ApiError::NotFound)?;
        let control = DeviceControl::new(state.store.as_ref());
        Ok(Json(control.log(&scope, row.id).await?))
    }
    .await;
    match outcome {
        Ok(log) => log.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Releases & Limits
// ============================================================================

/// Query parameters for the release listing.
#[derive(Debug, Deserialize)]
struct ReleaseListQuery {
    /// Exact release-name filter.
    #[serde(default)]
    name: Option<String>,
    /// 1-based page number.
    #[serde(default = "crate::api::default_page")]
    page: u32,
    /// Page size.
    #[serde(default = "crate::api::default_per_page")]
    per_page: u32,
}

/// Handles `GET /releases`.
async fn list_releases(
    State(state): State<AppState>,
    Scoped(scope): Scoped,
    Query(query): Query<ReleaseListQuery>,
) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let filter = ArtifactFilter {
        name: query.name,
    };
    let page = crate::api::clamp_pagination(query.page, query.per_page);
    match state.store.list_releases(&scope, &filter, page).await {
        Ok((releases, total)) => {
            ([("X-Total-Count", total.to_string())], Json(releases)).into_response()
        }
        Err(error) => ApiError::from(error).into_response_with_request_id(&request_id),
    }
}

/// Handles `GET /limits/storage`.
async fn get_storage_limit(State(state): State<AppState>, Scoped(scope): Scoped) -> Response {
    let request_id = scope.request_id.as_str().to_string();
    let outcome: Result<_, ApiError> = async {
        let limit = state
            .store
            .limit(&scope, STORAGE_LIMIT)
            .await?
            .map_or(0, |limit| limit.value);
        let usage = state.store.storage_usage(&scope).await?;
        Ok(Json(StorageUsage {
            limit,
            usage,
        }))
    }
    .await;
    match outcome {
        Ok(body) => body.into_response(),
        Err(error) => error.into_response_with_request_id(&request_id),
    }
}

// ============================================================================
// SECTION: Id Parsing
// ============================================================================

/// Parses an artifact id path segment.
fn parse_artifact_id(raw: &str) -> Result<ArtifactId, ApiError> {
    ArtifactId::parse(raw)
        .ok_or_else(|| ApiError::InvalidInput("artifact id must be a uuid".to_string()))
}

/// Parses a deployment id path segment.
fn parse_deployment_id(raw: &str) -> Result<DeploymentId, ApiError> {
    DeploymentId::parse(raw)
        .ok_or_else(|| ApiError::InvalidInput("deployment id must be a uuid".to_string()))
}
