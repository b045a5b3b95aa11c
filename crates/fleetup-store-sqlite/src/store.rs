// crates/fleetup-store-sqlite/src/store.rs
// ============================================================================
// Module: SQLite DataStore
// Description: DataStore implementation over a mutex-guarded connection.
// Purpose: Durable metadata persistence with the reference transition rules.
// Dependencies: fleetup-core, rusqlite, serde_json, tokio
// ============================================================================

//! ## Overview
//! One writer connection serves the process; every port call hops onto the
//! blocking pool, takes the connection lock, and runs its statements. Row
//! documents are JSON; sort/filter columns are kept in sync with the
//! document on every write. Transitions and batch terminations run inside
//! transactions so counters never drift from their rows.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use rusqlite::ErrorCode;
use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;
use serde::de::DeserializeOwned;
use serde::Serialize;
use time::OffsetDateTime;

use fleetup_core::Artifact;
use fleetup_core::ArtifactFilter;
use fleetup_core::ArtifactId;
use fleetup_core::DataStore;
use fleetup_core::Deployment;
use fleetup_core::DeploymentFilter;
use fleetup_core::DeploymentId;
use fleetup_core::DeviceDeployment;
use fleetup_core::DeviceDeploymentId;
use fleetup_core::DeviceDeploymentLog;
use fleetup_core::DeviceDeploymentQuery;
use fleetup_core::DeviceDeploymentStatus;
use fleetup_core::DeviceId;
use fleetup_core::Limit;
use fleetup_core::Pagination;
use fleetup_core::Release;
use fleetup_core::RequestScope;
use fleetup_core::SortOrder;
use fleetup_core::StoreError;
use fleetup_core::TransitionRequest;
use fleetup_core::UploadIntent;

// ============================================================================
// SECTION: Schema
// ============================================================================

/// Schema applied on open and on tenant migration; idempotent.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artifacts (
    tenant      TEXT NOT NULL,
    id          TEXT NOT NULL,
    name        TEXT NOT NULL,
    modified_ms INTEGER NOT NULL,
    size        INTEGER NOT NULL,
    doc         TEXT NOT NULL,
    PRIMARY KEY (tenant, id)
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_artifact_compat
    ON artifact_compat (tenant, name, device_type);
CREATE TABLE IF NOT EXISTS deployments (
    tenant      TEXT NOT NULL,
    id          TEXT NOT NULL,
    name        TEXT NOT NULL,
    created_ms  INTEGER NOT NULL,
    finished_ms INTEGER,
    doc         TEXT NOT NULL,
    PRIMARY KEY (tenant, id)
);
CREATE TABLE IF NOT EXISTS device_deployments (
    tenant        TEXT NOT NULL,
    id            TEXT NOT NULL,
    deployment_id TEXT NOT NULL,
    device_id     TEXT NOT NULL,
    artifact_id   TEXT,
    status        TEXT NOT NULL,
    created_ms    INTEGER NOT NULL,
    doc           TEXT NOT NULL,
    PRIMARY KEY (tenant, id),
    UNIQUE (tenant, deployment_id, device_id)
);
CREATE INDEX IF NOT EXISTS idx_dd_device
    ON device_deployments (tenant, device_id, status, created_ms);
CREATE INDEX IF NOT EXISTS idx_dd_deployment
    ON device_deployments (tenant, deployment_id, created_ms);
CREATE TABLE IF NOT EXISTS device_deployment_logs (
    tenant               TEXT NOT NULL,
    device_deployment_id TEXT NOT NULL,
    doc                  TEXT NOT NULL,
    PRIMARY KEY (tenant, device_deployment_id)
);
CREATE TABLE IF NOT EXISTS tenant_limits (
    tenant TEXT NOT NULL,
    name   TEXT NOT NULL,
    value  INTEGER NOT NULL,
    PRIMARY KEY (tenant, name)
);
CREATE TABLE IF NOT EXISTS upload_intents (
    tenant      TEXT NOT NULL,
    artifact_id TEXT NOT NULL,
    expire_ms   INTEGER NOT NULL,
    doc         TEXT NOT NULL,
    PRIMARY KEY (tenant, artifact_id)
);
";

/// Compat table is created separately so the unique index statement above
/// can reference it regardless of statement order in `execute_batch`.
const SCHEMA_COMPAT: &str = "
CREATE TABLE IF NOT EXISTS artifact_compat (
    tenant      TEXT NOT NULL,
    name        TEXT NOT NULL,
    device_type TEXT NOT NULL,
    artifact_id TEXT NOT NULL
);
";

/// Default busy timeout for the writer connection.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: Config
// ============================================================================

/// SQLite store configuration.
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// Database file path.
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
}

impl SqliteStoreConfig {
    /// Builds a configuration with defaults for the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Durable [`DataStore`] over SQLite.
pub struct SqliteDataStore {
    /// Writer connection shared by all calls.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDataStore {
    /// Opens (or creates) the database and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened.
    pub fn open(config: &SqliteStoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(&config.path).map_err(db_err)?;
        Self::from_connection(conn, config.busy_timeout_ms)
    }

    /// Opens an in-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::from_connection(conn, DEFAULT_BUSY_TIMEOUT_MS)
    }

    /// Applies pragmas and schema to a fresh connection.
    fn from_connection(conn: Connection, busy_timeout_ms: u64) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_millis(busy_timeout_ms)).map_err(db_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(db_err)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(db_err)?;
        conn.execute_batch(SCHEMA_COMPAT).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure against the connection on the blocking pool.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard =
                conn.lock().map_err(|_| StoreError::Internal("store lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|err| StoreError::Internal(format!("store task join failed: {err}")))?
    }
}

// ============================================================================
// SECTION: Row Mapping Helpers
// ============================================================================

/// Maps a database error onto the store error kinds.
fn db_err(error: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, ref message) = error
        && failure.code == ErrorCode::ConstraintViolation
    {
        return StoreError::Conflict(
            message.clone().unwrap_or_else(|| "unique constraint violated".to_string()),
        );
    }
    StoreError::Internal(error.to_string())
}

/// Serializes an entity into its document column.
fn to_doc<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|err| StoreError::Internal(err.to_string()))
}

/// Deserializes an entity from its document column.
fn from_doc<T: DeserializeOwned>(doc: &str) -> Result<T, StoreError> {
    serde_json::from_str(doc).map_err(|err| StoreError::Internal(err.to_string()))
}

/// Converts a timestamp into the sortable millisecond column value.
fn ms(value: OffsetDateTime) -> i64 {
    i64::try_from(value.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// Builds a `?,?,...` placeholder list of the given arity.
fn placeholders(count: usize) -> String {
    let mut out = String::new();
    for index in 0 .. count {
        if index > 0 {
            out.push(',');
        }
        out.push('?');
    }
    out
}

/// SQL list literal of the active status labels.
fn active_status_list() -> String {
    DeviceDeploymentStatus::ACTIVE
        .iter()
        .map(|status| format!("'{status}'"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Persists an updated device-deployment row inside a transaction.
fn write_device_deployment(
    tx: &Transaction<'_>,
    tenant: &str,
    row: &DeviceDeployment,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE device_deployments SET status = ?1, doc = ?2 WHERE tenant = ?3 AND id = ?4",
        params![row.status.as_str(), to_doc(row)?, tenant, row.id.to_string()],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Persists an updated deployment row inside a transaction.
fn write_deployment(
    tx: &Transaction<'_>,
    tenant: &str,
    deployment: &Deployment,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE deployments SET finished_ms = ?1, doc = ?2 WHERE tenant = ?3 AND id = ?4",
        params![
            deployment.finished.map(ms),
            to_doc(deployment)?,
            tenant,
            deployment.id.to_string()
        ],
    )
    .map_err(db_err)?;
    Ok(())
}

/// Loads one device-deployment document inside a transaction.
fn load_device_deployment(
    tx: &Transaction<'_>,
    tenant: &str,
    id: DeviceDeploymentId,
) -> Result<Option<DeviceDeployment>, StoreError> {
    tx.query_row(
        "SELECT doc FROM device_deployments WHERE tenant = ?1 AND id = ?2",
        params![tenant, id.to_string()],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)?
    .map(|doc| from_doc(&doc))
    .transpose()
}

/// Loads one deployment document inside a transaction.
fn load_deployment(
    tx: &Transaction<'_>,
    tenant: &str,
    id: DeploymentId,
) -> Result<Option<Deployment>, StoreError> {
    tx.query_row(
        "SELECT doc FROM deployments WHERE tenant = ?1 AND id = ?2",
        params![tenant, id.to_string()],
        |row| row.get::<_, String>(0),
    )
    .optional()
    .map_err(db_err)?
    .map(|doc| from_doc(&doc))
    .transpose()
}

/// Applies one predicated transition inside a transaction.
///
/// Mirrors the reference semantics: the row update, the counter moves,
/// the phase dispatch count, and the deployment finish aggregation happen
/// together or not at all.
fn apply_transition_tx(
    tx: &Transaction<'_>,
    tenant: &str,
    request: &TransitionRequest,
) -> Result<Option<DeviceDeployment>, StoreError> {
    let Some(mut row) = load_device_deployment(tx, tenant, request.id)? else {
        return Err(StoreError::NotFound);
    };
    if !request.from.contains(&row.status) {
        return Ok(None);
    }
    let previous = row.status;
    row.status = request.to;
    if let Some(substate) = &request.substate {
        row.substate = Some(substate.clone());
    }
    if request.increment_retries {
        row.retries_used = row.retries_used.saturating_add(1);
    }
    row.finished = request.to.is_terminal().then_some(request.now);
    write_device_deployment(tx, tenant, &row)?;

    if let Some(mut deployment) = load_deployment(tx, tenant, row.deployment_id)? {
        deployment.stats.decrement(previous);
        deployment.stats.increment(request.to);
        if let Some(index) = request.phase_index
            && previous == DeviceDeploymentStatus::Pending
            && let Some(phase) = deployment.phases.get_mut(index)
        {
            phase.device_count = phase.device_count.saturating_add(1);
        }
        // A failure retry hands its phase slot back before the row
        // re-enters `pending`; the re-dispatch consumes the same slot.
        if request.increment_retries
            && let Some(phase) =
                deployment.phases.iter_mut().rev().find(|phase| phase.device_count > 0)
        {
            phase.device_count = phase.device_count.saturating_sub(1);
        }
        if request.to.is_terminal() && deployment.stats.active_total() == 0 {
            deployment.finished = Some(request.now);
        }
        write_deployment(tx, tenant, &deployment)?;
    }
    Ok(Some(row))
}

// ============================================================================
// SECTION: DataStore Implementation
// ============================================================================

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn insert_artifact(
        &self,
        scope: &RequestScope,
        artifact: &Artifact,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let artifact = artifact.clone();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "INSERT INTO artifacts (tenant, id, name, modified_ms, size, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant,
                    artifact.id.to_string(),
                    artifact.name,
                    ms(artifact.modified),
                    i64::try_from(artifact.size).unwrap_or(i64::MAX),
                    to_doc(&artifact)?
                ],
            )
            .map_err(db_err)?;
            for device_type in &artifact.device_types_compatible {
                tx.execute(
                    "INSERT INTO artifact_compat (tenant, name, device_type, artifact_id)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![tenant, artifact.name, device_type, artifact.id.to_string()],
                )
                .map_err(db_err)?;
            }
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<Option<Artifact>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT doc FROM artifacts WHERE tenant = ?1 AND id = ?2",
                params![tenant, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn artifact_by_name_and_device_type(
        &self,
        scope: &RequestScope,
        name: &str,
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let name = name.to_string();
        let device_type = device_type.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT a.doc FROM artifacts a
                 JOIN artifact_compat c
                   ON c.tenant = a.tenant AND c.artifact_id = a.id
                 WHERE a.tenant = ?1 AND c.name = ?2 AND c.device_type = ?3
                 LIMIT 1",
                params![tenant, name, device_type],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn artifact_by_ids_and_device_type(
        &self,
        scope: &RequestScope,
        ids: &[ArtifactId],
        device_type: &str,
    ) -> Result<Option<Artifact>, StoreError> {
        if ids.is_empty() {
            return Ok(None);
        }
        let tenant = scope.tenant.as_str().to_string();
        let device_type = device_type.to_string();
        let id_strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.run(move |conn| {
            let sql = format!(
                "SELECT a.doc FROM artifacts a
                 JOIN artifact_compat c
                   ON c.tenant = a.tenant AND c.artifact_id = a.id
                 WHERE a.tenant = ?1 AND c.device_type = ?2 AND a.id IN ({})
                 ORDER BY a.modified_ms DESC
                 LIMIT 1",
                placeholders(id_strings.len())
            );
            let mut statement = conn.prepare(&sql).map_err(db_err)?;
            let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&tenant, &device_type];
            for id in &id_strings {
                values.push(id);
            }
            statement
                .query_row(values.as_slice(), |row| row.get::<_, String>(0))
                .optional()
                .map_err(db_err)?
                .map(|doc| from_doc(&doc))
                .transpose()
        })
        .await
    }

    async fn update_artifact_description(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
        description: Option<String>,
    ) -> Result<bool, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let existing = tx
                .query_row(
                    "SELECT doc FROM artifacts WHERE tenant = ?1 AND id = ?2",
                    params![tenant, id.to_string()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(db_err)?;
            let Some(doc) = existing else {
                return Ok(false);
            };
            let mut artifact: Artifact = from_doc(&doc)?;
            artifact.description = description;
            tx.execute(
                "UPDATE artifacts SET doc = ?1 WHERE tenant = ?2 AND id = ?3",
                params![to_doc(&artifact)?, tenant, id.to_string()],
            )
            .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(true)
        })
        .await
    }

    async fn delete_artifact(
        &self,
        scope: &RequestScope,
        id: ArtifactId,
    ) -> Result<bool, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            tx.execute(
                "DELETE FROM artifact_compat WHERE tenant = ?1 AND artifact_id = ?2",
                params![tenant, id.to_string()],
            )
            .map_err(db_err)?;
            let deleted = tx
                .execute(
                    "DELETE FROM artifacts WHERE tenant = ?1 AND id = ?2",
                    params![tenant, id.to_string()],
                )
                .map_err(db_err)?;
            tx.commit().map_err(db_err)?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn list_artifacts(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
        sort: SortOrder,
    ) -> Result<(Vec<Artifact>, u64), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let name = filter.name.clone();
        self.run(move |conn| {
            let direction = match sort {
                SortOrder::Ascending => "ASC",
                SortOrder::Descending => "DESC",
            };
            let name_clause = if name.is_some() { "AND name = ?2" } else { "" };
            let total_sql =
                format!("SELECT COUNT(*) FROM artifacts WHERE tenant = ?1 {name_clause}");
            let rows_sql = format!(
                "SELECT doc FROM artifacts WHERE tenant = ?1 {name_clause}
                 ORDER BY modified_ms {direction}, id {direction}
                 LIMIT {} OFFSET {}",
                page.limit(),
                page.skip()
            );
            let (total, docs): (u64, Vec<String>) = match &name {
                Some(name) => {
                    let total = conn
                        .query_row(&total_sql, params![tenant, name], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&rows_sql).map_err(db_err)?;
                    let docs = statement
                        .query_map(params![tenant, name], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, docs)
                }
                None => {
                    let total = conn
                        .query_row(&total_sql, params![tenant], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&rows_sql).map_err(db_err)?;
                    let docs = statement
                        .query_map(params![tenant], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, docs)
                }
            };
            let artifacts =
                docs.iter().map(|doc| from_doc(doc)).collect::<Result<Vec<_>, _>>()?;
            Ok((artifacts, total))
        })
        .await
    }

    async fn list_releases(
        &self,
        scope: &RequestScope,
        filter: &ArtifactFilter,
        page: Pagination,
    ) -> Result<(Vec<Release>, u64), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let name = filter.name.clone();
        self.run(move |conn| {
            let name_clause = if name.is_some() { "AND name = ?2" } else { "" };
            let total_sql = format!(
                "SELECT COUNT(DISTINCT name) FROM artifacts WHERE tenant = ?1 {name_clause}"
            );
            let names_sql = format!(
                "SELECT name FROM artifacts WHERE tenant = ?1 {name_clause}
                 GROUP BY name
                 ORDER BY MAX(modified_ms) DESC
                 LIMIT {} OFFSET {}",
                page.limit(),
                page.skip()
            );
            let (total, names): (u64, Vec<String>) = match &name {
                Some(name) => {
                    let total = conn
                        .query_row(&total_sql, params![tenant, name], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&names_sql).map_err(db_err)?;
                    let names = statement
                        .query_map(params![tenant, name], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, names)
                }
                None => {
                    let total = conn
                        .query_row(&total_sql, params![tenant], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&names_sql).map_err(db_err)?;
                    let names = statement
                        .query_map(params![tenant], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, names)
                }
            };
            let mut releases = Vec::with_capacity(names.len());
            for release_name in names {
                let mut statement = conn
                    .prepare(
                        "SELECT doc FROM artifacts WHERE tenant = ?1 AND name = ?2
                         ORDER BY modified_ms DESC",
                    )
                    .map_err(db_err)?;
                let docs: Vec<String> = statement
                    .query_map(params![tenant, release_name], |row| row.get(0))
                    .map_err(db_err)?
                    .collect::<Result<_, _>>()
                    .map_err(db_err)?;
                let artifacts: Vec<Artifact> =
                    docs.iter().map(|doc| from_doc(doc)).collect::<Result<_, _>>()?;
                let modified =
                    artifacts.first().map_or(OffsetDateTime::UNIX_EPOCH, |a| a.modified);
                releases.push(Release {
                    name: release_name,
                    artifacts,
                    modified,
                });
            }
            Ok((releases, total))
        })
        .await
    }

    async fn storage_usage(&self, scope: &RequestScope) -> Result<u64, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let total: i64 = conn
                .query_row(
                    "SELECT COALESCE(SUM(size), 0) FROM artifacts WHERE tenant = ?1",
                    params![tenant],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(u64::try_from(total).unwrap_or(0))
        })
        .await
    }

    async fn insert_deployment(
        &self,
        scope: &RequestScope,
        deployment: &Deployment,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let deployment = deployment.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO deployments (tenant, id, name, created_ms, finished_ms, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    tenant,
                    deployment.id.to_string(),
                    deployment.name,
                    ms(deployment.created),
                    deployment.finished.map(ms),
                    to_doc(&deployment)?
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn deployment(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT doc FROM deployments WHERE tenant = ?1 AND id = ?2",
                params![tenant, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn deployments_by_ids(
        &self,
        scope: &RequestScope,
        ids: &[DeploymentId],
    ) -> Result<Vec<Deployment>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let tenant = scope.tenant.as_str().to_string();
        let id_strings: Vec<String> = ids.iter().map(ToString::to_string).collect();
        self.run(move |conn| {
            let sql = format!(
                "SELECT doc FROM deployments WHERE tenant = ?1 AND id IN ({})",
                placeholders(id_strings.len())
            );
            let mut statement = conn.prepare(&sql).map_err(db_err)?;
            let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![&tenant];
            for id in &id_strings {
                values.push(id);
            }
            let docs: Vec<String> = statement
                .query_map(values.as_slice(), |row| row.get(0))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?;
            docs.iter().map(|doc| from_doc(doc)).collect()
        })
        .await
    }

    async fn list_deployments(
        &self,
        scope: &RequestScope,
        filter: &DeploymentFilter,
        page: Pagination,
    ) -> Result<(Vec<Deployment>, u64), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let name = filter.name.clone();
        let unfinished_only = filter.unfinished_only;
        self.run(move |conn| {
            let mut clauses = String::new();
            if name.is_some() {
                clauses.push_str(" AND name LIKE ?2");
            }
            if unfinished_only {
                clauses.push_str(" AND finished_ms IS NULL");
            }
            let total_sql =
                format!("SELECT COUNT(*) FROM deployments WHERE tenant = ?1{clauses}");
            let rows_sql = format!(
                "SELECT doc FROM deployments WHERE tenant = ?1{clauses}
                 ORDER BY created_ms DESC, id DESC
                 LIMIT {} OFFSET {}",
                page.limit(),
                page.skip()
            );
            let (total, docs): (u64, Vec<String>) = match &name {
                Some(name) => {
                    let pattern = format!("%{name}%");
                    let total = conn
                        .query_row(&total_sql, params![tenant, pattern], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&rows_sql).map_err(db_err)?;
                    let docs = statement
                        .query_map(params![tenant, pattern], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, docs)
                }
                None => {
                    let total = conn
                        .query_row(&total_sql, params![tenant], |row| row.get::<_, i64>(0).map(|v| v as u64))
                        .map_err(db_err)?;
                    let mut statement = conn.prepare(&rows_sql).map_err(db_err)?;
                    let docs = statement
                        .query_map(params![tenant], |row| row.get(0))
                        .map_err(db_err)?
                        .collect::<Result<_, _>>()
                        .map_err(db_err)?;
                    (total, docs)
                }
            };
            let deployments =
                docs.iter().map(|doc| from_doc(doc)).collect::<Result<Vec<_>, _>>()?;
            Ok((deployments, total))
        })
        .await
    }

    async fn find_unfinished_by_id(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
    ) -> Result<Option<Deployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT doc FROM deployments
                 WHERE tenant = ?1 AND id = ?2 AND finished_ms IS NULL",
                params![tenant, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn exist_unfinished_by_artifact_id(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<bool, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let exists: i64 = conn
                .query_row(
                    "SELECT EXISTS(
                         SELECT 1 FROM device_deployments dd
                         JOIN deployments d
                           ON d.tenant = dd.tenant AND d.id = dd.deployment_id
                         WHERE dd.tenant = ?1 AND dd.artifact_id = ?2
                           AND d.finished_ms IS NULL
                     )",
                    params![tenant, artifact_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(db_err)?;
            Ok(exists != 0)
        })
        .await
    }

    async fn set_deployment_paused(
        &self,
        scope: &RequestScope,
        id: DeploymentId,
        paused: bool,
    ) -> Result<bool, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let Some(mut deployment) = load_deployment(&tx, &tenant, id)? else {
                return Ok(false);
            };
            if deployment.finished.is_some() {
                return Ok(false);
            }
            deployment.paused = paused;
            write_deployment(&tx, &tenant, &deployment)?;
            tx.commit().map_err(db_err)?;
            Ok(true)
        })
        .await
    }

    async fn insert_device_deployments(
        &self,
        scope: &RequestScope,
        rows: &[DeviceDeployment],
    ) -> Result<u64, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let rows = rows.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let mut inserted = 0u64;
            for row in &rows {
                let changed = tx
                    .execute(
                        "INSERT OR IGNORE INTO device_deployments
                         (tenant, id, deployment_id, device_id, artifact_id, status,
                          created_ms, doc)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            tenant,
                            row.id.to_string(),
                            row.deployment_id.to_string(),
                            row.device_id.as_str(),
                            row.artifact_id.map(|id| id.to_string()),
                            row.status.as_str(),
                            ms(row.created),
                            to_doc(row)?
                        ],
                    )
                    .map_err(db_err)?;
                inserted += changed as u64;
            }
            tx.commit().map_err(db_err)?;
            Ok(inserted)
        })
        .await
    }

    async fn device_deployment(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT doc FROM device_deployments WHERE tenant = ?1 AND id = ?2",
                params![tenant, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn device_deployments(
        &self,
        scope: &RequestScope,
        query: &DeviceDeploymentQuery,
    ) -> Result<Vec<DeviceDeployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let query = query.clone();
        self.run(move |conn| {
            let mut clauses = String::new();
            if query.deployment_id.is_some() {
                clauses.push_str(" AND dd.deployment_id = ?2");
            }
            if query.active_only {
                clauses.push_str(&format!(" AND dd.status IN ({})", active_status_list()));
            }
            if !query.include_finished {
                clauses.push_str(
                    " AND EXISTS(SELECT 1 FROM deployments d
                       WHERE d.tenant = dd.tenant AND d.id = dd.deployment_id
                         AND d.finished_ms IS NULL)",
                );
            }
            let limit = if query.limit == 0 { i64::MAX } else {
                i64::try_from(query.limit).unwrap_or(i64::MAX)
            };
            let sql = format!(
                "SELECT dd.doc FROM device_deployments dd
                 WHERE dd.tenant = ?1{clauses}
                 ORDER BY dd.created_ms ASC, dd.id ASC
                 LIMIT {limit} OFFSET {}",
                query.skip
            );
            let mut statement = conn.prepare(&sql).map_err(db_err)?;
            let docs: Vec<String> = match query.deployment_id {
                Some(deployment_id) => statement
                    .query_map(params![tenant, deployment_id.to_string()], |row| row.get(0))
                    .map_err(db_err)?
                    .collect::<Result<_, _>>()
                    .map_err(db_err)?,
                None => statement
                    .query_map(params![tenant], |row| row.get(0))
                    .map_err(db_err)?
                    .collect::<Result<_, _>>()
                    .map_err(db_err)?,
            };
            docs.iter().map(|doc| from_doc(doc)).collect()
        })
        .await
    }

    async fn find_oldest_active(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let device = device_id.as_str().to_string();
        self.run(move |conn| {
            let sql = format!(
                "SELECT doc FROM device_deployments
                 WHERE tenant = ?1 AND device_id = ?2 AND status IN ({})
                 ORDER BY created_ms ASC, id ASC
                 LIMIT 1",
                active_status_list()
            );
            conn.query_row(&sql, params![tenant, device], |row| row.get::<_, String>(0))
                .optional()
                .map_err(db_err)?
                .map(|doc| from_doc(&doc))
                .transpose()
        })
        .await
    }

    async fn transition_device_deployment(
        &self,
        scope: &RequestScope,
        request: &TransitionRequest,
    ) -> Result<Option<DeviceDeployment>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let request = request.clone();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let outcome = apply_transition_tx(&tx, &tenant, &request)?;
            tx.commit().map_err(db_err)?;
            Ok(outcome)
        })
        .await
    }

    async fn increment_deliveries(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let Some(mut row) = load_device_deployment(&tx, &tenant, id)? else {
                return Err(StoreError::NotFound);
            };
            row.deliveries = row.deliveries.saturating_add(1);
            write_device_deployment(&tx, &tenant, &row)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn abort_device_deployments(
        &self,
        scope: &RequestScope,
        deployment_id: DeploymentId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            if let Some(mut deployment) = load_deployment(&tx, &tenant, deployment_id)? {
                deployment.aborted = true;
                deployment.paused = false;
                write_deployment(&tx, &tenant, &deployment)?;
            }
            let sql = format!(
                "SELECT id FROM device_deployments
                 WHERE tenant = ?1 AND deployment_id = ?2 AND status IN ({})",
                active_status_list()
            );
            let ids: Vec<String> = {
                let mut statement = tx.prepare(&sql).map_err(db_err)?;
                let ids = statement
                    .query_map(params![tenant, deployment_id.to_string()], |row| row.get(0))
                    .map_err(db_err)?
                    .collect::<Result<_, _>>()
                    .map_err(db_err)?;
                ids
            };
            let mut aborted = 0u64;
            for id in ids {
                let Some(id) = DeviceDeploymentId::parse(&id) else {
                    continue;
                };
                let request = TransitionRequest {
                    id,
                    from: DeviceDeploymentStatus::ACTIVE.to_vec(),
                    to: DeviceDeploymentStatus::Aborted,
                    substate: None,
                    now,
                    phase_index: None,
                    increment_retries: false,
                };
                if apply_transition_tx(&tx, &tenant, &request)?.is_some() {
                    aborted += 1;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(aborted)
        })
        .await
    }

    async fn decommission_device(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
        now: OffsetDateTime,
    ) -> Result<u64, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let device = device_id.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let sql = format!(
                "SELECT id FROM device_deployments
                 WHERE tenant = ?1 AND device_id = ?2 AND status IN ({})",
                active_status_list()
            );
            let ids: Vec<String> = {
                let mut statement = tx.prepare(&sql).map_err(db_err)?;
                let ids = statement
                    .query_map(params![tenant, device], |row| row.get(0))
                    .map_err(db_err)?
                    .collect::<Result<_, _>>()
                    .map_err(db_err)?;
                ids
            };
            let mut affected = 0u64;
            for id in ids {
                let Some(id) = DeviceDeploymentId::parse(&id) else {
                    continue;
                };
                let request = TransitionRequest {
                    id,
                    from: DeviceDeploymentStatus::ACTIVE.to_vec(),
                    to: DeviceDeploymentStatus::Decommissioned,
                    substate: None,
                    now,
                    phase_index: None,
                    increment_retries: false,
                };
                if apply_transition_tx(&tx, &tenant, &request)?.is_some() {
                    affected += 1;
                }
            }
            tx.commit().map_err(db_err)?;
            Ok(affected)
        })
        .await
    }

    async fn set_log_available(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            let tx = conn.transaction().map_err(db_err)?;
            let Some(mut row) = load_device_deployment(&tx, &tenant, id)? else {
                return Err(StoreError::NotFound);
            };
            row.is_log_available = true;
            write_device_deployment(&tx, &tenant, &row)?;
            tx.commit().map_err(db_err)
        })
        .await
    }

    async fn save_log(
        &self,
        scope: &RequestScope,
        log: &DeviceDeploymentLog,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let log = log.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO device_deployment_logs (tenant, device_deployment_id, doc)
                 VALUES (?1, ?2, ?3)",
                params![tenant, log.device_deployment_id.to_string(), to_doc(&log)?],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn log(
        &self,
        scope: &RequestScope,
        id: DeviceDeploymentId,
    ) -> Result<Option<DeviceDeploymentLog>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT doc FROM device_deployment_logs
                 WHERE tenant = ?1 AND device_deployment_id = ?2",
                params![tenant, id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(db_err)?
            .map(|doc| from_doc(&doc))
            .transpose()
        })
        .await
    }

    async fn limit(
        &self,
        scope: &RequestScope,
        name: &str,
    ) -> Result<Option<Limit>, StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let name = name.to_string();
        self.run(move |conn| {
            conn.query_row(
                "SELECT name, value FROM tenant_limits WHERE tenant = ?1 AND name = ?2",
                params![tenant, name],
                |row| {
                    Ok(Limit {
                        name: row.get(0)?,
                        value: row.get::<_, i64>(1).map(|v| u64::try_from(v).unwrap_or(0))?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
        })
        .await
    }

    async fn upsert_limit(&self, scope: &RequestScope, limit: &Limit) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let limit = limit.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO tenant_limits (tenant, name, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (tenant, name) DO UPDATE SET value = excluded.value",
                params![tenant, limit.name, i64::try_from(limit.value).unwrap_or(i64::MAX)],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn insert_upload_intent(
        &self,
        scope: &RequestScope,
        intent: &UploadIntent,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        let intent = intent.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO upload_intents (tenant, artifact_id, expire_ms, doc)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    tenant,
                    intent.artifact_id.to_string(),
                    ms(intent.expire),
                    to_doc(&intent)?
                ],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn expired_upload_intents(
        &self,
        before: OffsetDateTime,
        limit: u64,
    ) -> Result<Vec<UploadIntent>, StoreError> {
        self.run(move |conn| {
            let limit = if limit == 0 { i64::MAX } else { i64::try_from(limit).unwrap_or(i64::MAX) };
            let mut statement = conn
                .prepare(
                    "SELECT doc FROM upload_intents WHERE expire_ms < ?1
                     ORDER BY expire_ms ASC LIMIT ?2",
                )
                .map_err(db_err)?;
            let docs: Vec<String> = statement
                .query_map(params![ms(before), limit], |row| row.get(0))
                .map_err(db_err)?
                .collect::<Result<_, _>>()
                .map_err(db_err)?;
            docs.iter().map(|doc| from_doc(doc)).collect()
        })
        .await
    }

    async fn delete_upload_intent(
        &self,
        scope: &RequestScope,
        artifact_id: ArtifactId,
    ) -> Result<(), StoreError> {
        let tenant = scope.tenant.as_str().to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM upload_intents WHERE tenant = ?1 AND artifact_id = ?2",
                params![tenant, artifact_id.to_string()],
            )
            .map_err(db_err)?;
            Ok(())
        })
        .await
    }

    async fn migrate(&self, _scope: &RequestScope) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.execute_batch(SCHEMA_COMPAT).map_err(db_err)?;
            conn.execute_batch(SCHEMA).map_err(db_err)
        })
        .await
    }

    async fn readiness(&self) -> Result<(), StoreError> {
        self.run(move |conn| {
            conn.query_row("SELECT 1", [], |_row| Ok(())).map_err(db_err)
        })
        .await
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::SqliteDataStore;
    use super::placeholders;

    #[test]
    fn placeholder_lists_are_comma_separated() {
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }

    #[tokio::test]
    async fn open_in_memory_applies_schema() {
        let store = SqliteDataStore::open_in_memory().expect("open");
        fleetup_core::DataStore::readiness(&store).await.expect("readiness");
    }
}
