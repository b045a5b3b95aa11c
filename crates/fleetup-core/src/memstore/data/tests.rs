// crates/fleetup-core/src/memstore/data/tests.rs
// ============================================================================
// Module: In-Memory Metadata Store Tests
// Description: Contract tests for indexes, transitions, and counters.
// Purpose: Pin the reference semantics every backend must match.
// Dependencies: crate::memstore, tokio
// ============================================================================

use time::OffsetDateTime;

use super::InMemoryDataStore;
use crate::model::artifact::Artifact;
use crate::model::artifact::ArtifactInfo;
use crate::model::deployment::Deployment;
use crate::model::deployment::DeploymentStats;
use crate::model::deployment::DeploymentType;
use crate::model::deployment::DeviceSelector;
use crate::model::deployment::Phase;
use crate::model::device::DeviceDeployment;
use crate::model::device::DeviceDeploymentLog;
use crate::model::device::DeviceDeploymentStatus;
use crate::model::identifiers::ArtifactId;
use crate::model::identifiers::DeploymentId;
use crate::model::identifiers::DeviceId;
use crate::model::identifiers::RequestId;
use crate::model::identifiers::TenantId;
use crate::model::upload::UploadIntent;
use crate::ports::data_store::ArtifactFilter;
use crate::ports::data_store::DataStore;
use crate::ports::data_store::DeviceDeploymentQuery;
use crate::ports::data_store::Pagination;
use crate::ports::data_store::SortOrder;
use crate::ports::data_store::StoreError;
use crate::ports::data_store::TransitionRequest;
use crate::scope::RequestScope;

fn scope() -> RequestScope {
    RequestScope::new(TenantId::default_tenant(), RequestId::new("test"))
}

fn ts(unix: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(unix).expect("timestamp")
}

fn artifact(name: &str, types: &[&str], modified_unix: i64) -> Artifact {
    Artifact {
        id: ArtifactId::random(),
        name: name.to_string(),
        description: None,
        device_types_compatible: types.iter().map(ToString::to_string).collect(),
        updates: Vec::new(),
        signed: false,
        info: ArtifactInfo {
            format: "fleetup-artifact".to_string(),
            version: 1,
        },
        size: 2048,
        modified: ts(modified_unix),
    }
}

fn deployment(artifact_name: &str, device_count: u32, created_unix: i64) -> Deployment {
    Deployment {
        id: DeploymentId::random(),
        name: "test deployment".to_string(),
        artifact_name: artifact_name.to_string(),
        artifacts: Vec::new(),
        selector: DeviceSelector::Devices(vec![DeviceId::new("d1")]),
        created: ts(created_unix),
        finished: None,
        device_count,
        max_devices: 0,
        retries: 0,
        force_installation: false,
        phases: Vec::new(),
        stats: DeploymentStats {
            pending: device_count,
            ..DeploymentStats::default()
        },
        paused: false,
        aborted: false,
        deployment_type: DeploymentType::Regular,
        update_control_map: None,
    }
}

fn pending_row(
    deployment_id: crate::model::identifiers::DeploymentId,
    device: &str,
    created_unix: i64,
) -> DeviceDeployment {
    DeviceDeployment::pending(
        deployment_id,
        DeviceId::new(device),
        ArtifactId::random(),
        Some("qemu".to_string()),
        Some(2048),
        ts(created_unix),
    )
}

#[tokio::test]
async fn artifact_uniqueness_rejects_device_type_overlap() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    store.insert_artifact(&scope, &artifact("release-1", &["qemu", "rpi3"], 1)).await.expect("a1");
    let err = store
        .insert_artifact(&scope, &artifact("release-1", &["rpi3"], 2))
        .await
        .expect_err("overlap");
    assert!(matches!(err, StoreError::Conflict(_)));
    store
        .insert_artifact(&scope, &artifact("release-1", &["beagle"], 3))
        .await
        .expect("disjoint type set is accepted");
    store
        .insert_artifact(&scope, &artifact("release-2", &["qemu"], 4))
        .await
        .expect("different name is accepted");
}

#[tokio::test]
async fn newest_artifact_wins_for_id_set_lookup() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let older = artifact("release-1", &["qemu"], 100);
    let newer = artifact("release-1", &["rpi3"], 200);
    store.insert_artifact(&scope, &older).await.expect("older");
    store.insert_artifact(&scope, &newer).await.expect("newer");
    let both = vec![older.id, newer.id];
    let found = store
        .artifact_by_ids_and_device_type(&scope, &both, "rpi3")
        .await
        .expect("query")
        .expect("match");
    assert_eq!(found.id, newer.id);
}

#[tokio::test]
async fn artifacts_are_tenant_isolated() {
    let store = InMemoryDataStore::new();
    let alpha = RequestScope::new(TenantId::new("alpha"), RequestId::new("t"));
    let beta = RequestScope::new(TenantId::new("beta"), RequestId::new("t"));
    store.insert_artifact(&alpha, &artifact("release-1", &["qemu"], 1)).await.expect("insert");
    let (rows, total) = store
        .list_artifacts(&beta, &ArtifactFilter::default(), Pagination::default(), SortOrder::Descending)
        .await
        .expect("list");
    assert!(rows.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn transition_updates_counters_and_finishes_deployment() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 1, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let row = pending_row(deployment.id, "d1", 11);
    store.insert_device_deployments(&scope, &[row.clone()]).await.expect("rows");

    let dispatched = store
        .transition_device_deployment(
            &scope,
            &TransitionRequest::new(
                row.id,
                DeviceDeploymentStatus::Pending,
                DeviceDeploymentStatus::Downloading,
                ts(20),
            ),
        )
        .await
        .expect("transition")
        .expect("predicate matched");
    assert_eq!(dispatched.status, DeviceDeploymentStatus::Downloading);

    let mid = store.deployment(&scope, deployment.id).await.expect("get").expect("row");
    assert_eq!(mid.stats.pending, 0);
    assert_eq!(mid.stats.downloading, 1);
    assert!(mid.finished.is_none());

    store
        .transition_device_deployment(
            &scope,
            &TransitionRequest::new(
                row.id,
                DeviceDeploymentStatus::Downloading,
                DeviceDeploymentStatus::Success,
                ts(30),
            ),
        )
        .await
        .expect("transition")
        .expect("predicate matched");

    let done = store.deployment(&scope, deployment.id).await.expect("get").expect("row");
    assert_eq!(done.stats.success, 1);
    assert_eq!(done.stats.active_total(), 0);
    assert_eq!(done.finished, Some(ts(30)));
    let finished_row =
        store.device_deployment(&scope, row.id).await.expect("get").expect("row");
    assert_eq!(finished_row.finished, Some(ts(30)));
}

#[tokio::test]
async fn failed_predicate_leaves_state_untouched() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 1, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let row = pending_row(deployment.id, "d1", 11);
    store.insert_device_deployments(&scope, &[row.clone()]).await.expect("rows");

    let outcome = store
        .transition_device_deployment(
            &scope,
            &TransitionRequest::new(
                row.id,
                DeviceDeploymentStatus::Downloading,
                DeviceDeploymentStatus::Installing,
                ts(20),
            ),
        )
        .await
        .expect("transition call");
    assert!(outcome.is_none());
    let unchanged = store.device_deployment(&scope, row.id).await.expect("get").expect("row");
    assert_eq!(unchanged.status, DeviceDeploymentStatus::Pending);
    let stats = store.deployment(&scope, deployment.id).await.expect("get").expect("row").stats;
    assert_eq!(stats.pending, 1);
}

#[tokio::test]
async fn duplicate_device_pairs_are_skipped_on_insert() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 2, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let first = pending_row(deployment.id, "d1", 11);
    let duplicate = pending_row(deployment.id, "d1", 12);
    let other = pending_row(deployment.id, "d2", 13);
    let inserted = store
        .insert_device_deployments(&scope, &[first, duplicate, other])
        .await
        .expect("insert");
    assert_eq!(inserted, 2);
}

#[tokio::test]
async fn abort_terminates_all_active_children() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 2, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let first = pending_row(deployment.id, "d1", 11);
    let second = pending_row(deployment.id, "d2", 12);
    store
        .insert_device_deployments(&scope, &[first.clone(), second.clone()])
        .await
        .expect("rows");
    store
        .transition_device_deployment(
            &scope,
            &TransitionRequest::new(
                first.id,
                DeviceDeploymentStatus::Pending,
                DeviceDeploymentStatus::Downloading,
                ts(20),
            ),
        )
        .await
        .expect("dispatch")
        .expect("matched");

    let aborted = store.abort_device_deployments(&scope, deployment.id, ts(30)).await.expect("abort");
    assert_eq!(aborted, 2);
    let after = store.deployment(&scope, deployment.id).await.expect("get").expect("row");
    assert!(after.aborted);
    assert_eq!(after.stats.aborted, 2);
    assert_eq!(after.finished, Some(ts(30)));

    // Abort is monotone: a late device callback cannot resurrect the row.
    let late = store
        .transition_device_deployment(
            &scope,
            &TransitionRequest::new(
                first.id,
                DeviceDeploymentStatus::Downloading,
                DeviceDeploymentStatus::Success,
                ts(40),
            ),
        )
        .await
        .expect("call");
    assert!(late.is_none());
}

#[tokio::test]
async fn oldest_active_row_is_dispatched_first() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let older = deployment("release-1", 1, 10);
    let newer = deployment("release-2", 1, 20);
    store.insert_deployment(&scope, &older).await.expect("older");
    store.insert_deployment(&scope, &newer).await.expect("newer");
    let older_row = pending_row(older.id, "d1", 11);
    let newer_row = pending_row(newer.id, "d1", 21);
    store
        .insert_device_deployments(&scope, &[newer_row, older_row.clone()])
        .await
        .expect("rows");
    let found = store
        .find_oldest_active(&scope, &DeviceId::new("d1"))
        .await
        .expect("query")
        .expect("row");
    assert_eq!(found.id, older_row.id);
}

#[tokio::test]
async fn device_deployment_walk_is_ordered_and_paged() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 3, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let rows = vec![
        pending_row(deployment.id, "d3", 13),
        pending_row(deployment.id, "d1", 11),
        pending_row(deployment.id, "d2", 12),
    ];
    store.insert_device_deployments(&scope, &rows).await.expect("rows");
    let walked = store
        .device_deployments(
            &scope,
            &DeviceDeploymentQuery {
                skip: 1,
                limit: 1,
                deployment_id: Some(deployment.id),
                active_only: false,
                include_finished: true,
            },
        )
        .await
        .expect("walk");
    assert_eq!(walked.len(), 1);
    assert_eq!(walked[0].device_id, DeviceId::new("d2"));
}

#[tokio::test]
async fn retry_transition_returns_phase_slot() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let mut phased = deployment("release-1", 1, 10);
    phased.retries = 1;
    phased.phases = vec![Phase {
        start_ts: ts(5),
        max_devices: Some(1),
        device_count: 0,
    }];
    store.insert_deployment(&scope, &phased).await.expect("deployment");
    let row = pending_row(phased.id, "d1", 11);
    store.insert_device_deployments(&scope, &[row.clone()]).await.expect("rows");

    let dispatch = TransitionRequest {
        id: row.id,
        from: vec![DeviceDeploymentStatus::Pending],
        to: DeviceDeploymentStatus::Downloading,
        substate: None,
        now: ts(20),
        phase_index: Some(0),
        increment_retries: false,
    };
    store
        .transition_device_deployment(&scope, &dispatch)
        .await
        .expect("call")
        .expect("matched");
    let mid = store.deployment(&scope, phased.id).await.expect("get").expect("row");
    assert_eq!(mid.phases[0].device_count, 1);

    // Failure with a retry left: the slot goes back with the row.
    let retry = TransitionRequest {
        id: row.id,
        from: vec![DeviceDeploymentStatus::Downloading],
        to: DeviceDeploymentStatus::Pending,
        substate: None,
        now: ts(30),
        phase_index: None,
        increment_retries: true,
    };
    let retried = store
        .transition_device_deployment(&scope, &retry)
        .await
        .expect("call")
        .expect("matched");
    assert_eq!(retried.retries_used, 1);
    let after = store.deployment(&scope, phased.id).await.expect("get").expect("row");
    assert_eq!(after.phases[0].device_count, 0);
    assert_eq!(after.stats.pending, 1);

    // The re-dispatch consumes the same slot again, not a second one.
    store
        .transition_device_deployment(&scope, &dispatch)
        .await
        .expect("call")
        .expect("matched");
    let redispatched = store.deployment(&scope, phased.id).await.expect("get").expect("row");
    assert_eq!(redispatched.phases[0].device_count, 1);
}

#[tokio::test]
async fn log_upload_is_one_shot() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let deployment = deployment("release-1", 1, 10);
    store.insert_deployment(&scope, &deployment).await.expect("deployment");
    let row = pending_row(deployment.id, "d1", 11);
    store.insert_device_deployments(&scope, &[row.clone()]).await.expect("rows");
    let log = DeviceDeploymentLog {
        device_deployment_id: row.id,
        messages: Vec::new(),
    };
    store.save_log(&scope, &log).await.expect("first upload");
    let err = store.save_log(&scope, &log).await.expect_err("second upload");
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
async fn expired_intents_are_reported_oldest_first() {
    let store = InMemoryDataStore::new();
    let scope = scope();
    let fresh = UploadIntent {
        artifact_id: ArtifactId::random(),
        tenant: scope.tenant.clone(),
        expire: ts(1_000),
    };
    let stale = UploadIntent {
        artifact_id: ArtifactId::random(),
        tenant: scope.tenant.clone(),
        expire: ts(100),
    };
    store.insert_upload_intent(&scope, &fresh).await.expect("fresh");
    store.insert_upload_intent(&scope, &stale).await.expect("stale");
    let expired = store.expired_upload_intents(ts(500), 10).await.expect("scan");
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].artifact_id, stale.artifact_id);
    store.delete_upload_intent(&scope, stale.artifact_id).await.expect("delete");
    let expired = store.expired_upload_intents(ts(500), 10).await.expect("rescan");
    assert!(expired.is_empty());
}
