// crates/fleetup-server/src/jobs.rs
// ============================================================================
// Module: Background Jobs
// Description: Expired-upload garbage collection and reporting propagation.
// Purpose: Run the periodic maintenance loops with graceful shutdown.
// Dependencies: fleetup-core, rand, tokio, tracing
// ============================================================================

//! ## Overview
//! Two maintenance jobs exist. The storage daemon periodically reaps
//! blobs whose upload intent expired without a matching artifact row;
//! partial failures are retried on the next cycle and re-runs are safe.
//! Reporting propagation walks device-deployments and re-triggers the
//! reporting reindex workflow in batches. Both jobs log and continue on
//! non-fatal errors and finish their in-flight iteration on shutdown.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::info;
use tracing::warn;

use fleetup_core::DataStore;
use fleetup_core::DeviceDeploymentQuery;
use fleetup_core::ObjectKey;
use fleetup_core::ObjectStore;
use fleetup_core::ReindexDeploymentJob;
use fleetup_core::RequestScope;
use fleetup_core::TenantId;
use fleetup_core::WorkflowsClient;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Expired intents processed per GC cycle.
const GC_BATCH: u64 = 256;
/// Device-deployments walked per propagation page.
const PROPAGATE_PAGE: u64 = 100;
/// Device-deployments per reindex batch call.
const REINDEX_BATCH: usize = 50;

// ============================================================================
// SECTION: Storage Daemon
// ============================================================================

/// Runs the expiry GC loop until the shutdown signal flips.
pub async fn storage_daemon(
    store: &dyn DataStore,
    objects: &dyn ObjectStore,
    interval: Duration,
    jitter: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reaped = reap_expired_uploads(store, objects, jitter).await;
                if reaped > 0 {
                    info!(reaped, "expired upload intents reaped");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("storage daemon stopping");
                    return;
                }
            }
        }
    }
}

/// One GC pass: delete blobs of intents that expired before `now - jitter`.
///
/// Returns the number of intents removed. Safe to re-run; failures leave
/// the intent in place for the next cycle.
pub async fn reap_expired_uploads(
    store: &dyn DataStore,
    objects: &dyn ObjectStore,
    jitter: Duration,
) -> u64 {
    let cutoff = OffsetDateTime::now_utc() - jitter;
    let expired = match store.expired_upload_intents(cutoff, GC_BATCH).await {
        Ok(expired) => expired,
        Err(error) => {
            warn!(error = %error, "expired intent scan failed");
            return 0;
        }
    };
    let mut reaped = 0u64;
    for intent in expired {
        let scope = RequestScope::background(intent.tenant.clone());
        let key = ObjectKey::for_artifact(&intent.tenant, intent.artifact_id);
        if let Err(error) = objects.delete(&scope, &key).await {
            warn!(key = key.as_str(), error = %error, "orphan blob delete failed");
            continue;
        }
        if let Err(error) = store.delete_upload_intent(&scope, intent.artifact_id).await {
            warn!(error = %error, "upload intent delete failed");
            continue;
        }
        reaped += 1;
    }
    reaped
}

// ============================================================================
// SECTION: Reporting Propagation
// ============================================================================

/// Walks device-deployments and re-triggers the reporting reindex.
///
/// With `dry_run` the walk only counts what would be sent. `rate_limit`
/// bounds batch calls per second (0 means unthrottled). Returns the
/// number of device-deployments propagated.
///
/// # Errors
///
/// Returns the first fatal store error; workflow failures are logged and
/// skipped.
pub async fn propagate_reporting(
    store: &dyn DataStore,
    workflows: &dyn WorkflowsClient,
    tenant: TenantId,
    rate_limit: u32,
    dry_run: bool,
) -> Result<u64, fleetup_core::StoreError> {
    let scope = RequestScope::background(tenant);
    let mut skip = 0u64;
    let mut propagated = 0u64;
    loop {
        let query = DeviceDeploymentQuery {
            skip,
            limit: PROPAGATE_PAGE,
            deployment_id: None,
            active_only: false,
            include_finished: true,
        };
        let page = store.device_deployments(&scope, &query).await?;
        if page.is_empty() {
            break;
        }
        skip += page.len() as u64;
        for chunk in page.chunks(REINDEX_BATCH) {
            let jobs: Vec<ReindexDeploymentJob> = chunk
                .iter()
                .map(|row| ReindexDeploymentJob {
                    device_id: row.device_id.clone(),
                    deployment_id: row.deployment_id,
                    id: row.id,
                })
                .collect();
            if dry_run {
                propagated += jobs.len() as u64;
                continue;
            }
            match workflows.start_reindex_reporting_deployment_batch(&scope, &jobs).await {
                Ok(()) => propagated += jobs.len() as u64,
                Err(error) => {
                    warn!(error = %error, "reindex batch failed");
                }
            }
            if rate_limit > 0 {
                tokio::time::sleep(Duration::from_secs(1) / rate_limit).await;
            }
        }
    }
    info!(propagated, dry_run, "reporting propagation finished");
    Ok(propagated)
}

// ============================================================================
// SECTION: Jitter
// ============================================================================

/// Random startup delay so replicated daemons do not tick in lockstep.
#[must_use]
pub fn startup_jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    let millis = rand::thread_rng().gen_range(0 .. max.as_millis().max(1));
    Duration::from_millis(u64::try_from(millis).unwrap_or(0))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::OffsetDateTime;

    use super::reap_expired_uploads;
    use super::startup_jitter;
    use fleetup_core::ArtifactId;
    use fleetup_core::DataStore;
    use fleetup_core::InMemoryDataStore;
    use fleetup_core::InMemoryObjectStore;
    use fleetup_core::ObjectKey;
    use fleetup_core::ObjectStore;
    use fleetup_core::RequestId;
    use fleetup_core::RequestScope;
    use fleetup_core::TenantId;
    use fleetup_core::UploadIntent;

    #[tokio::test]
    async fn expired_intents_lose_their_blob() {
        let store = InMemoryDataStore::new();
        let objects = InMemoryObjectStore::new();
        let scope = RequestScope::new(TenantId::default_tenant(), RequestId::new("gc"));
        let stale = UploadIntent {
            artifact_id: ArtifactId::random(),
            tenant: scope.tenant.clone(),
            expire: OffsetDateTime::now_utc() - Duration::from_secs(3_600),
        };
        let fresh = UploadIntent {
            artifact_id: ArtifactId::random(),
            tenant: scope.tenant.clone(),
            expire: OffsetDateTime::now_utc() + Duration::from_secs(3_600),
        };
        store.insert_upload_intent(&scope, &stale).await.expect("stale");
        store.insert_upload_intent(&scope, &fresh).await.expect("fresh");
        for intent in [&stale, &fresh] {
            let key = ObjectKey::for_artifact(&scope.tenant, intent.artifact_id);
            objects
                .put(&scope, &key, Box::new(std::io::Cursor::new(vec![0u8; 16])))
                .await
                .expect("blob");
        }

        let reaped = reap_expired_uploads(&store, &objects, Duration::from_secs(60)).await;
        assert_eq!(reaped, 1);
        assert_eq!(objects.len(), 1);
        let remaining = store
            .expired_upload_intents(
                OffsetDateTime::now_utc() + Duration::from_secs(7_200),
                10,
            )
            .await
            .expect("scan");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].artifact_id, fresh.artifact_id);

        // A second pass is a no-op.
        let reaped = reap_expired_uploads(&store, &objects, Duration::from_secs(60)).await;
        assert_eq!(reaped, 0);
    }

    #[test]
    fn startup_jitter_is_bounded() {
        assert_eq!(startup_jitter(Duration::ZERO), Duration::ZERO);
        let sample = startup_jitter(Duration::from_secs(5));
        assert!(sample <= Duration::from_secs(5));
    }
}
