// crates/fleetup-clients/src/reporting.rs
// ============================================================================
// Module: Reporting HTTP Client
// Description: Device search against the reporting service.
// Purpose: Implement the ReportingClient port mirroring inventory search.
// Dependencies: fleetup-core, reqwest, tracing
// ============================================================================

//! ## Overview
//! Reporting mirrors the inventory search contract over its own indexed
//! store. When a reporting address is configured the planner prefers it for
//! selector expansion and falls back to inventory otherwise; this client
//! only differs from the inventory one in its endpoint family.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use tracing::debug;

use fleetup_core::DeviceListItem;
use fleetup_core::DeviceSearch;
use fleetup_core::InventoryError;
use fleetup_core::ReportingClient;
use fleetup_core::RequestScope;

use crate::ClientConfig;
use crate::REQUEST_ID_HEADER;
use crate::inventory::WireDevice;
use crate::inventory::total_count;
use crate::tenant_segment;

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP implementation of the reporting port.
pub struct ReportingHttpClient {
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Service base URL.
    config: ClientConfig,
}

impl ReportingHttpClient {
    /// Builds a reporting client.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            client,
            config,
        }
    }
}

#[async_trait]
impl ReportingClient for ReportingHttpClient {
    async fn search(
        &self,
        scope: &RequestScope,
        search: &DeviceSearch,
    ) -> Result<(Vec<DeviceListItem>, u64), InventoryError> {
        let url = self.config.endpoint(&format!(
            "/api/internal/v1/reporting/tenants/{}/devices/search",
            tenant_segment(&scope.tenant)
        ));
        let response = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, scope.request_id.as_str())
            .timeout(scope.call_deadline())
            .json(search)
            .send()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(InventoryError::Unavailable(format!(
                "reporting search returned {}",
                response.status()
            )));
        }
        let total = total_count(&response, 0);
        let devices: Vec<WireDevice> = response
            .json()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;
        let total = if total == 0 { devices.len() as u64 } else { total };
        debug!(
            request_id = scope.request_id.as_str(),
            devices = devices.len(),
            total,
            "reporting search page"
        );
        Ok((devices.into_iter().map(WireDevice::into_item).collect(), total))
    }

    async fn check_health(&self) -> Result<(), InventoryError> {
        let url = self.config.endpoint("/api/internal/v1/reporting/health");
        let response = self
            .client
            .get(&url)
            .timeout(fleetup_core::scope::DEFAULT_CALL_DEADLINE)
            .send()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(InventoryError::Unavailable(format!(
                "reporting health returned {}",
                response.status()
            )))
        }
    }
}
