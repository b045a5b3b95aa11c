// crates/fleetup-clients/src/inventory.rs
// ============================================================================
// Module: Inventory HTTP Client
// Description: Device attribute lookup and search against the inventory service.
// Purpose: Implement the InventoryClient port over the internal REST API.
// Dependencies: fleetup-core, reqwest, serde_json, tracing
// ============================================================================

//! ## Overview
//! Device types live in the inventory service as the `device_type`
//! attribute. Lookups batch at most fifty ids per search call; selector
//! expansion reuses the same search endpoint with group or filter
//! predicates. The total match count rides in the `X-Total-Count` header.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use fleetup_core::DeviceId;
use fleetup_core::DeviceListItem;
use fleetup_core::DeviceSearch;
use fleetup_core::InventoryClient;
use fleetup_core::InventoryError;
use fleetup_core::RequestScope;
use fleetup_core::ports::clients::DEVICE_TYPE_BATCH;

use crate::ClientConfig;
use crate::REQUEST_ID_HEADER;
use crate::tenant_segment;

// ============================================================================
// SECTION: Wire Types
// ============================================================================

/// One inventory attribute on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireAttribute {
    /// Attribute name.
    pub name: String,
    /// Attribute value; strings for everything this service reads.
    pub value: serde_json::Value,
    /// Attribute scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// One device row on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WireDevice {
    /// Device identifier.
    pub id: String,
    /// Attribute list.
    #[serde(default)]
    pub attributes: Vec<WireAttribute>,
}

impl WireDevice {
    /// Extracts the `device_type` attribute when present.
    pub(crate) fn device_type(&self) -> Option<String> {
        self.attributes.iter().find_map(|attribute| {
            (attribute.name == "device_type")
                .then(|| attribute.value.as_str().map(ToString::to_string))
                .flatten()
        })
    }

    /// Converts the wire row into a port list item.
    pub(crate) fn into_item(self) -> DeviceListItem {
        let device_type = self.device_type();
        DeviceListItem {
            id: DeviceId::new(self.id),
            device_type,
        }
    }
}

/// Reads the total match count from the response headers.
pub(crate) fn total_count(response: &reqwest::Response, fallback: usize) -> u64 {
    response
        .headers()
        .get("X-Total-Count")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
        .unwrap_or(fallback as u64)
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP implementation of the inventory port.
pub struct InventoryHttpClient {
    /// Shared HTTP client.
    client: reqwest::Client,
    /// Service base URL.
    config: ClientConfig,
}

impl InventoryHttpClient {
    /// Builds an inventory client.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: ClientConfig) -> Self {
        Self {
            client,
            config,
        }
    }

    /// Runs one search call against the inventory internal API.
    async fn search_page(
        &self,
        scope: &RequestScope,
        search: &DeviceSearch,
    ) -> Result<(Vec<WireDevice>, u64), InventoryError> {
        let url = self.config.endpoint(&format!(
            "/api/internal/v1/inventory/tenants/{}/devices/search",
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
                "inventory search returned {}",
                response.status()
            )));
        }
        let devices_total = total_count(&response, 0);
        let devices: Vec<WireDevice> = response
            .json()
            .await
            .map_err(|err| InventoryError::Unavailable(err.to_string()))?;
        let total = if devices_total == 0 { devices.len() as u64 } else { devices_total };
        debug!(
            request_id = scope.request_id.as_str(),
            devices = devices.len(),
            total,
            "inventory search page"
        );
        Ok((devices, total))
    }
}

#[async_trait]
impl InventoryClient for InventoryHttpClient {
    async fn get_device_type(
        &self,
        scope: &RequestScope,
        device_id: &DeviceId,
    ) -> Result<String, InventoryError> {
        let search = DeviceSearch {
            page: 1,
            per_page: 1,
            filters: Vec::new(),
            group: None,
            device_ids: vec![device_id.clone()],
        };
        let (devices, _) = self.search_page(scope, &search).await?;
        devices
            .first()
            .and_then(WireDevice::device_type)
            .ok_or_else(|| InventoryError::DeviceTypeUnknown(device_id.clone()))
    }

    async fn get_device_types(
        &self,
        scope: &RequestScope,
        device_ids: &[DeviceId],
    ) -> Result<HashMap<DeviceId, String>, InventoryError> {
        let mut types = HashMap::with_capacity(device_ids.len());
        for chunk in device_ids.chunks(DEVICE_TYPE_BATCH) {
            let search = DeviceSearch {
                page: 1,
                per_page: u32::try_from(chunk.len()).unwrap_or(u32::MAX),
                filters: Vec::new(),
                group: None,
                device_ids: chunk.to_vec(),
            };
            let (devices, _) = self.search_page(scope, &search).await?;
            for device in devices {
                if let Some(device_type) = device.device_type() {
                    types.insert(DeviceId::new(device.id), device_type);
                }
            }
        }
        Ok(types)
    }

    async fn search_devices(
        &self,
        scope: &RequestScope,
        search: &DeviceSearch,
    ) -> Result<(Vec<DeviceListItem>, u64), InventoryError> {
        let (devices, total) = self.search_page(scope, search).await?;
        Ok((devices.into_iter().map(WireDevice::into_item).collect(), total))
    }

    async fn check_health(&self) -> Result<(), InventoryError> {
        let url = self.config.endpoint("/api/internal/v1/inventory/health");
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
                "inventory health returned {}",
                response.status()
            )))
        }
    }
}
