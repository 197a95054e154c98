//! Admin API client for the runner registry.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Error, Result};

/// Bound on the runner listing call; the rest of the tick uses the ambient
/// request deadlines.
const LIST_RUNNERS_TIMEOUT: Duration = Duration::from_secs(10);

/// A runner as reported by the Admin API.
///
/// Missing numeric fields deserialize to zero so a partially filled record
/// classifies as idle rather than failing the whole listing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Runner {
    pub id: String,
    pub name: String,
    /// Reachable IP of the node hosting this runner.
    pub domain: String,
    /// Self-reported CPU capacity in cores.
    pub cpu: f32,
    /// Self-reported memory capacity in GiB.
    pub memory: f32,
    pub current_allocated_cpu: f32,
    #[serde(rename = "currentAllocatedMemoryGiB")]
    pub current_allocated_memory_gib: f32,
    #[serde(rename = "currentAllocatedDiskGiB")]
    pub current_allocated_disk_gib: f32,
    pub current_started_sandboxes: i64,
    pub current_snapshot_count: i64,
    pub unschedulable: bool,
}

impl Runner {
    /// A runner holding any allocation, sandbox, or snapshot is active and
    /// must never be scaled down.
    pub fn is_active(&self) -> bool {
        self.current_allocated_cpu > 0.0
            || self.current_allocated_memory_gib > 0.0
            || self.current_allocated_disk_gib > 0.0
            || self.current_started_sandboxes > 0
            || self.current_snapshot_count > 0
    }
}

/// Client for the Admin API endpoints the manager consumes.
#[derive(Clone)]
pub struct AdminApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl AdminApi {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// List all runners registered in a region.
    pub async fn list_runners(&self, region_id: &str) -> Result<Vec<Runner>> {
        let response = self
            .client
            .get(format!("{}/runners", self.base_url))
            .query(&[("regionId", region_id)])
            .bearer_auth(&self.api_key)
            .timeout(LIST_RUNNERS_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::ApiStatus {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }
}
