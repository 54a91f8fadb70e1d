//! Storage engine HTTP client.
//!
//! The engine exposes seal lifecycle control (`seal_end`, `delete`), file
//! status queries and workload reporting under `/api/v0`. Write calls map
//! transport failures to `false` so a flaky engine degrades to "nothing
//! changed" instead of aborting a whole tick.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

// ════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════

/// Seal state of a file as reported by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealKind {
    Valid,
    Lost,
    Pending,
    #[serde(other)]
    Unknown,
}

impl SealKind {
    /// Whether the engine considers sealing finished for this file.
    pub fn is_sealed(self) -> bool {
        matches!(self, SealKind::Valid | SealKind::Lost)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SealInfo {
    #[serde(rename = "type")]
    pub kind: SealKind,
    #[serde(default)]
    pub sealed_size: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrdStats {
    pub srd_complete: u64,
    pub disk_available: u64,
    pub sys_disk_available: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkloadInfo {
    pub srd: SrdStats,
}

// ════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════

/// Storage engine collaborator boundary.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Cancel an in-flight seal. `false` means the engine rejected the
    /// call or was unreachable.
    async fn seal_end(&self, cid: &str) -> bool;

    /// Delete a sealed file. Same degraded-to-`false` contract.
    async fn delete(&self, cid: &str) -> bool;

    /// Seal status of one file; `None` when the engine does not know the
    /// cid (HTTP 404). Other failures propagate.
    async fn seal_info(&self, cid: &str) -> Result<Option<SealInfo>>;

    /// The engine's full in-flight sealing queue, keyed by cid.
    async fn pendings(&self) -> Result<HashMap<String, SealInfo>>;

    async fn workload(&self) -> Result<WorkloadInfo>;

    /// (storage free, system free) in MB, derived from the workload.
    async fn free(&self) -> Result<(u64, u64)> {
        let w = self.workload().await?;
        Ok((
            w.srd.srd_complete + w.srd.disk_available,
            w.srd.sys_disk_available,
        ))
    }
}

/// Whether sealing has completed for `cid`. Unexpected engine errors
/// propagate to the caller after being logged.
pub async fn is_seal_done(cid: &str, engine: &dyn StorageEngine) -> Result<bool> {
    match engine.seal_info(cid).await {
        Ok(info) => Ok(info.map_or(false, |i| i.kind.is_sealed())),
        Err(e) => {
            warn!(cid = %cid, error = %e, "unexpected error while querying seal info");
            Err(e)
        }
    }
}

// ════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════

pub struct StorageHttpClient {
    base: String,
    client: Client,
}

impl StorageHttpClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        StorageHttpClient {
            base: base.into(),
            client,
        }
    }

    async fn post_cid(&self, path: &str, cid: &str) -> bool {
        let url = format!("{}/api/v0{}", self.base, path);
        match self.client.post(&url).json(&json!({ "cid": cid })).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(cid = %cid, path, error = %e, "storage engine call failed");
                false
            }
        }
    }
}

#[async_trait]
impl StorageEngine for StorageHttpClient {
    async fn seal_end(&self, cid: &str) -> bool {
        self.post_cid("/storage/seal_end", cid).await
    }

    async fn delete(&self, cid: &str) -> bool {
        self.post_cid("/storage/delete", cid).await
    }

    async fn seal_info(&self, cid: &str) -> Result<Option<SealInfo>> {
        let url = format!("{}/api/v0/file/info", self.base);
        let resp = self.client.get(&url).query(&[("cid", cid)]).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow!("file info query failed with {}", resp.status()));
        }
        // response is keyed by cid
        let mut map = resp.json::<HashMap<String, SealInfo>>().await?;
        Ok(map.remove(cid))
    }

    async fn pendings(&self) -> Result<HashMap<String, SealInfo>> {
        let url = format!("{}/api/v0/file/info_by_type", self.base);
        let resp = self
            .client
            .get(&url)
            .query(&[("type", "pending")])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("pendings query failed with {}", resp.status()));
        }
        Ok(resp.json::<HashMap<String, SealInfo>>().await?)
    }

    async fn workload(&self) -> Result<WorkloadInfo> {
        let url = format!("{}/api/v0/workload", self.base);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("workload query failed with {}", resp.status()));
        }
        Ok(resp.json::<WorkloadInfo>().await?)
    }
}
