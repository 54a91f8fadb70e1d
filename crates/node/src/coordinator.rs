//! Seal coordinator client.
//!
//! The coordinator is an optional external authority that arbitrates
//! which node may seal a file when group-local heuristics are not
//! enough. Registering a seal is `mark_seal`; cleanup releases its claim
//! with `unmark_seal`.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;

/// Coordinator's answer to a mark-seal request. The file may only be
/// pulled when `seal` is true and `reason` is `"ok"`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkSealOutcome {
    pub seal: bool,
    pub reason: String,
}

#[async_trait]
pub trait SealCoordinator: Send + Sync {
    /// Ask the coordinator to record this node as the sealer of `cid`.
    async fn mark_seal(&self, cid: &str) -> Result<MarkSealOutcome>;

    /// Release this node's claim on `cid`.
    async fn unmark_seal(&self, cid: &str) -> Result<()>;
}

pub struct SealCoordinatorHttpClient {
    base: String,
    node_uuid: String,
    client: Client,
}

impl SealCoordinatorHttpClient {
    pub fn new(
        base: impl Into<String>,
        node_uuid: impl Into<String>,
        auth_token: &str,
        timeout: Duration,
    ) -> Self {
        let mut headers = HeaderMap::new();
        if !auth_token.is_empty() {
            if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", auth_token)) {
                headers.insert(AUTHORIZATION, v);
            }
        }
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .expect("reqwest client");
        SealCoordinatorHttpClient {
            base: base.into(),
            node_uuid: node_uuid.into(),
            client,
        }
    }

    fn seal_url(&self, cid: &str) -> String {
        format!("{}/api/v0/seal/{}", self.base, cid)
    }
}

#[async_trait]
impl SealCoordinator for SealCoordinatorHttpClient {
    async fn mark_seal(&self, cid: &str) -> Result<MarkSealOutcome> {
        let resp = self
            .client
            .post(self.seal_url(cid))
            .header("x-node-uuid", &self.node_uuid)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("mark seal failed with {}", resp.status()));
        }
        Ok(resp.json::<MarkSealOutcome>().await?)
    }

    async fn unmark_seal(&self, cid: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.seal_url(cid))
            .header("x-node-uuid", &self.node_uuid)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(anyhow!("unmark seal failed with {}", resp.status()));
        }
        Ok(())
    }
}
