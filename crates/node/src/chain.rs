//! Chain gateway client: storage identity, group membership and the
//! active storage node count.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

/// The on-chain storage identity of a node; `group` is the account of the
/// group owner when the node has joined one.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageIdentity {
    pub group: Option<String>,
}

/// Read-only chain queries the agent needs.
///
/// Implementations must not retry internally; callers decide how a failed
/// tick is handled.
#[async_trait]
pub trait ChainApi: Send + Sync {
    /// This node's configured chain account.
    fn account(&self) -> &str;

    /// Storage identity registered for `account()`, `None` if absent.
    async fn storage_identity(&self) -> Result<Option<StorageIdentity>>;

    /// All member accounts of the group owned by `owner`.
    async fn group_members(&self, owner: &str) -> Result<Vec<String>>;

    /// Count of active storage nodes in the whole cluster.
    async fn node_count(&self) -> Result<u64>;
}

/// HTTP implementation against the chain gateway.
pub struct ChainHttpClient {
    base: String,
    account: String,
    client: Client,
}

impl ChainHttpClient {
    pub fn new(base: impl Into<String>, account: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        ChainHttpClient {
            base: base.into(),
            account: account.into(),
            client,
        }
    }
}

#[async_trait]
impl ChainApi for ChainHttpClient {
    fn account(&self) -> &str {
        &self.account
    }

    async fn storage_identity(&self) -> Result<Option<StorageIdentity>> {
        let url = format!("{}/api/v1/swork/identity/{}", self.base, self.account);
        let resp = self.client.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(anyhow!("identity query failed with {}", resp.status()));
        }
        Ok(Some(resp.json::<StorageIdentity>().await?))
    }

    async fn group_members(&self, owner: &str) -> Result<Vec<String>> {
        let url = format!("{}/api/v1/swork/group/{}/members", self.base, owner);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("group members query failed with {}", resp.status()));
        }
        Ok(resp.json::<Vec<String>>().await?)
    }

    async fn node_count(&self) -> Result<u64> {
        let url = format!("{}/api/v1/swork/node-count", self.base);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("node count query failed with {}", resp.status()));
        }
        Ok(resp.json::<u64>().await?)
    }
}
