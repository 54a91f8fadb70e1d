//! Shared application context handed to every task and to the admission
//! pipeline. All mutable state lives behind snapshot locks that are
//! replaced wholesale, never field-by-field.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::chain::ChainApi;
use crate::config::NormalizedConfig;
use crate::coordinator::SealCoordinator;
use crate::storage::StorageEngine;
use crate::store::LocalStore;
use crate::throttle::RandomSource;

/// Snapshot of this node's group membership.
///
/// Owned exclusively by the group membership task and published as a
/// whole; a `None` snapshot means "no group" and every group-dependent
/// admission check fails closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub group_owner: String,
    /// Member count of the sorted member list.
    pub total_members: usize,
    /// This node's index within the sorted member list; `None` when the
    /// node is not (yet) in the list.
    pub node_index: Option<usize>,
}

/// Cluster-wide node count estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub node_count: u64,
}

/// Application context: config, collaborator handles and the shared
/// snapshots. Passed by `Arc` into every task at construction; nothing
/// here is ambient or global.
pub struct AppContext {
    pub config: NormalizedConfig,
    pub chain: Arc<dyn ChainApi>,
    pub storage: Arc<dyn StorageEngine>,
    pub coordinator: Option<Arc<dyn SealCoordinator>>,
    pub store: Arc<dyn LocalStore>,
    pub rng: Arc<dyn RandomSource>,
    pub group_info: RwLock<Option<GroupInfo>>,
    pub node_info: RwLock<Option<NodeInfo>>,
    /// Per-cid cancellation handles for in-flight pulls, consumed by the
    /// pull driver. Kept here so cleanup can abort a pull it is about to
    /// delete out from under.
    pub cancellations: Mutex<HashMap<String, Arc<Notify>>>,
}

impl AppContext {
    /// Current group snapshot, cloned out of the lock.
    pub fn group_snapshot(&self) -> Option<GroupInfo> {
        self.group_info.read().clone()
    }

    /// Current cluster node count, if known.
    pub fn node_count(&self) -> Option<u64> {
        self.node_info.read().as_ref().map(|n| n.node_count)
    }
}
