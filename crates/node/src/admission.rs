//! File admission pipeline.
//!
//! Converts a raw file record into a pull/skip verdict through a cascade
//! of checks: deterministic shard test, probabilistic throttle, size and
//! replica bounds, expiration/liveness rules, and finally an optional
//! round-trip to the seal coordinator as authoritative tie-breaker. The
//! first failing check wins; later checks never run.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use sdm_common::chain_math::{estimate_time_at_block, BlockAndTime};

use crate::context::AppContext;
use crate::shard::is_my_shard;
use crate::strategy::PullBucket;
use crate::throttle::should_take;

// ════════════════════════════════════════════════════════════════════════
// POLICY CONSTANTS
// ════════════════════════════════════════════════════════════════════════

/// A db-scanned record with no expiry information is dropped for good
/// once it has gone this long without gaining replica data.
pub const MAX_NO_REPLICA_DAYS: i64 = 10;

/// Minimum remaining lifetime a file must have to be worth sealing.
pub const MIN_REMAINING_LIFETIME_DAYS: i64 = 4 * 30;

/// Global replica target used by the throttle for fresh chain files.
pub const NEW_FILES_REPLICA_CAP: u32 = 300;

/// Global replica target used by the throttle for everything else.
pub const DEFAULT_REPLICA_CAP: u32 = 160;

/// System disk headroom the storage engine always needs, in MB.
pub const SYS_MIN_FREE_SPACE_MB: f64 = (50 * 1024) as f64;

/// Base timeout for an IPFS pin, before the size-proportional part.
pub const BASE_PIN_TIMEOUT_MS: u64 = 60 * 60 * 1000;

// ════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════

/// Which discovery path produced a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileIndexer {
    /// Indexed from chain events.
    ChainEvent,
    /// Found by scanning the local database backlog.
    LocalScan,
}

/// A candidate replication unit, read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub cid: String,
    /// Size in bytes.
    pub size: u64,
    /// Replica count as last observed.
    pub replicas: u32,
    pub indexer: FileIndexer,
    /// Unix seconds when the record was first indexed.
    pub create_at: i64,
    /// Expiration block height; 0 = unknown.
    pub expire_at: u64,
}

/// Outcome of evaluating one file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Pull and seal this file.
    Good,
    /// The cid could not be parsed.
    InvalidCid,
    /// Another member (or another node, per the coordinator) owns it.
    NotInShard,
    /// Lost the probabilistic admission coin flip.
    Throttled,
    /// Known expiry leaves less than the minimum remaining lifetime.
    LifetimeTooShort,
    /// Went too long without replica information; permanently invalid.
    Expired,
    SizeTooSmall,
    SizeTooLarge,
    /// Below the configured replica floor for db-scanned candidates.
    ReplicasInsufficient,
    /// At or above the configured replica ceiling.
    TooManyReplicas,
    /// Too young to judge; wait for replica information.
    PendingForReplicaInfo,
}

// ════════════════════════════════════════════════════════════════════════
// PIPELINE
// ════════════════════════════════════════════════════════════════════════

/// Evaluate one candidate. `last_block` is the most recently observed
/// chain block/time pair, used to project expiry heights onto the wall
/// clock. Short-circuits on the first failing check.
pub async fn evaluate(
    record: &FileRecord,
    bucket: PullBucket,
    last_block: &BlockAndTime,
    ctx: &AppContext,
) -> Verdict {
    // 1. shard ownership; a missing group snapshot fails closed
    let Some(group) = ctx.group_snapshot() else {
        return Verdict::NotInShard;
    };
    match is_my_shard(&record.cid, &group) {
        Ok(true) => {}
        Ok(false) => return Verdict::NotInShard,
        Err(_) => return Verdict::InvalidCid,
    }

    // 2. probabilistic throttle; unknown cluster size fails closed
    let replica_cap = match bucket {
        PullBucket::NewFiles => NEW_FILES_REPLICA_CAP,
        _ => DEFAULT_REPLICA_CAP,
    };
    let Some(node_count) = ctx.node_count() else {
        return Verdict::Throttled;
    };
    if !should_take(
        node_count,
        group.total_members,
        replica_cap,
        &ctx.config.chain.account,
        ctx.rng.as_ref(),
    ) {
        return Verdict::Throttled;
    }

    // 3. size bounds (MB, 0 = unbounded)
    let sched = &ctx.config.scheduler;
    let size_mb = bytes_to_mb(record.size);
    if sched.min_file_size > 0 && size_mb < sched.min_file_size as f64 {
        return Verdict::SizeTooSmall;
    }
    if sched.max_file_size > 0 && size_mb > sched.max_file_size as f64 {
        return Verdict::SizeTooLarge;
    }

    // 4. replica bounds
    if bucket == PullBucket::DbFiles
        && sched.min_replicas > 0
        && record.replicas < sched.min_replicas
    {
        return Verdict::ReplicasInsufficient;
    }
    if sched.max_replicas > 0 && record.replicas >= sched.max_replicas {
        return Verdict::TooManyReplicas;
    }

    // 5. expiration / liveness, only meaningful for db-scanned records
    if record.indexer == FileIndexer::LocalScan {
        if record.expire_at == 0 {
            let created = DateTime::from_timestamp(record.create_at, 0).unwrap_or_else(Utc::now);
            let age = Utc::now().signed_duration_since(created);
            if age > Duration::days(MAX_NO_REPLICA_DAYS) {
                return Verdict::Expired;
            }
            return Verdict::PendingForReplicaInfo;
        }
        let expire_time = estimate_time_at_block(record.expire_at, last_block);
        let remaining = expire_time.signed_duration_since(Utc::now());
        if remaining < Duration::days(MIN_REMAINING_LIFETIME_DAYS) {
            return Verdict::LifetimeTooShort;
        }
    }

    // 6. seal coordinator round-trip, the authoritative tie-breaker;
    //    any non-ok answer or transport failure fails closed
    if let Some(coordinator) = &ctx.coordinator {
        return match coordinator.mark_seal(&record.cid).await {
            Ok(outcome) if outcome.seal && outcome.reason == "ok" => Verdict::Good,
            Ok(outcome) => {
                info!(cid = %record.cid, reason = %outcome.reason,
                    "seal skipped by coordinator");
                Verdict::NotInShard
            }
            Err(e) => {
                warn!(cid = %record.cid, error = %e, "seal coordinator unreachable");
                Verdict::NotInShard
            }
        };
    }

    Verdict::Good
}

// ════════════════════════════════════════════════════════════════════════
// PURE HELPERS
// ════════════════════════════════════════════════════════════════════════

pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Pin timeout: one hour base plus one second per 200 KiB, so a pull that
/// is still making progress on a large file is not cut off early.
pub fn estimate_pin_timeout(size_bytes: u64) -> std::time::Duration {
    std::time::Duration::from_millis(BASE_PIN_TIMEOUT_MS + size_bytes / 1024 / 200 * 1000)
}

/// Whether local disk can take one more file. `pending_mb` is the total
/// size of pulls already in flight; the 2.2 factor leaves room for the
/// engine's sealing copy.
pub fn has_disk_room(file_mb: f64, pending_mb: f64, storage_free_mb: f64, sys_free_mb: f64) -> bool {
    if sys_free_mb < SYS_MIN_FREE_SPACE_MB {
        return false;
    }
    storage_free_mb >= (file_mb + pending_mb) * 2.2
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use parking_lot::{Mutex, RwLock};

    use crate::chain::{ChainApi, StorageIdentity};
    use crate::config::Config;
    use crate::context::{GroupInfo, NodeInfo};
    use crate::coordinator::{MarkSealOutcome, SealCoordinator};
    use crate::storage::{SealInfo, StorageEngine, WorkloadInfo};
    use crate::store::MetaStore;
    use crate::throttle::RandomSource;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    // ── stubs ────────────────────────────────────────────────────────────

    struct StubChain;

    #[async_trait]
    impl ChainApi for StubChain {
        fn account(&self) -> &str {
            "test-account"
        }
        async fn storage_identity(&self) -> Result<Option<StorageIdentity>> {
            Err(anyhow!("not used"))
        }
        async fn group_members(&self, _owner: &str) -> Result<Vec<String>> {
            Err(anyhow!("not used"))
        }
        async fn node_count(&self) -> Result<u64> {
            Err(anyhow!("not used"))
        }
    }

    struct StubStorage;

    #[async_trait]
    impl StorageEngine for StubStorage {
        async fn seal_end(&self, _cid: &str) -> bool {
            false
        }
        async fn delete(&self, _cid: &str) -> bool {
            false
        }
        async fn seal_info(&self, _cid: &str) -> Result<Option<SealInfo>> {
            Ok(None)
        }
        async fn pendings(&self) -> Result<HashMap<String, SealInfo>> {
            Ok(HashMap::new())
        }
        async fn workload(&self) -> Result<WorkloadInfo> {
            Err(anyhow!("not used"))
        }
    }

    /// Counts draws and returns a fixed value; lets tests assert the
    /// throttle was (not) reached.
    struct CountingRandom {
        value: f64,
        calls: AtomicU32,
    }

    impl CountingRandom {
        fn new(value: f64) -> Arc<Self> {
            Arc::new(CountingRandom {
                value,
                calls: AtomicU32::new(0),
            })
        }
        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RandomSource for CountingRandom {
        fn draw(&self, _seed: &str) -> f64 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value
        }
    }

    struct StubCoordinator {
        outcome: Result<MarkSealOutcome, String>,
        marked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SealCoordinator for StubCoordinator {
        async fn mark_seal(&self, cid: &str) -> Result<MarkSealOutcome> {
            self.marked.lock().push(cid.to_string());
            match &self.outcome {
                Ok(o) => Ok(MarkSealOutcome {
                    seal: o.seal,
                    reason: o.reason.clone(),
                }),
                Err(msg) => Err(anyhow!("{msg}")),
            }
        }
        async fn unmark_seal(&self, _cid: &str) -> Result<()> {
            Ok(())
        }
    }

    // ── fixture ──────────────────────────────────────────────────────────

    fn test_config(min_replicas: u32, max_replicas: u32) -> crate::config::NormalizedConfig {
        let raw = format!(
            r#"
            [chain]
            endpoint = "http://chain"
            account = "test-account"
            [storage]
            endpoint = "http://storage"
            [scheduler]
            strategy = "srdFirst"
            min_file_size = 0
            max_file_size = 0
            min_replicas = {min_replicas}
            max_replicas = {max_replicas}
            "#
        );
        let cfg: Config = toml::from_str(&raw).expect("test config");
        cfg.validate().expect("valid test config")
    }

    fn ctx_with(
        config: crate::config::NormalizedConfig,
        rng: Arc<dyn RandomSource>,
        coordinator: Option<Arc<dyn SealCoordinator>>,
        group: Option<GroupInfo>,
        node_count: Option<u64>,
    ) -> AppContext {
        AppContext {
            config,
            chain: Arc::new(StubChain),
            storage: Arc::new(StubStorage),
            coordinator,
            store: Arc::new(MetaStore::open_in_memory().expect("store")),
            rng,
            group_info: RwLock::new(group),
            node_info: RwLock::new(node_count.map(|node_count| NodeInfo { node_count })),
            cancellations: Mutex::new(HashMap::new()),
        }
    }

    fn solo_group() -> GroupInfo {
        GroupInfo {
            group_owner: "owner".to_string(),
            total_members: 1,
            node_index: Some(0),
        }
    }

    fn record(size: u64, replicas: u32, indexer: FileIndexer, expire_at: u64) -> FileRecord {
        FileRecord {
            cid: CID.to_string(),
            size,
            replicas,
            indexer,
            create_at: Utc::now().timestamp(),
            expire_at,
        }
    }

    fn last_block() -> BlockAndTime {
        BlockAndTime {
            block: 10_000,
            time: Utc::now(),
        }
    }

    // ── tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_group_snapshot_fails_closed() {
        let rng = CountingRandom::new(0.0);
        let ctx = ctx_with(test_config(0, 100), rng.clone(), None, None, Some(100));
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::NotInShard);
        assert_eq!(rng.calls(), 0, "throttle must not run without a group");
    }

    #[tokio::test]
    async fn test_shard_miss_short_circuits_later_checks() {
        let rng = CountingRandom::new(0.0);
        // member of a group of one, but not in the member list
        let group = GroupInfo {
            group_owner: "owner".to_string(),
            total_members: 1,
            node_index: None,
        };
        let ctx = ctx_with(
            test_config(0, 100),
            rng.clone(),
            None,
            Some(group),
            Some(100),
        );
        // oversized and over-replicated; neither check may be reached
        let r = record(u64::MAX, 5_000, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::NotInShard);
        assert_eq!(rng.calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_cid() {
        let rng = CountingRandom::new(0.0);
        let ctx = ctx_with(
            test_config(0, 100),
            rng.clone(),
            None,
            Some(solo_group()),
            Some(100),
        );
        let mut r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        r.cid = "definitely-not-a-cid".to_string();
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::InvalidCid);
        assert_eq!(rng.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_node_count_throttles() {
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            None,
        );
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::Throttled);
    }

    #[tokio::test]
    async fn test_lost_coin_flip_throttles() {
        // 160 / 10_000 nodes = 0.016 < 0.5
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.5),
            None,
            Some(solo_group()),
            Some(10_000),
        );
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::ExistedFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::Throttled);
    }

    #[tokio::test]
    async fn test_size_bounds() {
        let mut config = test_config(0, 100);
        config.scheduler.min_file_size = 5;
        config.scheduler.max_file_size = 100;
        let ctx = ctx_with(
            config,
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let small = record(1 << 20, 5, FileIndexer::ChainEvent, 0);
        let large = record(200 << 20, 5, FileIndexer::ChainEvent, 0);
        let fine = record(50 << 20, 5, FileIndexer::ChainEvent, 0);
        let lb = last_block();
        assert_eq!(
            evaluate(&small, PullBucket::NewFiles, &lb, &ctx).await,
            Verdict::SizeTooSmall
        );
        assert_eq!(
            evaluate(&large, PullBucket::NewFiles, &lb, &ctx).await,
            Verdict::SizeTooLarge
        );
        assert_eq!(
            evaluate(&fine, PullBucket::NewFiles, &lb, &ctx).await,
            Verdict::Good
        );
    }

    #[tokio::test]
    async fn test_replica_bounds() {
        let ctx = ctx_with(
            test_config(40, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let lb = last_block();
        // floor applies to db-scanned candidates only
        let low = record(10 << 20, 3, FileIndexer::ChainEvent, 0);
        assert_eq!(
            evaluate(&low, PullBucket::DbFiles, &lb, &ctx).await,
            Verdict::ReplicasInsufficient
        );
        assert_eq!(
            evaluate(&low, PullBucket::NewFiles, &lb, &ctx).await,
            Verdict::Good
        );
        // ceiling applies to every bucket
        let high = record(10 << 20, 100, FileIndexer::ChainEvent, 0);
        assert_eq!(
            evaluate(&high, PullBucket::NewFiles, &lb, &ctx).await,
            Verdict::TooManyReplicas
        );
    }

    #[tokio::test]
    async fn test_young_scan_record_waits_for_replica_info() {
        // spec scenario: srdFirst, unbounded sizes, 10MB, 5 replicas,
        // max 100, local scan, no expiry, created now, no coordinator
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let r = record(10 << 20, 5, FileIndexer::LocalScan, 0);
        let v = evaluate(&r, PullBucket::DbFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::PendingForReplicaInfo);
    }

    #[tokio::test]
    async fn test_stale_scan_record_expires() {
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let mut r = record(10 << 20, 5, FileIndexer::LocalScan, 0);
        r.create_at = (Utc::now() - Duration::days(MAX_NO_REPLICA_DAYS + 1)).timestamp();
        let v = evaluate(&r, PullBucket::DbFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::Expired);
    }

    #[tokio::test]
    async fn test_short_remaining_lifetime_rejected() {
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let lb = last_block();
        // ~30 days of blocks left, under the 4-month floor
        let blocks_30d = (30 * 24 * 3600 / 6) as u64;
        let short = record(10 << 20, 5, FileIndexer::LocalScan, lb.block + blocks_30d);
        assert_eq!(
            evaluate(&short, PullBucket::DbFiles, &lb, &ctx).await,
            Verdict::LifetimeTooShort
        );
        // ~200 days is plenty
        let blocks_200d = (200 * 24 * 3600 / 6) as u64;
        let long = record(10 << 20, 5, FileIndexer::LocalScan, lb.block + blocks_200d);
        assert_eq!(
            evaluate(&long, PullBucket::DbFiles, &lb, &ctx).await,
            Verdict::Good
        );
    }

    #[tokio::test]
    async fn test_chain_indexed_record_skips_expiry_rules() {
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            None,
            Some(solo_group()),
            Some(10),
        );
        let mut r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        r.create_at = (Utc::now() - Duration::days(30)).timestamp();
        let v = evaluate(&r, PullBucket::ExistedFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::Good);
    }

    #[tokio::test]
    async fn test_coordinator_accepts() {
        let coord = Arc::new(StubCoordinator {
            outcome: Ok(MarkSealOutcome {
                seal: true,
                reason: "ok".to_string(),
            }),
            marked: Mutex::new(Vec::new()),
        });
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            Some(coord.clone()),
            Some(solo_group()),
            Some(10),
        );
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::Good);
        assert_eq!(coord.marked.lock().as_slice(), [CID.to_string()]);
    }

    #[tokio::test]
    async fn test_coordinator_rejection_fails_closed() {
        let coord = Arc::new(StubCoordinator {
            outcome: Ok(MarkSealOutcome {
                seal: false,
                reason: "taken".to_string(),
            }),
            marked: Mutex::new(Vec::new()),
        });
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            Some(coord),
            Some(solo_group()),
            Some(10),
        );
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::NotInShard);
    }

    #[tokio::test]
    async fn test_coordinator_error_fails_closed() {
        let coord = Arc::new(StubCoordinator {
            outcome: Err("connection refused".to_string()),
            marked: Mutex::new(Vec::new()),
        });
        let ctx = ctx_with(
            test_config(0, 100),
            CountingRandom::new(0.0),
            Some(coord),
            Some(solo_group()),
            Some(10),
        );
        let r = record(10 << 20, 5, FileIndexer::ChainEvent, 0);
        let v = evaluate(&r, PullBucket::NewFiles, &last_block(), &ctx).await;
        assert_eq!(v, Verdict::NotInShard);
    }

    #[test]
    fn test_bytes_to_mb() {
        assert_eq!(bytes_to_mb(10 << 20), 10.0);
        assert_eq!(bytes_to_mb(0), 0.0);
    }

    #[test]
    fn test_pin_timeout_base_and_growth() {
        let base = estimate_pin_timeout(0);
        assert_eq!(base, std::time::Duration::from_secs(3600));
        // 200 MiB adds 1024 seconds
        let t = estimate_pin_timeout(200 << 20);
        assert_eq!(t - base, std::time::Duration::from_secs(1024));
    }

    #[test]
    fn test_disk_room() {
        // below system headroom: never
        assert!(!has_disk_room(1.0, 0.0, 1_000_000.0, 1024.0));
        // 2.2x rule
        assert!(has_disk_room(100.0, 0.0, 220.0, SYS_MIN_FREE_SPACE_MB));
        assert!(!has_disk_room(100.0, 1.0, 220.0, SYS_MIN_FREE_SPACE_MB));
    }
}
