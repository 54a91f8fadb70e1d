//! # SDM Node Agent
//!
//! Node agent for a decentralized storage network. Each node observes the
//! same file-discovery stream and must independently decide which files it
//! should pull and seal, so that the fleet converges on a bounded, fairly
//! distributed replica set per file without a leader.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         sdm-node                             │
//! │                                                              │
//! │  GroupMembershipTask ──► GroupInfo / NodeInfo snapshots      │
//! │                                │                             │
//! │                                ▼                             │
//! │  FileRecord ──► admission::evaluate ──► Verdict              │
//! │                  │ shard test (deterministic)                │
//! │                  │ throttle  (probabilistic)                 │
//! │                  │ size / replica / lifetime rules           │
//! │                  └ seal coordinator round-trip (optional)    │
//! │                                                              │
//! │  SealReconciliationTask ──► storage engine pendings vs       │
//! │                             local pin records                │
//! │  CleanupTask ──────────────► queued deletions drained        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cross-node coordination is either probabilistic (the admission
//! throttle) or delegated to the external seal coordinator; there are no
//! distributed locks and no vote exchange anywhere.

pub mod admission;
pub mod chain;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod shard;
pub mod storage;
pub mod store;
pub mod strategy;
pub mod tasks;
pub mod throttle;

pub use admission::{FileIndexer, FileRecord, Verdict};
pub use context::{AppContext, GroupInfo, NodeInfo};
pub use strategy::{PullBucket, StrategyWeights};
