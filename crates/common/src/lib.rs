//! # SDM Common Crate
//!
//! Shared helpers for the SDM storage node agent:
//! - `cid`: content identifier parsing and big-integer shard math
//! - `chain_math`: block-height to wall-clock estimation

pub mod chain_math;
pub mod cid;

pub use cid::CidError;
