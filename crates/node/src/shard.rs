//! Deterministic group sharding.
//! Every member computes ownership independently from the same sorted
//! membership snapshot, so the group agrees on a partition of the cid
//! space without any communication.

use sdm_common::cid::{canonical_bytes, mod_big_endian, CidError};

use crate::context::GroupInfo;

/// Whether this node owns the shard `cid` falls into.
///
/// The cid is always parsed, so a malformed identifier is an error even
/// when the group is empty. With no group (`total_members == 0`) every
/// node owns every shard; a node missing from the member list owns none.
pub fn is_my_shard(cid: &str, group: &GroupInfo) -> Result<bool, CidError> {
    let bytes = canonical_bytes(cid)?;
    if group.total_members == 0 {
        return Ok(true);
    }
    let rem = mod_big_endian(&bytes, group.total_members as u64);
    Ok(match group.node_index {
        Some(idx) => rem == idx as u64,
        None => false,
    })
}
