//! Group membership refresh task.
//!
//! Keeps the node's view of its group (owner, sorted member list, this
//! node's rank) and the cluster node count up to date. Every abnormal
//! condition clears the group snapshot rather than failing: group-
//! dependent admission then fails closed until the next refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, warn};

use crate::context::{AppContext, GroupInfo, NodeInfo};
use crate::tasks::{spawn_interval_task, TaskHandle};

const TASK_NAME: &str = "group-info";
/// Wait before the first refresh so the chain gateway can settle.
const INITIAL_DELAY: Duration = Duration::from_secs(30);
const UPDATE_INTERVAL: Duration = Duration::from_secs(60);

pub fn create(ctx: Arc<AppContext>) -> TaskHandle {
    // the admission pipeline depends on this snapshot, so wait for the
    // chain gateway to settle instead of ticking at once
    spawn_interval_task(
        TASK_NAME,
        INITIAL_DELAY,
        UPDATE_INTERVAL,
        ctx,
        |ctx, _flag| async move {
            refresh_group_info(&ctx).await;
            Ok(())
        },
    )
}

/// One refresh round. Never returns an error; a failed round clears the
/// snapshot and the schedule carries on.
pub async fn refresh_group_info(ctx: &AppContext) {
    if let Err(e) = try_refresh(ctx).await {
        error!(task = TASK_NAME, error = %e, "failed updating group info");
        *ctx.group_info.write() = None;
    }
}

async fn try_refresh(ctx: &AppContext) -> Result<()> {
    let Some(identity) = ctx.chain.storage_identity().await? else {
        warn!("no storage identity registered for this account");
        *ctx.group_info.write() = None;
        return Ok(());
    };
    let Some(owner) = identity.group else {
        warn!("node has not joined a group yet");
        *ctx.group_info.write() = None;
        return Ok(());
    };
    if ctx.chain.account() == owner {
        error!("node must not be configured with the group owner account");
        *ctx.group_info.write() = None;
        return Ok(());
    }

    let mut members = ctx.chain.group_members(&owner).await?;
    members.sort();
    let node_index = members.iter().position(|m| m == ctx.chain.account());
    *ctx.group_info.write() = Some(GroupInfo {
        group_owner: owner,
        total_members: members.len(),
        node_index,
    });

    // refresh the cluster size estimate; keep the previous value when
    // the query fails so the throttle keeps working
    match ctx.chain.node_count().await {
        Ok(node_count) => *ctx.node_info.write() = Some(NodeInfo { node_count }),
        Err(e) => warn!(error = %e, "failed to refresh node count"),
    }
    Ok(())
}
