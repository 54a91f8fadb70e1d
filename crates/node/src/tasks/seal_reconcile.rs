//! Seal reconciliation task.
//!
//! The storage engine's sealing queue can accumulate entries no local pin
//! record accounts for (crashes, manual operations, an older agent).
//! This task periodically diffs the two sets and cancels the orphans.
//! It is rate-limited by a persisted last-run timestamp so restarting the
//! agent does not restart the clock, and the very first observation only
//! records a timestamp: reconciling against incomplete state right after
//! a fresh install would cancel work it simply has not heard about yet.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::tasks::{spawn_interval_task, TaskHandle};

const TASK_NAME: &str = "seal-reconcile";
/// Wait before the first tick; the persisted timestamp rate-limits the
/// real work anyway.
const INITIAL_DELAY: Duration = Duration::from_secs(60);
const TICK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Store key holding the last completed reconciliation time.
pub const KEY_LAST_RECONCILE: &str = "seal-reconcile:last-run";

/// Minimum wall-clock distance between two reconciliations.
pub const MIN_RECONCILE_INTERVAL_SECS: i64 = 2 * 24 * 3600;

pub fn create(ctx: Arc<AppContext>) -> TaskHandle {
    spawn_interval_task(
        TASK_NAME,
        INITIAL_DELAY,
        TICK_INTERVAL,
        ctx,
        |ctx, _flag| async move { reconcile_seals(&ctx).await },
    )
}

/// One reconciliation round.
pub async fn reconcile_seals(ctx: &AppContext) -> Result<()> {
    let now = Utc::now();
    let Some(last_run) = ctx.store.read_time(KEY_LAST_RECONCILE)? else {
        info!(task = TASK_NAME, "first run, recording timestamp only");
        ctx.store.save_time(KEY_LAST_RECONCILE, now)?;
        return Ok(());
    };
    let elapsed = now.signed_duration_since(last_run);
    if elapsed.num_seconds() < MIN_RECONCILE_INTERVAL_SECS {
        info!(
            task = TASK_NAME,
            elapsed_secs = elapsed.num_seconds(),
            "skipping, reconciled recently"
        );
        return Ok(());
    }

    let pendings = ctx.storage.pendings().await?;
    let sealing: HashSet<String> = ctx.store.sealing_cids()?.into_iter().collect();

    let mut cancelled = 0usize;
    for cid in pendings.keys() {
        if sealing.contains(cid) {
            continue;
        }
        info!(task = TASK_NAME, cid = %cid, "cancelling orphaned seal");
        if ctx.storage.seal_end(cid).await {
            cancelled += 1;
        } else {
            warn!(task = TASK_NAME, cid = %cid, "seal_end rejected by storage engine");
        }
    }
    info!(
        task = TASK_NAME,
        cancelled,
        pending_total = pendings.len(),
        "seal reconciliation finished"
    );
    ctx.store.save_time(KEY_LAST_RECONCILE, now)?;
    Ok(())
}
