//! Cleanup task.
//!
//! Drains the queued-deletion backlog: for each pending record the file's
//! seal claim is released with the coordinator (best effort), the file is
//! deleted from the storage engine, and the outcome is recorded. Failures
//! are isolated per record; a bad row never stalls the rest of the batch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::store::{CleanupRecord, CleanupStatus};
use crate::tasks::{spawn_interval_task, StopFlag, TaskHandle};

const TASK_NAME: &str = "files-cleanup";
/// Wait before the first drain so boot is not dominated by backlog work.
const INITIAL_DELAY: Duration = Duration::from_secs(10 * 60);
const TICK_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Rows fetched per batch.
pub const CLEANUP_PAGE_SIZE: u32 = 10;

/// Pause between full batches so the storage engine is not hammered.
const BATCH_PAUSE: Duration = Duration::from_secs(10);

pub fn create(ctx: Arc<AppContext>) -> TaskHandle {
    spawn_interval_task(
        TASK_NAME,
        INITIAL_DELAY,
        TICK_INTERVAL,
        ctx,
        |ctx, flag| async move { drain_cleanup_queue(&ctx, &flag).await },
    )
}

/// Drain the pending-cleanup queue. Loops while batches come back full,
/// pausing between them; observes the stop flag at batch boundaries and
/// between records (a single in-flight deletion is not interrupted).
pub async fn drain_cleanup_queue(ctx: &AppContext, flag: &StopFlag) -> Result<()> {
    loop {
        if flag.is_stopped() {
            return Ok(());
        }
        let batch = ctx.store.pending_cleanup_records(CLEANUP_PAGE_SIZE)?;
        if batch.is_empty() {
            return Ok(());
        }
        for record in &batch {
            if flag.is_stopped() {
                return Ok(());
            }
            let status = match cleanup_one(ctx, record).await {
                Ok(true) => CleanupStatus::Done,
                Ok(false) => CleanupStatus::Failed,
                Err(e) => {
                    error!(task = TASK_NAME, cid = %record.cid, error = %e,
                        "cleanup failed");
                    CleanupStatus::Failed
                }
            };
            if let Err(e) = ctx.store.update_cleanup_status(record.id, status) {
                error!(task = TASK_NAME, record_id = record.id, error = %e,
                    "failed to record cleanup outcome");
            }
        }
        if (batch.len() as u32) < CLEANUP_PAGE_SIZE {
            return Ok(());
        }
        if flag.sleep_unless_stopped(BATCH_PAUSE).await {
            return Ok(());
        }
    }
}

/// Process one record: release the seal claim, then delete. Returns the
/// storage engine's verdict.
async fn cleanup_one(ctx: &AppContext, record: &CleanupRecord) -> Result<bool> {
    info!(task = TASK_NAME, cid = %record.cid, record_id = record.id, "deleting file");
    // abort any pull still in flight for this cid before deleting under it
    if let Some(cancel) = ctx.cancellations.lock().remove(&record.cid) {
        cancel.notify_waiters();
    }
    if let Some(coordinator) = &ctx.coordinator {
        // best effort: a stale claim is harmless, a stuck deletion is not
        if let Err(e) = coordinator.unmark_seal(&record.cid).await {
            warn!(task = TASK_NAME, cid = %record.cid, error = %e,
                "failed to release seal claim, deleting anyway");
        }
    }
    Ok(ctx.storage.delete(&record.cid).await)
}
