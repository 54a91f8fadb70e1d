//! Interval task scheduling.
//!
//! Every background job is a named loop running one tick at a time on a
//! fixed period. The period is measured from tick start; an overrunning
//! tick schedules the next one immediately but ticks never overlap. A
//! failing tick is logged and swallowed so one bad round never kills the
//! schedule. Cancellation is cooperative: `TaskHandle::stop` prevents
//! the next tick and is observed at explicit yield points inside long
//! ticks, never by interrupting work in progress.

pub mod cleanup;
pub mod group_info;
pub mod seal_reconcile;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

/// Cooperative stop signal shared between a task loop and its handle.
#[derive(Clone)]
pub struct StopFlag {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopFlag {
    pub fn new() -> StopFlag {
        StopFlag {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Sleep for `d`, waking early on stop. Returns true when the task
    /// should stop.
    pub async fn sleep_unless_stopped(&self, d: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = sleep(d) => self.is_stopped(),
        }
    }
}

impl Default for StopFlag {
    fn default() -> StopFlag {
        StopFlag::new()
    }
}

/// Handle to a spawned interval task.
pub struct TaskHandle {
    name: &'static str,
    flag: StopFlag,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the loop to stop and wait for it to finish its current
    /// tick. Never interrupts a tick in progress.
    pub async fn stop(self) {
        self.flag.trigger();
        if let Err(e) = self.handle.await {
            warn!(task = self.name, error = %e, "task terminated abnormally");
        }
    }
}

/// Spawn a named interval task.
///
/// The loop waits `initial_delay` before the first tick; pass zero for
/// an immediate start.
pub fn spawn_interval_task<C, F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    ctx: Arc<C>,
    tick: F,
) -> TaskHandle
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, StopFlag) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let flag = StopFlag::new();
    let loop_flag = flag.clone();
    let handle = tokio::spawn(async move {
        if !initial_delay.is_zero() && loop_flag.sleep_unless_stopped(initial_delay).await {
            info!(task = name, "stopped before first tick");
            return;
        }
        info!(
            task = name,
            period_secs = period.as_secs(),
            "task loop started"
        );
        loop {
            if loop_flag.is_stopped() {
                break;
            }
            let started = Instant::now();
            if let Err(e) = tick(ctx.clone(), loop_flag.clone()).await {
                error!(task = name, error = %e, "tick failed");
            }
            let wait = period.saturating_sub(started.elapsed());
            if wait.is_zero() {
                // tick overran its period: run the next one right away
                continue;
            }
            if loop_flag.sleep_unless_stopped(wait).await {
                break;
            }
        }
        info!(task = name, "task loop stopped");
    });
    TaskHandle { name, flag, handle }
}
