//! Flush timing: debounce, max interval, size threshold, and teardown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::config::ScheduleConfig;
use crate::store::PendingVoteStore;
use crate::sync::{FlushOutcome, SyncClient};

/// One-shot teardown flag shared between the engine and the scheduler task.
#[derive(Clone, Default)]
struct ShutdownSignal {
    signaled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownSignal {
    fn signal(&self) {
        if !self.signaled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        // Subscribe before checking the flag so a signal landing between the
        // check and the await is not lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.signaled.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Why a flush fired.
#[derive(Debug, Clone, Copy)]
enum FlushReason {
    Debounce,
    Interval,
    Size,
    Manual,
}

impl FlushReason {
    fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Debounce => "debounce",
            FlushReason::Interval => "interval",
            FlushReason::Size => "size",
            FlushReason::Manual => "manual",
        }
    }
}

/// Engine-side handle to the scheduler task.
pub(crate) struct SchedulerHandle {
    nudge: Arc<Notify>,
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Fire-and-forget flush request, e.g. when the embedder is about to
    /// lose visibility. Coalesces with whatever the timers would do anyway.
    pub(crate) fn request_flush(&self) {
        self.nudge.notify_one();
    }

    /// Stops the task after one final best-effort flush.
    pub(crate) async fn shutdown(self) {
        self.shutdown.signal();
        if self.task.await.is_err() {
            warn!("flush scheduler task ended abnormally");
        }
    }
}

/// Spawns the single task that owns all flush timing. That task is the sole
/// caller of the sync client, so batches are strictly sequential and no two
/// flushes can ever run concurrently.
pub(crate) fn spawn(
    store: Arc<PendingVoteStore>,
    client: SyncClient,
    config: ScheduleConfig,
) -> SchedulerHandle {
    let nudge = Arc::new(Notify::new());
    let shutdown = ShutdownSignal::default();
    let task = tokio::spawn(run(
        store,
        client,
        config,
        nudge.clone(),
        shutdown.clone(),
    ));
    SchedulerHandle {
        nudge,
        shutdown,
        task,
    }
}

async fn run(
    store: Arc<PendingVoteStore>,
    client: SyncClient,
    config: ScheduleConfig,
    nudge: Arc<Notify>,
    shutdown: ShutdownSignal,
) {
    let debounce = Duration::from_millis(config.debounce_ms);
    let max_interval = Duration::from_millis(config.max_interval_ms);

    let mut activity = store.subscribe_activity();
    // Casts landing between spawn and this task's first poll must still
    // register, so the watermark starts at zero rather than the current
    // count. Journal-restored votes do not count as casts.
    let mut seen_casts = 0;
    // Deadlines are scheduler-local; the debounce slot doubles as the
    // minimum spacing between timer-driven flushes.
    let mut debounce_at: Option<Instant> = None;
    let mut interval_at: Option<Instant> = None;
    // Set when a flush cycle leaves every vote it carried still buffered.
    // A parked buffer keeps the size trigger quiet until new casts arrive
    // or a timer sweeps it, so a failing endpoint is retried on the
    // interval cadence rather than back to back.
    let mut parked = false;

    debug!(
        debounce_ms = config.debounce_ms,
        max_interval_ms = config.max_interval_ms,
        max_batch_size = config.max_batch_size,
        "flush scheduler started"
    );

    loop {
        // Settle timers against the current store state. This also picks up
        // casts and requeues that happened while a flush was running.
        let current = *activity.borrow_and_update();
        if current.casts > seen_casts {
            seen_casts = current.casts;
            parked = false;
            debounce_at = Some(Instant::now() + debounce);
            if interval_at.is_none() {
                // Armed when a vote enters a clean buffer; later casts do
                // not push it out.
                interval_at = Some(Instant::now() + max_interval);
            }
        }
        if current.pending > 0 && interval_at.is_none() {
            // Votes requeued by a failed flush re-arm the interval even
            // without new casts, so they are swept eventually.
            interval_at = Some(Instant::now() + max_interval);
        }

        // Size stands down once shutdown is signaled (teardown owns the
        // final flush) and while the buffer is parked.
        let size_due = current.buffered >= config.max_batch_size
            && current.pending > 0
            && !parked
            && !shutdown.is_signaled();
        let reason = if size_due {
            FlushReason::Size
        } else {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = nudge.notified() => FlushReason::Manual,
                changed = activity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = sleep_until(deadline_or_distant(debounce_at)), if debounce_at.is_some() => {
                    FlushReason::Debounce
                }
                _ = sleep_until(deadline_or_distant(interval_at)), if interval_at.is_some() => {
                    FlushReason::Interval
                }
            }
        };

        debounce_at = None;
        interval_at = None;

        if store.pending_count() == 0 {
            debug!(reason = reason.as_str(), "flush trigger with nothing to send");
            continue;
        }

        debug!(reason = reason.as_str(), "flush triggered");
        match client.flush().await {
            FlushOutcome::Synced {
                accepted,
                rejected,
                deferred,
            } => {
                // A response that resolved nothing leaves the buffer as
                // full as before; park it like a failed cycle.
                parked = accepted == 0 && rejected == 0;
                debug!(accepted, rejected, deferred, "flush completed");
            }
            FlushOutcome::Deferred => {
                parked = true;
                debug!("flush deferred, votes wait for the next cycle");
            }
            FlushOutcome::Idle => {}
        }
    }

    // Teardown: one final best-effort flush. Its outcome no longer matters;
    // anything unsent is in the journal for the next session.
    if store.pending_count() > 0 {
        debug!("final flush before scheduler teardown");
        let _ = client.flush().await;
    }
    info!("flush scheduler stopped");
}

/// select! evaluates every branch expression even when the guard is false,
/// so a disarmed deadline still needs a placeholder instant.
fn deadline_or_distant(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
}
