use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Monotonic counter shared between whoever retargets work and the work
/// itself. A result tagged with an old generation is stale.
#[derive(Debug, Clone, Default)]
pub struct GenerationToken(Arc<AtomicU64>);

impl GenerationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invalidates every generation handed out so far and returns the new one.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }
}

/// Shortest period a task runs at; a zero period is raised to this.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Stop,
}

/// A tick body run every `period` on the tokio runtime until cancelled.
///
/// Ticks never overlap: a slow tick delays the next one instead of queueing a
/// burst. An optional [`Notify`] runs a tick early and restarts the period.
/// Cancelling interrupts an in-flight tick at its next await point. Dropping
/// the task also stops it.
pub struct RepeatingTask {
    name: String,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

async fn woken(wake: &Option<Arc<Notify>>) {
    match wake {
        Some(notify) => notify.notified().await,
        None => std::future::pending::<()>().await,
    }
}

impl RepeatingTask {
    pub fn spawn<F, Fut>(
        name: impl Into<String>,
        period: Duration,
        initial_delay: Duration,
        wake: Option<Arc<Notify>>,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickOutcome> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(MIN_PERIOD);
        let (stop, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + initial_delay, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = interval.tick() => {}
                    _ = woken(&wake) => interval.reset(),
                }
                if *stop_rx.borrow() {
                    break;
                }

                let outcome = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    outcome = tick() => outcome,
                };
                if outcome == TickOutcome::Stop {
                    break;
                }
            }
            debug!(task = %task_name, "repeating task stopped");
        });

        Self {
            name,
            stop,
            handle: Some(handle),
        }
    }

    pub fn cancel(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |handle| handle.is_finished())
    }

    /// Cancels and waits up to `timeout` for the loop to exit, aborting it
    /// after that. Returns whether it exited on its own; a panicked loop
    /// counts as unclean.
    pub async fn join(mut self, timeout: Duration) -> bool {
        self.cancel();
        let Some(mut handle) = self.handle.take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => true,
            Ok(Err(join_err)) => {
                warn!(task = %self.name, error = %join_err, "repeating task ended abnormally");
                false
            }
            Err(_) => {
                warn!(task = %self.name, ?timeout, "repeating task did not stop in time, aborting");
                handle.abort();
                false
            }
        }
    }
}
