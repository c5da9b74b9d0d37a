//! The timer-driven batcher: coalesces buffered entries into pushes,
//! retries under exponential backoff, and exposes `flush`/reconfigure
//! (spec.md §4.5).
//!
//! Runs as its own `tokio` task rather than the teacher's hand-rolled
//! `Future::poll` state machine (see DESIGN.md) — the spec's dispatcher has
//! more independently-arriving inputs (timer ticks, `flush`, reconfigure,
//! shutdown) than the teacher's single send queue, and a `tokio::select!`
//! loop expresses that more directly than a bespoke poll implementation.

use crate::buffer::Buffer;
use crate::config::HandlerConfig;
use crate::error::Error;
use crate::loki_client::LokiClient;
use crate::no_subscriber::NoSubscriber;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use url::Url;

/// Snapshot of the backoff-relevant parameters, copied in at start and
/// replaced wholesale on reconfigure (spec.md §3 `DispatcherState`).
#[derive(Debug, Clone, Copy)]
pub struct DispatcherParams {
    /// Max entries per push.
    pub batch_size: usize,
    /// Timer interval absent any failures, milliseconds.
    pub batch_interval_ms: u64,
    /// Backoff base, milliseconds.
    pub backoff_base_ms: u64,
    /// Backoff cap, milliseconds.
    pub backoff_max_ms: u64,
}

impl From<&HandlerConfig> for DispatcherParams {
    fn from(cfg: &HandlerConfig) -> Self {
        DispatcherParams {
            batch_size: cfg.batch_size,
            batch_interval_ms: cfg.batch_interval_ms,
            backoff_base_ms: cfg.backoff_base_ms,
            backoff_max_ms: cfg.backoff_max_ms,
        }
    }
}

/// Observable dispatcher state (spec.md §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherState {
    /// Non-negative; reset to 0 on any successful push.
    pub consecutive_failures: u32,
}

/// The exponent cap preventing overflow on long outages (spec.md §4.5).
const MAX_BACKOFF_EXPONENT: u32 = 10;

/// Compute the next wake-up interval given the current failure streak.
pub fn next_interval(consecutive_failures: u32, params: &DispatcherParams) -> Duration {
    if consecutive_failures == 0 {
        return Duration::from_millis(params.batch_interval_ms);
    }
    let exponent = (consecutive_failures - 1).min(MAX_BACKOFF_EXPONENT);
    let scaled = params.backoff_base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(cmp::min(scaled, params.backoff_max_ms))
}

enum Control {
    Flush(oneshot::Sender<Result<(), Error>>),
    Reconfigure(DispatcherParams),
    GetState(oneshot::Sender<DispatcherState>),
    Shutdown(oneshot::Sender<()>),
}

/// A handle to a running dispatcher task. Dropping it leaves the task
/// running; call [`DispatcherHandle::shutdown`] to tear it down.
pub struct DispatcherHandle {
    control: mpsc::Sender<Control>,
    task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DispatcherHandle {
    /// Spawn a dispatcher driving `buffer` against `loki_url` through
    /// `client`, on its own `tokio` task.
    pub fn spawn(
        buffer: Arc<dyn Buffer>,
        client: Arc<LokiClient>,
        loki_url: Url,
        params: DispatcherParams,
    ) -> DispatcherHandle {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(run(buffer, client, loki_url, params, rx));
        DispatcherHandle { control: tx, task: parking_lot::Mutex::new(Some(task)) }
    }

    /// Block the caller until one push attempt resolves (spec.md §4.5
    /// `flush`). Does not reset or reschedule the timer.
    pub async fn flush(&self) -> Result<(), Error> {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Flush(tx)).await.is_err() {
            return Err(Error::UnknownHandler("dispatcher task is gone".into()));
        }
        rx.await.unwrap_or_else(|_| Err(Error::UnknownHandler("dispatcher task is gone".into())))
    }

    /// Replace the backoff/batch parameters the next tick will use.
    pub async fn reconfigure(&self, params: DispatcherParams) {
        let _ = self.control.send(Control::Reconfigure(params)).await;
    }

    /// Fetch the live dispatcher state (spec.md §4.5 `get_state`),
    /// serialized against the timer tick like `flush` and `reconfigure`.
    pub async fn get_state(&self) -> DispatcherState {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::GetState(tx)).await.is_err() {
            return DispatcherState::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Cancel the next scheduled wake-up and stop the task. Waits for an
    /// in-flight push to finish. Idempotent and callable through a shared
    /// reference, so it's safe to call even while other `Arc`s to the
    /// owning handler are alive (spec.md §4.6: detach tears the pair down
    /// even if a producer's `store` call is still in flight).
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run(
    buffer: Arc<dyn Buffer>,
    client: Arc<LokiClient>,
    loki_url: Url,
    mut params: DispatcherParams,
    mut control: mpsc::Receiver<Control>,
) {
    let mut consecutive_failures: u32 = 0;
    let mut deadline = Instant::now() + Duration::from_millis(params.batch_interval_ms);
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            () = &mut sleep => {
                tick(&buffer, &client, &loki_url, params.batch_size, &mut consecutive_failures).await;
                let wait = next_interval(consecutive_failures, &params);
                deadline = Instant::now() + wait;
                sleep.as_mut().reset(deadline);
            }
            maybe_ctrl = control.recv() => {
                match maybe_ctrl {
                    Some(Control::Flush(reply)) => {
                        let result = flush_once(&buffer, &client, &loki_url, params.max_flush_limit(), &mut consecutive_failures).await;
                        let _ = reply.send(result);
                    }
                    Some(Control::Reconfigure(new_params)) => {
                        params = new_params;
                    }
                    Some(Control::GetState(reply)) => {
                        let _ = reply.send(DispatcherState { consecutive_failures });
                    }
                    Some(Control::Shutdown(reply)) => {
                        let _ = reply.send(());
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

impl DispatcherParams {
    /// `flush`'s fetch limit: large enough to drain a full buffer in one
    /// push attempt (spec.md §4.5: "≥ max_buffer_size, e.g. 10 000").
    fn max_flush_limit(&self) -> usize {
        self.batch_size.max(10_000)
    }
}

async fn tick(
    buffer: &Arc<dyn Buffer>,
    client: &LokiClient,
    loki_url: &Url,
    batch_size: usize,
    consecutive_failures: &mut u32,
) {
    if buffer.count() == 0 {
        return;
    }
    let _ = attempt_push(buffer, client, loki_url, batch_size, consecutive_failures).await;
}

async fn flush_once(
    buffer: &Arc<dyn Buffer>,
    client: &LokiClient,
    loki_url: &Url,
    limit: usize,
    consecutive_failures: &mut u32,
) -> Result<(), Error> {
    if buffer.count() == 0 {
        return Ok(());
    }
    attempt_push(buffer, client, loki_url, limit, consecutive_failures).await
}

/// Fetch a batch, push it, and reconcile buffer state with the outcome.
/// Shared by both the timer tick and `flush` (spec.md §4.5 steps 2-3).
///
/// The synchronous [`Buffer`] calls are wrapped in a [`NoSubscriber`]
/// guard, each scoped to one call so it never spans an `.await` (holding
/// a `tracing` default guard across a suspension point is unsound on a
/// multi-threaded runtime: the task can resume on a different OS thread,
/// leaving the override stuck on the original one). This is defensive
/// against a third-party [`Buffer`] implementation instrumenting its own
/// `fetch_batch`/`delete_up_to` with `tracing` calls a [`crate::layer::LokiLayer`]
/// on the same handler would otherwise recapture.
async fn attempt_push(
    buffer: &Arc<dyn Buffer>,
    client: &LokiClient,
    loki_url: &Url,
    limit: usize,
    consecutive_failures: &mut u32,
) -> Result<(), Error> {
    let batch = {
        let _guard = tracing::subscriber::set_default(NoSubscriber::default());
        buffer.fetch_batch(limit)
    };
    let entries: Vec<_> = batch.iter().map(|(_, e)| e.clone()).collect();
    match client.push(loki_url, &entries).await {
        Ok(()) => {
            if let Some((max_key, _)) = batch.last() {
                let _guard = tracing::subscriber::set_default(NoSubscriber::default());
                buffer.delete_up_to(*max_key);
            }
            *consecutive_failures = 0;
            Ok(())
        }
        Err(e) => {
            *consecutive_failures += 1;
            log_push_failure(*consecutive_failures, &e);
            Err(e)
        }
    }
}

/// Log a delivery failure (spec.md §7: "errors ... are logged to a
/// non-Loki sink"). No subscriber override here: this call must reach
/// the real ambient subscriber, not [`NoSubscriber`] — installing the
/// no-op guard around this statement would silently drop the event,
/// which is exactly the bug this function used to have.
fn log_push_failure(consecutive_failures: u32, error: &Error) {
    tracing::error!(consecutive_failures, %error, "couldn't push logs to loki");
}

#[cfg(test)]
mod test {
    use super::*;

    fn params() -> DispatcherParams {
        DispatcherParams {
            batch_size: 100,
            batch_interval_ms: 5_000,
            backoff_base_ms: 100,
            backoff_max_ms: 1_000,
        }
    }

    #[test]
    fn zero_failures_uses_batch_interval() {
        assert_eq!(next_interval(0, &params()), Duration::from_millis(5_000));
    }

    #[test]
    fn backoff_progression_caps_at_backoff_max() {
        // spec.md §8 scenario 4: base=100, max=1000, 5 failures -> 1000ms.
        assert_eq!(next_interval(5, &params()), Duration::from_millis(1_000));
    }

    #[test]
    fn backoff_doubles_per_failure_before_cap() {
        let p = DispatcherParams { backoff_base_ms: 100, backoff_max_ms: 60_000, ..params() };
        assert_eq!(next_interval(1, &p), Duration::from_millis(100));
        assert_eq!(next_interval(2, &p), Duration::from_millis(200));
        assert_eq!(next_interval(3, &p), Duration::from_millis(400));
    }

    #[test]
    fn exponent_caps_at_ten_to_avoid_overflow() {
        let p = DispatcherParams { backoff_base_ms: 1, backoff_max_ms: u64::MAX, ..params() };
        assert_eq!(next_interval(100, &p), next_interval(11, &p));
    }
}
