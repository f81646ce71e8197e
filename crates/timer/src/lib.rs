//! Restartable countdown timers.
//!
//! A [`Timer`] supervises one deadline: the listener's idle timeout, the
//! client's round-trip timeout or a connection's read timeout. The current
//! [`Phase`] is published through a `watch` channel so owners can
//! `tokio::select!` on [`Timer::expired`]. An optional tick callback reports
//! the remaining whole seconds once per [`TICK_PERIOD`] for display, and
//! receives `0` exactly once when a cycle expires.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Interval between tick callbacks.
pub const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Callback invoked with the remaining seconds of the running cycle.
///
/// Called with the timer lock held: it must not call back into the timer.
pub type TickFn = Box<dyn Fn(u64) + Send + Sync + 'static>;

/// A deadline governed by a [`Timer`] passed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{timer} timeout expired after {after:?}")]
pub struct TimeoutExpired {
    pub timer: &'static str,
    pub after: Duration,
}

/// Observable state of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not counting down.
    Stopped,
    /// Counting down; `cycle` identifies the current countdown.
    Running { cycle: u64 },
    /// The countdown identified by `cycle` reached its deadline.
    Expired { cycle: u64 },
}

/// A restartable countdown.
///
/// Every [`start`](Self::start) begins a new cycle and invalidates the
/// previous one, so a reset racing a firing expiry resolves to exactly one of
/// "expired, then restarted" or "restarted, old expiry discarded". Dropping
/// the timer stops it.
pub struct Timer {
    inner: Arc<Inner>,
}

struct Inner {
    name: &'static str,
    on_tick: Option<TickFn>,
    phase: watch::Sender<Phase>,
    state: Mutex<State>,
}

struct State {
    interval: Duration,
    cycle: u64,
    cancel: Option<CancellationToken>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tick(&self, remaining: u64) {
        if let Some(on_tick) = &self.on_tick {
            on_tick(remaining);
        }
    }
}

impl Timer {
    /// Creates a stopped timer. A zero `interval` disables it.
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self::build(name, interval, None)
    }

    /// Creates a stopped timer that reports remaining seconds to `on_tick`.
    pub fn with_ticks(name: &'static str, interval: Duration, on_tick: TickFn) -> Self {
        Self::build(name, interval, Some(on_tick))
    }

    fn build(name: &'static str, interval: Duration, on_tick: Option<TickFn>) -> Self {
        let (phase, _) = watch::channel(Phase::Stopped);
        Self {
            inner: Arc::new(Inner {
                name,
                on_tick,
                phase,
                state: Mutex::new(State {
                    interval,
                    cycle: 0,
                    cancel: None,
                }),
            }),
        }
    }

    /// Starts a new countdown cycle, cancelling any pending one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.cycle += 1;

        if state.interval.is_zero() {
            self.inner.phase.send_replace(Phase::Stopped);
            return;
        }

        let cycle = state.cycle;
        let cancel = CancellationToken::new();
        state.cancel = Some(cancel.clone());
        self.inner.phase.send_replace(Phase::Running { cycle });

        let deadline = Instant::now() + state.interval;
        tokio::spawn(countdown(Arc::clone(&self.inner), cycle, deadline, cancel));
        tracing::trace!(timer = self.inner.name, cycle, "timer started");
    }

    /// Restarts the countdown from the full interval.
    pub fn reset(&self) {
        self.start();
    }

    /// Stops the timer. No tick or expiry fires until the next `start`.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        state.cycle += 1;
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
            tracing::trace!(timer = self.inner.name, "timer stopped");
        }
        self.inner.phase.send_replace(Phase::Stopped);
    }

    /// Changes the interval used by subsequent cycles.
    pub fn set_interval(&self, interval: Duration) {
        self.inner.lock().interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.inner.lock().interval
    }

    /// The error describing this timer's expiry.
    pub fn expiry(&self) -> TimeoutExpired {
        TimeoutExpired {
            timer: self.inner.name,
            after: self.interval(),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.inner.phase.borrow()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.phase(), Phase::Running { .. })
    }

    /// Resolves once the timer is in [`Phase::Expired`].
    ///
    /// Resolves immediately if the last cycle already expired and the timer
    /// was not restarted since.
    pub async fn expired(&self) {
        let mut rx = self.inner.phase.subscribe();
        if rx
            .wait_for(|phase| matches!(phase, Phase::Expired { .. }))
            .await
            .is_err()
        {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .finish()
    }
}

/// Drives one countdown cycle: periodic ticks, then expiry.
async fn countdown(inner: Arc<Inner>, cycle: u64, deadline: Instant, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let sleep = tokio::time::sleep_until(deadline);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut sleep => break,
            _ = ticker.tick() => {
                let state = inner.lock();
                if state.cycle != cycle {
                    return;
                }
                inner.tick(remaining_secs(deadline.saturating_duration_since(Instant::now())));
            }
        }
    }

    let state = inner.lock();
    if state.cycle != cycle {
        return;
    }
    let fired = inner.phase.send_if_modified(|phase| {
        if *phase == (Phase::Running { cycle }) {
            *phase = Phase::Expired { cycle };
            true
        } else {
            false
        }
    });
    if fired {
        tracing::debug!(timer = inner.name, cycle, "timer expired");
        inner.tick(0);
    }
}

/// Whole seconds left, rounded up so a running timer never reports 0.
fn remaining_secs(remaining: Duration) -> u64 {
    remaining.as_millis().div_ceil(1000) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<u64>>>, TickFn) {
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&ticks);
        (
            ticks,
            Box::new(move |remaining| sink.lock().unwrap().push(remaining)),
        )
    }

    #[tokio::test]
    async fn expires_after_interval() {
        let timer = Timer::new("test", Duration::from_millis(50));
        timer.start();
        assert!(timer.is_running());

        tokio::time::timeout(Duration::from_secs(1), timer.expired())
            .await
            .expect("timer should expire");
        assert!(matches!(timer.phase(), Phase::Expired { .. }));
    }

    #[tokio::test]
    async fn reset_postpones_expiry() {
        let timer = Timer::new("test", Duration::from_millis(200));
        timer.start();

        tokio::time::sleep(Duration::from_millis(120)).await;
        timer.reset();
        tokio::time::sleep(Duration::from_millis(120)).await;

        // 240ms since the first start, but only 120ms into the new cycle.
        assert!(timer.is_running());

        tokio::time::timeout(Duration::from_secs(1), timer.expired())
            .await
            .expect("reset cycle should still expire");
    }

    #[tokio::test]
    async fn stop_prevents_expiry() {
        let (ticks, on_tick) = recorder();
        let timer = Timer::with_ticks("test", Duration::from_millis(30), on_tick);
        timer.start();
        timer.stop();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(timer.phase(), Phase::Stopped);
        assert!(ticks.lock().unwrap().is_empty());

        let waited = tokio::time::timeout(Duration::from_millis(50), timer.expired()).await;
        assert!(waited.is_err(), "stopped timer must not report expiry");
    }

    #[tokio::test]
    async fn zero_interval_disables() {
        let timer = Timer::new("test", Duration::ZERO);
        timer.start();
        assert_eq!(timer.phase(), Phase::Stopped);

        let waited = tokio::time::timeout(Duration::from_millis(50), timer.expired()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn restart_after_expiry_begins_new_cycle() {
        let timer = Timer::new("test", Duration::from_millis(20));
        timer.start();
        timer.expired().await;
        let Phase::Expired { cycle: first } = timer.phase() else {
            panic!("expected expiry");
        };

        timer.start();
        assert_eq!(timer.phase(), Phase::Running { cycle: first + 1 });
        timer.expired().await;
        assert_eq!(timer.phase(), Phase::Expired { cycle: first + 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_report_remaining_seconds() {
        let (ticks, on_tick) = recorder();
        let timer = Timer::with_ticks("test", Duration::from_secs(3), on_tick);
        timer.start();

        tokio::time::sleep(Duration::from_millis(3500)).await;

        assert_eq!(*ticks.lock().unwrap(), vec![2, 1, 0]);
        assert!(matches!(timer.phase(), Phase::Expired { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_after_reset_is_discarded() {
        let (ticks, on_tick) = recorder();
        let timer = Timer::with_ticks("test", Duration::from_secs(2), on_tick);
        timer.start();
        let Phase::Running { cycle: old } = timer.phase() else {
            panic!("expected a running cycle");
        };

        // The old countdown reaches its deadline after the reset took the lock.
        timer.reset();
        countdown(
            Arc::clone(&timer.inner),
            old,
            Instant::now(),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(timer.phase(), Phase::Running { cycle: old + 1 });
        assert!(!ticks.lock().unwrap().contains(&0));

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(timer.phase(), Phase::Expired { cycle: old + 1 });
        assert_eq!(ticks.lock().unwrap().iter().filter(|t| **t == 0).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_at_deadline_instant_stays_consistent() {
        let (ticks, on_tick) = recorder();
        let timer = Timer::with_ticks("test", Duration::from_secs(1), on_tick);
        timer.start();

        tokio::time::sleep_until(Instant::now() + Duration::from_secs(1)).await;
        timer.reset();
        let Phase::Running { cycle } = timer.phase() else {
            panic!("reset must leave the timer running");
        };

        // Either the old cycle expired just before the reset or its expiry was
        // discarded; the new cycle is untouched in both cases.
        let zeros_before = ticks.lock().unwrap().iter().filter(|t| **t == 0).count();
        assert!(zeros_before <= 1);
        tokio::task::yield_now().await;
        assert_eq!(timer.phase(), Phase::Running { cycle });

        timer.expired().await;
        assert_eq!(timer.phase(), Phase::Expired { cycle });
        let zeros = ticks.lock().unwrap().iter().filter(|t| **t == 0).count();
        assert_eq!(zeros, zeros_before + 1);
    }

    #[tokio::test]
    async fn set_interval_applies_to_next_cycle() {
        let timer = Timer::new("test", Duration::from_secs(60));
        timer.set_interval(Duration::from_millis(10));
        assert_eq!(timer.interval(), Duration::from_millis(10));

        timer.start();
        tokio::time::timeout(Duration::from_secs(1), timer.expired())
            .await
            .expect("shortened interval should expire quickly");
    }

    #[test]
    fn expiry_error_names_timer() {
        let timer = Timer::new("socket", Duration::from_secs(10));
        let err = timer.expiry();
        assert_eq!(err.after, Duration::from_secs(10));
        assert_eq!(err.to_string(), "socket timeout expired after 10s");
    }

    #[test]
    fn remaining_rounds_up() {
        assert_eq!(remaining_secs(Duration::from_millis(1)), 1);
        assert_eq!(remaining_secs(Duration::from_millis(1000)), 1);
        assert_eq!(remaining_secs(Duration::from_millis(1001)), 2);
        assert_eq!(remaining_secs(Duration::ZERO), 0);
    }
}
