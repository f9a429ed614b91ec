//! Poller - periodically fetches from a data source on a single background task
//!
//! Fetches are single-flight: the next one is scheduled only after the previous
//! response resolved, so results arrive strictly in order and consumers never
//! merge two responses at once. Auto-refresh can be paused and resumed, and a
//! refresh can be forced at any time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use crate::client::ApiError;

const EVENT_BUFFER: usize = 16;

/// Something that can be fetched repeatedly.
#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn poll(&self) -> Result<Self::Output, ApiError>;
}

/// Result of one fetch.
#[derive(Debug)]
pub enum PollEvent<T> {
    Fetched(T),
    Failed(ApiError),
}

/// When to fetch after the initial one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    /// Delay between a response and the next fetch. Zero disables auto-refresh.
    pub interval: Duration,
    /// Whether auto-refresh starts enabled.
    pub auto_refresh: bool,
}

impl PollSchedule {
    pub fn new(interval: Duration, auto_refresh: bool) -> Self {
        Self {
            interval,
            auto_refresh: auto_refresh && !interval.is_zero(),
        }
    }
}

/// Controls a running poller. Dropping it stops the background task.
pub struct PollerHandle {
    auto_refresh: watch::Sender<bool>,
    refresh: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    interval: Duration,
}

pub struct Poller;

impl Poller {
    /// Spawn the polling task. The first fetch starts immediately.
    pub fn start<S: PollSource>(
        source: S,
        schedule: PollSchedule,
    ) -> (PollerHandle, mpsc::Receiver<PollEvent<S::Output>>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let (auto_tx, auto_rx) = watch::channel(schedule.auto_refresh);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let refresh = Arc::new(Notify::new());

        let task = tokio::spawn(run_poll_loop(
            source,
            schedule.interval,
            auto_rx,
            refresh.clone(),
            shutdown_rx,
            event_tx,
        ));

        let handle = PollerHandle {
            auto_refresh: auto_tx,
            refresh,
            shutdown: shutdown_tx,
            task,
            interval: schedule.interval,
        };
        (handle, event_rx)
    }
}

impl PollerHandle {
    pub fn is_auto_refresh(&self) -> bool {
        *self.auto_refresh.borrow()
    }

    /// Pause or resume auto-refresh. Returns the effective state, which stays
    /// off when the schedule has no interval.
    pub fn set_auto_refresh(&self, enabled: bool) -> bool {
        let enabled = enabled && !self.interval.is_zero();
        self.auto_refresh.send_replace(enabled);
        enabled
    }

    pub fn toggle_auto_refresh(&self) -> bool {
        self.set_auto_refresh(!self.is_auto_refresh())
    }

    /// Fetch as soon as the in-flight fetch (if any) completes.
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// Stop the timer and wait for the task to exit. An in-flight fetch is
    /// abandoned.
    pub async fn stop(self) {
        let PollerHandle { shutdown, task, .. } = self;
        let _ = shutdown.send(true);
        if let Err(e) = task.await
            && e.is_panic()
        {
            tracing::warn!("poller task panicked");
        }
    }
}

async fn run_poll_loop<S: PollSource>(
    source: S,
    interval: Duration,
    mut auto_refresh: watch::Receiver<bool>,
    refresh: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    events: mpsc::Sender<PollEvent<S::Output>>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            result = source.poll() => match result {
                Ok(output) => PollEvent::Fetched(output),
                Err(e) => {
                    tracing::debug!(error = %e, "Poll failed");
                    PollEvent::Failed(e)
                }
            },
        };

        tokio::select! {
            _ = shutdown.changed() => break,
            sent = events.send(event) => {
                if sent.is_err() {
                    // Nobody is listening anymore.
                    break;
                }
            }
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            _ = refresh.notified() => {
                tracing::debug!("Manual refresh");
            }
            _ = next_tick(interval, &mut auto_refresh) => {}
        }
    }
}

/// Resolve after `interval` of uninterrupted auto-refresh. Pausing restarts the wait.
async fn next_tick(interval: Duration, auto_refresh: &mut watch::Receiver<bool>) {
    loop {
        let enabled = *auto_refresh.borrow_and_update();
        if enabled && !interval.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(interval) => return,
                changed = auto_refresh.changed() => {
                    if changed.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
            }
        } else if auto_refresh.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    /// Counts calls; every call listed in `fail_on` (1-based) errors.
    struct CountingSource {
        calls: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        max_in_flight: Arc<AtomicUsize>,
        delay: Duration,
        fail_on: Vec<usize>,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_in_flight: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail_on: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl PollSource for CountingSource {
        type Output = usize;

        async fn poll(&self) -> Result<usize, ApiError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.fail_on.contains(&call) {
                return Err(ApiError::Status {
                    url: "http://127.0.0.1/v1/requests/recent".to_string(),
                    status: 503,
                });
            }
            Ok(call)
        }
    }

    async fn next_value(rx: &mut mpsc::Receiver<PollEvent<usize>>) -> PollEvent<usize> {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for poll event")
            .expect("poller channel closed")
    }

    fn fetched(event: PollEvent<usize>) -> usize {
        match event {
            PollEvent::Fetched(n) => n,
            PollEvent::Failed(e) => panic!("unexpected failure: {e}"),
        }
    }

    #[test]
    fn zero_interval_schedule_disables_auto_refresh() {
        let schedule = PollSchedule::new(Duration::ZERO, true);
        assert!(!schedule.auto_refresh);
        assert!(PollSchedule::new(Duration::from_secs(5), true).auto_refresh);
    }

    #[tokio::test]
    async fn fetches_immediately_then_on_interval_in_order() {
        let (handle, mut rx) = Poller::start(
            CountingSource::new(),
            PollSchedule::new(Duration::from_millis(20), true),
        );

        for expected in 1..=3 {
            assert_eq!(fetched(next_value(&mut rx).await), expected);
        }
        handle.stop().await;
    }

    #[tokio::test]
    async fn manual_mode_fetches_once_until_refreshed() {
        let source = CountingSource::new();
        let calls = source.calls.clone();
        let (handle, mut rx) =
            Poller::start(source, PollSchedule::new(Duration::from_millis(10), false));

        assert_eq!(fetched(next_value(&mut rx).await), 1);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_err());

        handle.refresh_now();
        assert_eq!(fetched(next_value(&mut rx).await), 2);
        handle.stop().await;
    }

    #[tokio::test]
    async fn toggling_auto_refresh_pauses_and_resumes() {
        let source = CountingSource::new();
        let calls = source.calls.clone();
        let (handle, mut rx) =
            Poller::start(source, PollSchedule::new(Duration::from_millis(10), true));

        assert_eq!(fetched(next_value(&mut rx).await), 1);
        assert!(!handle.toggle_auto_refresh());
        assert!(!handle.is_auto_refresh());

        // Drain anything already in flight, then confirm polling stopped.
        tokio::time::sleep(Duration::from_millis(40)).await;
        while rx.try_recv().is_ok() {}
        let paused_at = calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(calls.load(Ordering::SeqCst), paused_at);

        assert!(handle.set_auto_refresh(true));
        let resumed = fetched(next_value(&mut rx).await);
        assert_eq!(resumed, paused_at + 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn failures_are_reported_and_polling_continues() {
        let mut source = CountingSource::new();
        source.fail_on = vec![2];
        let (handle, mut rx) =
            Poller::start(source, PollSchedule::new(Duration::from_millis(5), true));

        assert_eq!(fetched(next_value(&mut rx).await), 1);
        match next_value(&mut rx).await {
            PollEvent::Failed(ApiError::Status { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(fetched(next_value(&mut rx).await), 3);
        handle.stop().await;
    }

    #[tokio::test]
    async fn fetches_never_overlap() {
        let mut source = CountingSource::new();
        source.delay = Duration::from_millis(15);
        let max_in_flight = source.max_in_flight.clone();
        let (handle, mut rx) =
            Poller::start(source, PollSchedule::new(Duration::from_millis(1), true));

        for _ in 0..4 {
            handle.refresh_now();
            fetched(next_value(&mut rx).await);
        }
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        handle.stop().await;
    }

    #[tokio::test]
    async fn stop_returns_even_when_events_are_not_consumed() {
        let (handle, rx) = Poller::start(
            CountingSource::new(),
            PollSchedule::new(Duration::from_millis(1), true),
        );
        // Let the channel fill up.
        tokio::time::sleep(Duration::from_millis(60)).await;

        timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("stop should not hang");
        drop(rx);
    }

    #[tokio::test]
    async fn stop_abandons_slow_fetch() {
        let mut source = CountingSource::new();
        source.delay = Duration::from_secs(30);
        let (handle, _rx) =
            Poller::start(source, PollSchedule::new(Duration::from_secs(5), true));

        tokio::time::sleep(Duration::from_millis(20)).await;
        timeout(Duration::from_secs(2), handle.stop())
            .await
            .expect("stop should not wait for the fetch");
    }

    #[tokio::test]
    async fn zero_interval_cannot_enable_auto_refresh() {
        let (handle, mut rx) =
            Poller::start(CountingSource::new(), PollSchedule::new(Duration::ZERO, true));
        assert!(!handle.is_auto_refresh());
        assert!(!handle.set_auto_refresh(true));
        assert_eq!(fetched(next_value(&mut rx).await), 1);
        handle.stop().await;
    }
}
