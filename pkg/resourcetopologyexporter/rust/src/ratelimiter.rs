// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Fixed-window rate limiting over an [`EventSource`].
//!
//! At most `max_events` events are forwarded per `time_unit`; the rest of a
//! burst is dropped rather than queued. Every admitted event triggers a full
//! recomputation downstream, so dropping intermediate triggers loses nothing
//! as long as a later event gets through. The interval timer of the wrapped
//! source guarantees one does, provided its interval is not longer than the
//! window.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, RteError};
use crate::notification::{ChangeEvent, EVENTS_CAPACITY, EventSource};

/// Admission state for one window. Only the limiter loop touches it.
#[derive(Debug)]
struct FixedWindow {
    max_events: u64,
    time_unit: Duration,
    count: u64,
    window_start: Option<Instant>,
}

impl FixedWindow {
    fn new(max_events: u64, time_unit: Duration) -> Self {
        Self {
            max_events,
            time_unit,
            count: 0,
            window_start: None,
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.time_unit => {}
            _ => {
                self.window_start = Some(now);
                self.count = 0;
            }
        }
        if self.count < self.max_events {
            self.count += 1;
            true
        } else {
            false
        }
    }
}

pub struct RateLimitedEventSource<S> {
    inner: S,
    max_events: u64,
    time_unit: Duration,
    events_tx: Option<mpsc::Sender<ChangeEvent>>,
    events_rx: Option<mpsc::Receiver<ChangeEvent>>,
    task: Option<JoinHandle<()>>,
}

impl<S: EventSource> RateLimitedEventSource<S> {
    pub fn new(inner: S, max_events: u64, time_unit: Duration) -> Result<Self> {
        if max_events == 0 {
            return Err(RteError::InvalidRateLimit(
                "max events per time unit must be positive".to_string(),
            ));
        }
        if time_unit.is_zero() {
            return Err(RteError::InvalidRateLimit(
                "time unit must be positive".to_string(),
            ));
        }
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CAPACITY);
        Ok(Self {
            inner,
            max_events,
            time_unit,
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
            task: None,
        })
    }
}

#[async_trait]
impl<S: EventSource> EventSource for RateLimitedEventSource<S> {
    fn add_file(&mut self, path: &Path) -> Result<()> {
        self.inner.add_file(path)
    }

    fn add_dirs(&mut self, dirs: &[PathBuf]) -> Result<()> {
        self.inner.add_dirs(dirs)
    }

    fn set_interval(&mut self, interval: Duration) -> Result<()> {
        if interval > self.time_unit {
            warn!(
                interval_ms = interval.as_millis() as u64,
                window_ms = self.time_unit.as_millis() as u64,
                "timer interval exceeds the rate limit window, dropped bursts may stay uncorrected until the next tick"
            );
        }
        self.inner.set_interval(interval)
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ChangeEvent>> {
        self.events_rx.take().ok_or(RteError::EventsTaken)
    }

    fn run(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Err(RteError::AlreadyRunning);
        }
        let inner_events = self.inner.events()?;
        let events_tx = self.events_tx.take().ok_or(RteError::AlreadyRunning)?;
        self.inner.run()?;

        let window = FixedWindow::new(self.max_events, self.time_unit);
        self.task = Some(tokio::spawn(limit_loop(inner_events, events_tx, window)));
        info!(
            max_events = self.max_events,
            time_unit_ms = self.time_unit.as_millis() as u64,
            "rate limited event source started"
        );
        Ok(())
    }

    async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "rate limiter loop terminated abnormally");
        }
        self.inner.wait().await;
    }

    fn close(&mut self) {
        self.inner.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn limit_loop(
    mut inner_events: mpsc::Receiver<ChangeEvent>,
    events_tx: mpsc::Sender<ChangeEvent>,
    mut window: FixedWindow,
) {
    while let Some(event) = inner_events.recv().await {
        if !window.admit(Instant::now()) {
            debug!(
                admitted = window.count,
                "rate limit reached, dropping event"
            );
            continue;
        }
        if events_tx.send(event).await.is_err() {
            info!("event consumer gone, stopping rate limiter");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    /// Source fed by the test through a sender.
    struct ManualEventSource {
        events_rx: Option<mpsc::Receiver<ChangeEvent>>,
        interval: Duration,
        running: bool,
    }

    impl ManualEventSource {
        fn new() -> (Self, mpsc::Sender<ChangeEvent>) {
            let (tx, rx) = mpsc::channel(64);
            (
                Self {
                    events_rx: Some(rx),
                    interval: Duration::ZERO,
                    running: false,
                },
                tx,
            )
        }
    }

    #[async_trait]
    impl EventSource for ManualEventSource {
        fn add_file(&mut self, _path: &Path) -> Result<()> {
            Ok(())
        }

        fn add_dirs(&mut self, _dirs: &[PathBuf]) -> Result<()> {
            Ok(())
        }

        fn set_interval(&mut self, interval: Duration) -> Result<()> {
            self.interval = interval;
            Ok(())
        }

        fn events(&mut self) -> Result<mpsc::Receiver<ChangeEvent>> {
            self.events_rx.take().ok_or(RteError::EventsTaken)
        }

        fn run(&mut self) -> Result<()> {
            self.running = true;
            Ok(())
        }

        async fn wait(&mut self) {}

        fn close(&mut self) {
            self.running = false;
        }
    }

    async fn drain(events: &mut mpsc::Receiver<ChangeEvent>) -> usize {
        let mut count = 0;
        while let Ok(Some(_)) = timeout(Duration::from_millis(10), events.recv()).await {
            count += 1;
        }
        count
    }

    #[test]
    fn test_fixed_window_admission() {
        let start = Instant::now();
        let mut window = FixedWindow::new(2, Duration::from_secs(1));
        assert!(window.admit(start));
        assert!(window.admit(start + Duration::from_millis(100)));
        assert!(!window.admit(start + Duration::from_millis(200)));
        assert!(!window.admit(start + Duration::from_millis(999)));
        // window elapsed: counters reset
        assert!(window.admit(start + Duration::from_secs(1)));
        assert!(window.admit(start + Duration::from_millis(1500)));
        assert!(!window.admit(start + Duration::from_millis(1600)));
    }

    #[test]
    fn test_invalid_parameters() {
        let (source, _tx) = ManualEventSource::new();
        assert!(matches!(
            RateLimitedEventSource::new(source, 0, Duration::from_secs(1)),
            Err(RteError::InvalidRateLimit(_))
        ));
        let (source, _tx) = ManualEventSource::new();
        assert!(matches!(
            RateLimitedEventSource::new(source, 3, Duration::ZERO),
            Err(RteError::InvalidRateLimit(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_admits_max_and_drops_rest() {
        let max = 3;
        let dropped = 5;
        let window = Duration::from_secs(1);
        let (source, tx) = ManualEventSource::new();
        let mut limited = RateLimitedEventSource::new(source, max, window).unwrap();
        let mut events = limited.events().unwrap();
        limited.run().unwrap();

        for _ in 0..(max as usize + dropped) {
            tx.send(ChangeEvent).await.unwrap();
        }
        assert_eq!(drain(&mut events).await, max as usize);

        // Past the window, the next event goes through regardless of drops.
        tokio::time::advance(window).await;
        tx.send(ChangeEvent).await.unwrap();
        let next = timeout(Duration::from_millis(10), events.recv()).await;
        assert!(next.unwrap().is_some());
        limited.close();
    }

    #[tokio::test]
    async fn test_delegates_configuration_and_lifecycle() {
        let (source, _tx) = ManualEventSource::new();
        let mut limited =
            RateLimitedEventSource::new(source, 1, Duration::from_secs(1)).unwrap();
        limited.set_interval(Duration::from_millis(500)).unwrap();
        assert_eq!(limited.inner.interval, Duration::from_millis(500));

        let _events = limited.events().unwrap();
        limited.run().unwrap();
        assert!(limited.inner.running);
        assert!(matches!(limited.run(), Err(RteError::AlreadyRunning)));

        limited.close();
        assert!(!limited.inner.running);
    }

    #[tokio::test]
    async fn test_stream_ends_when_inner_ends() {
        let (source, tx) = ManualEventSource::new();
        let mut limited =
            RateLimitedEventSource::new(source, 1, Duration::from_secs(1)).unwrap();
        let mut events = limited.events().unwrap();
        limited.run().unwrap();

        drop(tx);
        limited.wait().await;
        assert!(events.recv().await.is_none());
    }
}
