// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Change notification sources.
//!
//! An [`EventSource`] turns low-level activity (a notification file being
//! touched, kubelet rewriting one of its state files, or a periodic timer
//! tick) into a stream of opaque [`ChangeEvent`]s. Delivery is best effort:
//! watch errors are logged and the interval timer acts as a safety net for
//! anything missed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{Result, RteError};

/// Kubelet state files whose rewrite means resource assignments moved.
const STATE_FILES: &[&str] = &[
    "cpu_manager_state",
    "memory_manager_state",
    "kubelet_internal_checkpoint",
    "dra_manager_state",
];

/// notify callback -> watch loop.
const RAW_QUEUE_CAPACITY: usize = 256;

/// watch loop -> consumer. Kept small: a slow consumer throttles the loop.
pub const EVENTS_CAPACITY: usize = 1;

/// Something changed. Carries no payload; every cause looks the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent;

/// Capability shared by the plain and the rate-limited event sources.
///
/// `add_file`, `add_dirs` and `set_interval` configure the source and must be
/// called before `run`. `run` spawns the watch loop and returns; `wait`
/// resolves once the loop exits, which does not happen in normal operation.
#[async_trait]
pub trait EventSource: Send {
    fn add_file(&mut self, path: &Path) -> Result<()>;

    fn add_dirs(&mut self, dirs: &[PathBuf]) -> Result<()>;

    fn set_interval(&mut self, interval: Duration) -> Result<()>;

    /// Take the event stream. Can only be taken once.
    fn events(&mut self) -> Result<mpsc::Receiver<ChangeEvent>>;

    fn run(&mut self) -> Result<()>;

    async fn wait(&mut self);

    /// Release watch handles and stop the loop.
    fn close(&mut self);
}

#[derive(Debug, Clone, Default)]
struct EventFilter {
    files: HashSet<PathBuf>,
    dirs: HashSet<PathBuf>,
}

impl EventFilter {
    fn matches(&self, event: &notify::Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        event.paths.iter().any(|path| {
            if self.files.contains(path) {
                return true;
            }
            let in_state_dir = path.parent().is_some_and(|dir| self.dirs.contains(dir));
            let is_state_file = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| STATE_FILES.contains(&name));
            in_state_dir && is_state_file
        })
    }
}

/// Event source with no admission control: every qualifying filesystem event
/// and every timer tick is forwarded.
pub struct UnlimitedEventSource {
    watcher: Option<RecommendedWatcher>,
    #[cfg(test)]
    raw_tx: mpsc::Sender<notify::Result<notify::Event>>,
    raw_rx: Option<mpsc::Receiver<notify::Result<notify::Event>>>,
    events_tx: Option<mpsc::Sender<ChangeEvent>>,
    events_rx: Option<mpsc::Receiver<ChangeEvent>>,
    filter: EventFilter,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl UnlimitedEventSource {
    pub fn new() -> Result<Self> {
        let (raw_tx, raw_rx) = mpsc::channel(RAW_QUEUE_CAPACITY);
        let callback_tx = raw_tx.clone();
        let watcher = notify::recommended_watcher(move |res| {
            // Dropping on overflow is fine, the interval tick catches up.
            if callback_tx.try_send(res).is_err() {
                debug!("raw watch queue full, dropping filesystem event");
            }
        })?;
        let (events_tx, events_rx) = mpsc::channel(EVENTS_CAPACITY);

        Ok(Self {
            watcher: Some(watcher),
            #[cfg(test)]
            raw_tx,
            raw_rx: Some(raw_rx),
            events_tx: Some(events_tx),
            events_rx: Some(events_rx),
            filter: EventFilter::default(),
            interval: Duration::ZERO,
            task: None,
        })
    }

    fn ensure_not_running(&self) -> Result<()> {
        if self.task.is_some() {
            return Err(RteError::AlreadyRunning);
        }
        Ok(())
    }

    fn watch_dir(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(RteError::InvalidWatchPath {
                path: dir.to_path_buf(),
                reason: "not an existing directory".to_string(),
            });
        }
        let watcher = self.watcher.as_mut().ok_or(RteError::InvalidWatchPath {
            path: dir.to_path_buf(),
            reason: "event source is closed".to_string(),
        })?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| RteError::InvalidWatchPath {
                path: dir.to_path_buf(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl EventSource for UnlimitedEventSource {
    /// Watch a single notification file. The file itself may not exist yet,
    /// so its parent directory is watched. An empty path is a no-op.
    fn add_file(&mut self, path: &Path) -> Result<()> {
        self.ensure_not_running()?;
        if path.as_os_str().is_empty() {
            return Ok(());
        }
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.watch_dir(&dir)?;
        self.filter.files.insert(path.to_path_buf());
        info!(file = %path.display(), "watching notification file");
        Ok(())
    }

    fn add_dirs(&mut self, dirs: &[PathBuf]) -> Result<()> {
        self.ensure_not_running()?;
        for dir in dirs {
            self.watch_dir(dir)?;
            self.filter.dirs.insert(dir.clone());
            info!(dir = %dir.display(), "watching state directory");
        }
        Ok(())
    }

    /// Zero disables the timer.
    fn set_interval(&mut self, interval: Duration) -> Result<()> {
        self.ensure_not_running()?;
        self.interval = interval;
        Ok(())
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ChangeEvent>> {
        self.events_rx.take().ok_or(RteError::EventsTaken)
    }

    fn run(&mut self) -> Result<()> {
        self.ensure_not_running()?;
        let raw_rx = self.raw_rx.take().ok_or(RteError::AlreadyRunning)?;
        let events_tx = self.events_tx.take().ok_or(RteError::AlreadyRunning)?;
        let filter = self.filter.clone();
        let interval = self.interval;
        self.task = Some(tokio::spawn(watch_loop(raw_rx, events_tx, filter, interval)));
        Ok(())
    }

    async fn wait(&mut self) {
        if let Some(task) = self.task.as_mut()
            && let Err(e) = task.await
            && !e.is_cancelled()
        {
            warn!(error = %e, "event source loop terminated abnormally");
        }
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.watcher = None;
    }
}

async fn watch_loop(
    mut raw_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    events_tx: mpsc::Sender<ChangeEvent>,
    filter: EventFilter,
    interval: Duration,
) {
    let mut ticker = (!interval.is_zero()).then(|| new_ticker(interval));
    let mut raw_open = true;
    info!(interval_ms = interval.as_millis() as u64, "event source started");

    loop {
        let event = tokio::select! {
            raw = raw_rx.recv(), if raw_open => match raw {
                Some(Ok(event)) => {
                    if !filter.matches(&event) {
                        continue;
                    }
                    debug!(kind = ?event.kind, paths = ?event.paths, "filesystem change");
                    ChangeEvent
                }
                Some(Err(e)) => {
                    warn!(error = %e, "filesystem watch error");
                    continue;
                }
                None => {
                    debug!("filesystem watcher gone, continuing on timer only");
                    raw_open = false;
                    continue;
                }
            },
            _ = next_tick(&mut ticker) => {
                debug!("timer tick");
                ChangeEvent
            }
        };

        if events_tx.send(event).await.is_err() {
            info!("event consumer gone, stopping event source");
            break;
        }
    }
}

/// First tick fires one full interval after start.
fn new_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind, RemoveKind};
    use tokio::time::timeout;

    impl UnlimitedEventSource {
        fn inject_raw_event_for_tests(&self, event: notify::Event) {
            self.raw_tx.try_send(Ok(event)).unwrap();
        }
    }

    fn filter_for(files: &[&str], dirs: &[&str]) -> EventFilter {
        EventFilter {
            files: files.iter().map(PathBuf::from).collect(),
            dirs: dirs.iter().map(PathBuf::from).collect(),
        }
    }

    fn event(kind: EventKind, path: &str) -> notify::Event {
        notify::Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_filter_notify_file() {
        let filter = filter_for(&["/run/rte/notify"], &[]);
        assert!(filter.matches(&event(
            EventKind::Create(CreateKind::File),
            "/run/rte/notify"
        )));
        assert!(filter.matches(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            "/run/rte/notify"
        )));
        assert!(!filter.matches(&event(
            EventKind::Create(CreateKind::File),
            "/run/rte/other"
        )));
    }

    #[test]
    fn test_filter_state_dirs() {
        let filter = filter_for(&[], &["/var/lib/kubelet"]);
        assert!(filter.matches(&event(
            EventKind::Modify(ModifyKind::Any),
            "/var/lib/kubelet/cpu_manager_state"
        )));
        assert!(filter.matches(&event(
            EventKind::Create(CreateKind::Any),
            "/var/lib/kubelet/memory_manager_state"
        )));
        assert!(!filter.matches(&event(
            EventKind::Modify(ModifyKind::Any),
            "/var/lib/kubelet/kubeconfig"
        )));
        assert!(!filter.matches(&event(
            EventKind::Modify(ModifyKind::Any),
            "/elsewhere/cpu_manager_state"
        )));
    }

    #[test]
    fn test_filter_ignores_access_and_remove() {
        let filter = filter_for(&["/run/rte/notify"], &["/var/lib/kubelet"]);
        assert!(!filter.matches(&event(
            EventKind::Access(AccessKind::Any),
            "/run/rte/notify"
        )));
        assert!(!filter.matches(&event(
            EventKind::Remove(RemoveKind::File),
            "/var/lib/kubelet/cpu_manager_state"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_event_per_interval() {
        let period = Duration::from_secs(10);
        let mut es = UnlimitedEventSource::new().unwrap();
        es.set_interval(period).unwrap();
        let mut events = es.events().unwrap();
        let start = Instant::now();
        es.run().unwrap();

        events.recv().await.unwrap();
        assert_eq!(start.elapsed(), period);
        events.recv().await.unwrap();
        assert_eq!(start.elapsed(), period * 2);

        // Nothing else shows up before the third tick.
        let early = timeout(period - Duration::from_millis(1), events.recv()).await;
        assert!(early.is_err(), "no event expected between ticks");
        es.close();
    }

    #[tokio::test]
    async fn test_injected_filesystem_events() {
        let dir = tempfile::tempdir().unwrap();
        let notify_file = dir.path().join("notify");

        let mut es = UnlimitedEventSource::new().unwrap();
        es.add_file(&notify_file).unwrap();
        es.add_dirs(&[dir.path().to_path_buf()]).unwrap();
        let mut events = es.events().unwrap();
        es.run().unwrap();

        es.inject_raw_event_for_tests(event(
            EventKind::Access(AccessKind::Any),
            notify_file.to_str().unwrap(),
        ));
        es.inject_raw_event_for_tests(event(
            EventKind::Modify(ModifyKind::Any),
            dir.path().join("cpu_manager_state").to_str().unwrap(),
        ));

        let got = timeout(Duration::from_secs(1), events.recv()).await;
        assert!(got.unwrap().is_some());
        let extra = timeout(Duration::from_millis(100), events.recv()).await;
        assert!(extra.is_err(), "access event must be filtered out");
        es.close();
    }

    #[tokio::test]
    async fn test_watch_error_does_not_stop_loop() {
        let dir = tempfile::tempdir().unwrap();
        let notify_file = dir.path().join("notify");
        let mut es = UnlimitedEventSource::new().unwrap();
        es.add_file(&notify_file).unwrap();
        let mut events = es.events().unwrap();
        es.run().unwrap();

        es.raw_tx
            .try_send(Err(notify::Error::generic("inotify overflow")))
            .unwrap();
        es.inject_raw_event_for_tests(event(
            EventKind::Create(CreateKind::File),
            notify_file.to_str().unwrap(),
        ));

        let got = timeout(Duration::from_secs(1), events.recv()).await;
        assert!(got.unwrap().is_some());
        es.close();
    }

    #[tokio::test]
    async fn test_invalid_paths_rejected() {
        let mut es = UnlimitedEventSource::new().unwrap();
        let err = es
            .add_dirs(&[PathBuf::from("/nonexistent/kubelet/state")])
            .unwrap_err();
        assert!(matches!(err, RteError::InvalidWatchPath { .. }));

        let err = es
            .add_file(Path::new("/nonexistent/dir/notify"))
            .unwrap_err();
        assert!(matches!(err, RteError::InvalidWatchPath { .. }));

        es.add_file(Path::new("")).unwrap();
    }

    #[tokio::test]
    async fn test_configuration_after_run_rejected() {
        let mut es = UnlimitedEventSource::new().unwrap();
        let _events = es.events().unwrap();
        es.run().unwrap();

        assert!(matches!(
            es.set_interval(Duration::from_secs(1)),
            Err(RteError::AlreadyRunning)
        ));
        assert!(matches!(es.run(), Err(RteError::AlreadyRunning)));
        assert!(matches!(es.events(), Err(RteError::EventsTaken)));
        es.close();
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let mut es = UnlimitedEventSource::new().unwrap();
        let mut events = es.events().unwrap();
        es.run().unwrap();
        es.close();
        let got = timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert!(got.is_none());
    }
}
