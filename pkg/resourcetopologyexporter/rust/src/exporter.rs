// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Pipeline assembly.
//!
//! Every fatal condition (watch paths, topology manager settings, sysfs,
//! readiness identity) is checked before the first task is spawned.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::error::{Result, RteError};
use crate::notification::{EventSource, UnlimitedEventSource};
use crate::nrtupdater::{self, NrtUpdater, TopologyClient};
use crate::observer::ResourceObserver;
use crate::podreadiness::{CONDITIONS_CAPACITY, ConditionInjector, PodIdent, PodStatusPatcher};
use crate::podres::{ContainerIdent, DEFAULT_SOCKET_PATH, PodResourcesLister, SharedCpusPoolLister};
use crate::ratelimiter::RateLimitedEventSource;
use crate::resourcemonitor::{self, ResourceMonitor};
use crate::tmsettings;

pub const DEFAULT_SLEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_EVENTS_PER_TIME_UNIT: u64 = 1;
pub const DEFAULT_TIME_UNIT_TO_LIMIT_EVENTS: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct Args {
    pub debug: bool,
    pub reference_container: Option<ContainerIdent>,
    pub topology_manager_policy: String,
    pub topology_manager_scope: String,
    pub kubelet_config_file: Option<PathBuf>,
    pub kubelet_state_dirs: Vec<PathBuf>,
    pub pod_resources_socket_path: PathBuf,
    /// Safety-net timer; zero disables it.
    pub sleep_interval: Duration,
    pub pod_readiness_enable: bool,
    pub notify_file_path: Option<PathBuf>,
    /// Rate limiting is off when either limit is zero.
    pub max_events_per_time_unit: u64,
    pub time_unit_to_limit_events: Duration,
    /// Pod patched with readiness conditions.
    pub pod_identity: Option<PodIdent>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            debug: false,
            reference_container: None,
            topology_manager_policy: String::new(),
            topology_manager_scope: String::new(),
            kubelet_config_file: None,
            kubelet_state_dirs: Vec::new(),
            pod_resources_socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            sleep_interval: DEFAULT_SLEEP_INTERVAL,
            pod_readiness_enable: false,
            notify_file_path: None,
            max_events_per_time_unit: DEFAULT_MAX_EVENTS_PER_TIME_UNIT,
            time_unit_to_limit_events: DEFAULT_TIME_UNIT_TO_LIMIT_EVENTS,
            pod_identity: None,
        }
    }
}

/// API clients the pipeline talks to.
pub struct Clients {
    pub pod_resources: Arc<dyn PodResourcesLister>,
    pub topology: Arc<dyn TopologyClient>,
    /// Required only with readiness gating.
    pub pod_status: Option<Arc<dyn PodStatusPatcher>>,
}

/// Configured, not yet running, event source. Rate limited unless either
/// limit is zero.
pub fn create_event_source(args: &Args) -> Result<Box<dyn EventSource>> {
    let mut source: Box<dyn EventSource> =
        if args.max_events_per_time_unit == 0 || args.time_unit_to_limit_events.is_zero() {
            info!("event rate limiting disabled");
            Box::new(UnlimitedEventSource::new()?)
        } else {
            info!(
                max_events = args.max_events_per_time_unit,
                time_unit_ms = args.time_unit_to_limit_events.as_millis() as u64,
                "event rate limiting enabled"
            );
            Box::new(RateLimitedEventSource::new(
                UnlimitedEventSource::new()?,
                args.max_events_per_time_unit,
                args.time_unit_to_limit_events,
            )?)
        };

    if let Some(path) = &args.notify_file_path {
        source.add_file(path)?;
    }
    source.add_dirs(&args.kubelet_state_dirs)?;
    source.set_interval(args.sleep_interval)?;
    Ok(source)
}

/// Run the pipeline until the updater returns (oneshot) or a stage stops.
/// A stage stopping on its own is an error.
pub async fn execute(
    clients: Clients,
    nrt_args: nrtupdater::Args,
    monitor_args: resourcemonitor::Args,
    rte_args: Args,
) -> Result<()> {
    let tm_config = tmsettings::resolve(
        &rte_args.topology_manager_policy,
        &rte_args.topology_manager_scope,
        rte_args.kubelet_config_file.as_deref(),
    )?;

    let lister: Arc<dyn PodResourcesLister> = match rte_args.reference_container.clone() {
        Some(reference) => {
            info!(reference = %reference, "shared cpu pool filtering enabled");
            Arc::new(SharedCpusPoolLister::new(clients.pod_resources, reference))
        }
        None => clients.pod_resources,
    };
    let monitor = ResourceMonitor::new(lister, monitor_args)?;

    let injector = if rte_args.pod_readiness_enable {
        Some(ConditionInjector::new(
            clients.pod_status,
            rte_args.pod_identity.clone(),
        )?)
    } else {
        None
    };

    let mut source = create_event_source(&rte_args)?;
    let events = source.events()?;

    let (conditions, injector_task) = match injector {
        Some(injector) => {
            let (tx, rx) = mpsc::channel(CONDITIONS_CAPACITY);
            (Some(tx), Some(injector.run(rx)))
        }
        None => (None, None),
    };

    let (observer, infos) = ResourceObserver::new(monitor);
    let updater = NrtUpdater::new(nrt_args, tm_config, clients.topology);
    let mut observer_task = tokio::spawn(observer.run(events, conditions.clone()));
    let mut updater_task = tokio::spawn(updater.run(infos, conditions));

    source.run()?;
    info!("resource topology exporter running");

    let (result, observer_done) = tokio::select! {
        // an observer failure outranks the updater's closed input
        biased;
        joined = &mut observer_task => match joined {
            // the updater either finished first or sees its input close
            Ok(()) => {
                warn!("resource observer stopped");
                (updater_result((&mut updater_task).await), true)
            }
            Err(e) => {
                error!(error = %e, "resource observer failed");
                (Err(task_failed("resource observer", e)), true)
            }
        },
        joined = &mut updater_task => (updater_result(joined), false),
    };

    source.close();
    updater_task.abort();
    if !observer_done {
        observer_task.abort();
        if let Err(e) = observer_task.await
            && e.is_panic()
        {
            warn!(error = %e, "resource observer panicked during shutdown");
        }
    }
    // drains pending conditions once every sender is gone
    if let Some(task) = injector_task {
        let _ = task.await;
    }
    result
}

fn task_failed(name: &'static str, e: JoinError) -> RteError {
    RteError::Task {
        name,
        reason: e.to_string(),
    }
}

fn updater_result(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.unwrap_or_else(|e| Err(task_failed("topology updater", e)))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_create_event_source() {
        let dir = TempDir::new().unwrap();
        let notify = dir.path().join("notify");
        fs::write(&notify, "").unwrap();

        let args = Args {
            notify_file_path: Some(notify),
            kubelet_state_dirs: vec![dir.path().to_path_buf()],
            ..Default::default()
        };
        let mut source = create_event_source(&args).unwrap();
        assert!(source.events().is_ok());
        assert!(matches!(source.events(), Err(RteError::EventsTaken)));

        let unlimited = Args {
            max_events_per_time_unit: 0,
            ..Default::default()
        };
        assert!(create_event_source(&unlimited).is_ok());
    }

    #[tokio::test]
    async fn test_create_event_source_rejects_missing_dir() {
        let dir = TempDir::new().unwrap();
        let args = Args {
            kubelet_state_dirs: vec![dir.path().join("missing")],
            ..Default::default()
        };
        assert!(matches!(
            create_event_source(&args),
            Err(RteError::InvalidWatchPath { .. })
        ));
    }
}
