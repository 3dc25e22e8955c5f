// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Command line and environment configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::error::{Result, RteError};
use crate::exporter;
use crate::nrtupdater;
use crate::podreadiness::PodIdent;
use crate::podres::{ContainerIdent, DEFAULT_SOCKET_PATH};
use crate::resourcemonitor::{self, CapacitySource, ExcludeList};
use crate::sysinfo::DEFAULT_SYSFS_ROOT;

/// Publish the NUMA resource topology of this node
#[derive(Parser, Debug, Clone)]
#[command(name = "resource-topology-exporter")]
#[command(version, about = "Publish the NUMA resource topology of this node")]
pub struct Cli {
    /// Debug logging and document dumps
    #[arg(long, env = "RTE_DEBUG")]
    pub debug: bool,

    /// Container holding the shared cpu pool, as namespace/pod/container
    #[arg(long, env = "REFERENCE_CONTAINER")]
    pub reference_container: Option<String>,

    /// Topology manager policy; read from the kubelet config when unset
    #[arg(long, env = "TOPOLOGY_MANAGER_POLICY", default_value = "")]
    pub topology_manager_policy: String,

    /// Topology manager scope; read from the kubelet config when unset
    #[arg(long, env = "TOPOLOGY_MANAGER_SCOPE", default_value = "")]
    pub topology_manager_scope: String,

    /// Kubelet configuration file
    #[arg(long, env = "KUBELET_CONFIG_FILE")]
    pub kubelet_config_file: Option<PathBuf>,

    /// Kubelet state directory to watch, may be repeated
    #[arg(long = "kubelet-state-dir")]
    pub kubelet_state_dirs: Vec<PathBuf>,

    /// Pod resources API socket
    #[arg(long = "podresources-socket", env = "PODRESOURCES_SOCKET", default_value = DEFAULT_SOCKET_PATH)]
    pub pod_resources_socket: PathBuf,

    /// Rescan interval in milliseconds, 0 disables the timer
    #[arg(long, default_value = "60000")]
    pub sleep_interval_ms: u64,

    /// Report progress as conditions on the exporter pod
    #[arg(long = "podreadiness", env = "PODREADINESS")]
    pub pod_readiness: bool,

    /// File whose modification triggers a rescan
    #[arg(long, env = "NOTIFY_FILE")]
    pub notify_file: Option<PathBuf>,

    /// Events admitted per time unit, 0 disables rate limiting
    #[arg(long = "max-events-per-timeunit", default_value = "1")]
    pub max_events_per_time_unit: u64,

    /// Rate limiting window in milliseconds, 0 disables rate limiting
    #[arg(long = "time-unit-to-limit-events-ms", default_value = "1000")]
    pub time_unit_to_limit_events_ms: u64,

    /// Node name; defaults to the hostname
    #[arg(long, env = "NODE_NAME")]
    pub node_name: Option<String>,

    /// Pod name of the exporter (downward API)
    #[arg(long, env = "POD_NAME")]
    pub pod_name: Option<String>,

    /// Pod namespace of the exporter (downward API)
    #[arg(long, env = "POD_NAMESPACE")]
    pub pod_namespace: Option<String>,

    /// Compute and log documents without publishing them
    #[arg(long)]
    pub no_publish: bool,

    /// Publish once and exit
    #[arg(long)]
    pub oneshot: bool,

    /// Only account pods in this namespace
    #[arg(long, default_value = "")]
    pub watch_namespace: String,

    /// Sysfs mount point
    #[arg(long, env = "SYSFS_ROOT", default_value = DEFAULT_SYSFS_ROOT)]
    pub sysfs: PathBuf,

    /// Query allocatable resources on every scan
    #[arg(long)]
    pub refresh_node_resources: bool,

    /// Publish a fingerprint of the accounted pods
    #[arg(long)]
    pub pods_fingerprint: bool,

    /// Resource to leave out, as node=resource or *=resource; may be repeated
    #[arg(long = "exclude")]
    pub exclude: Vec<String>,

    /// Report cpu and memory capacity from the host instead of allocatable
    #[arg(long)]
    pub capacity_from_host: bool,
}

/// Arguments for every pipeline stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub exporter: exporter::Args,
    pub updater: nrtupdater::Args,
    pub monitor: resourcemonitor::Args,
}

impl Cli {
    pub fn into_settings(self) -> Result<Settings> {
        let node_name = match self.node_name.filter(|n| !n.is_empty()) {
            Some(name) => name,
            None => hostname::get()
                .map_err(|e| RteError::NodeName(e.to_string()))?
                .into_string()
                .map_err(|raw| RteError::NodeName(format!("non utf-8 hostname {raw:?}")))?,
        };

        let reference_container = self
            .reference_container
            .filter(|r| !r.is_empty())
            .map(|r| r.parse::<ContainerIdent>())
            .transpose()?;

        let pod_identity = PodIdent::new(
            self.pod_namespace.as_deref().unwrap_or_default(),
            self.pod_name.as_deref().unwrap_or_default(),
        );

        let exporter = exporter::Args {
            debug: self.debug,
            reference_container,
            topology_manager_policy: self.topology_manager_policy,
            topology_manager_scope: self.topology_manager_scope,
            kubelet_config_file: self.kubelet_config_file.filter(|p| !p.as_os_str().is_empty()),
            kubelet_state_dirs: self.kubelet_state_dirs,
            pod_resources_socket_path: self.pod_resources_socket,
            sleep_interval: Duration::from_millis(self.sleep_interval_ms),
            pod_readiness_enable: self.pod_readiness,
            notify_file_path: self.notify_file.filter(|p| !p.as_os_str().is_empty()),
            max_events_per_time_unit: self.max_events_per_time_unit,
            time_unit_to_limit_events: Duration::from_millis(self.time_unit_to_limit_events_ms),
            pod_identity,
        };

        let updater = nrtupdater::Args {
            no_publish: self.no_publish,
            oneshot: self.oneshot,
            hostname: node_name.clone(),
            debug: self.debug,
        };

        let monitor = resourcemonitor::Args {
            node_name,
            namespace: self.watch_namespace,
            sysfs_root: self.sysfs,
            refresh_node_resources: self.refresh_node_resources,
            pods_fingerprint: self.pods_fingerprint,
            exclude_list: ExcludeList::parse(&self.exclude)?,
            capacity_source: if self.capacity_from_host {
                CapacitySource::Host
            } else {
                CapacitySource::Allocatable
            },
        };

        Ok(Settings {
            exporter,
            updater,
            monitor,
        })
    }
}

/// RUST_LOG takes precedence over `--debug`.
pub fn init_logging(debug: bool) {
    let fallback = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .init();
}
