// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};
use tracing::info;

use resource_topology_exporter::config::{self, Cli};
use resource_topology_exporter::exporter::{self, Clients};
use resource_topology_exporter::nrtupdater::KubeTopologyClient;
use resource_topology_exporter::podreadiness::{KubePodStatusPatcher, PodStatusPatcher};
use resource_topology_exporter::podres::GrpcPodResourcesClient;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_logging(cli.debug);
    info!(
        "resource-topology-exporter starting (version {})",
        env!("CARGO_PKG_VERSION")
    );

    let settings = cli.into_settings().context("invalid configuration")?;

    let pod_resources = GrpcPodResourcesClient::connect(&settings.exporter.pod_resources_socket_path)
        .await
        .context("failed to connect to the pod resources API")?;
    let kube_client = kube::Client::try_default()
        .await
        .context("failed to create the cluster API client")?;

    let pod_status = settings.exporter.pod_readiness_enable.then(|| {
        Arc::new(KubePodStatusPatcher::new(kube_client.clone())) as Arc<dyn PodStatusPatcher>
    });
    let clients = Clients {
        pod_resources: Arc::new(pod_resources),
        topology: Arc::new(KubeTopologyClient::new(kube_client)),
        pod_status,
    };

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        result = exporter::execute(clients, settings.updater, settings.monitor, settings.exporter) => {
            result.context("exporter failed")?;
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }

    info!("resource-topology-exporter shutting down");
    Ok(())
}
