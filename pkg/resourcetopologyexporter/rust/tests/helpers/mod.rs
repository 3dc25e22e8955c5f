// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodCondition;
use tokio::sync::{Notify, mpsc};

use resource_topology_exporter::notification::{ChangeEvent, EventSource};
use resource_topology_exporter::nrt::NodeResourceTopology;
use resource_topology_exporter::nrtupdater::TopologyClient;
use resource_topology_exporter::podreadiness::{ConditionType, PodIdent, PodStatusPatcher};
use resource_topology_exporter::podres::{
    AllocatableResourcesResponse, ContainerResources, ListPodResourcesResponse, PodResources,
    PodResourcesLister,
};
use resource_topology_exporter::{Result, RteError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn pod(namespace: &str, name: &str, cpu_ids: Vec<i64>) -> PodResources {
    PodResources {
        name: name.to_string(),
        namespace: namespace.to_string(),
        containers: vec![ContainerResources {
            name: "main".to_string(),
            cpu_ids,
            ..Default::default()
        }],
    }
}

/// Pod resources API with mutable pods and injectable list failures.
pub struct FakeLister {
    pods: Mutex<Vec<PodResources>>,
    allocatable_cpus: Vec<i64>,
    failures: AtomicUsize,
    list_calls: AtomicUsize,
}

impl FakeLister {
    pub fn new(allocatable_cpus: Vec<i64>, pods: Vec<PodResources>) -> Self {
        Self {
            pods: Mutex::new(pods),
            allocatable_cpus,
            failures: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_pods(&self, pods: Vec<PodResources>) {
        *self.pods.lock().unwrap() = pods;
    }

    /// Fail the next `n` list calls.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodResourcesLister for FakeLister {
    async fn list(&self) -> Result<ListPodResourcesResponse> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RteError::PodResources("kubelet unavailable".to_string()));
        }
        Ok(ListPodResourcesResponse {
            pod_resources: self.pods.lock().unwrap().clone(),
        })
    }

    async fn get_allocatable_resources(&self) -> Result<AllocatableResourcesResponse> {
        Ok(AllocatableResourcesResponse {
            cpu_ids: self.allocatable_cpus.clone(),
            ..Default::default()
        })
    }
}

/// Lister whose `List` call panics, taking the observer down with it.
pub struct PanickingLister;

#[async_trait]
impl PodResourcesLister for PanickingLister {
    async fn list(&self) -> Result<ListPodResourcesResponse> {
        panic!("lister exploded");
    }

    async fn get_allocatable_resources(&self) -> Result<AllocatableResourcesResponse> {
        Ok(AllocatableResourcesResponse {
            cpu_ids: (0..4).collect(),
            ..Default::default()
        })
    }
}

/// Cluster-side document store counting writes.
#[derive(Default)]
pub struct MemoryTopologyClient {
    store: Mutex<HashMap<String, NodeResourceTopology>>,
    writes: AtomicUsize,
}

impl MemoryTopologyClient {
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, name: &str) -> Option<NodeResourceTopology> {
        self.store.lock().unwrap().get(name).cloned()
    }

    fn store(&self, nrt: &NodeResourceTopology) -> NodeResourceTopology {
        let version = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        let mut doc = nrt.clone();
        doc.metadata.resource_version = Some(version.to_string());
        self.store
            .lock()
            .unwrap()
            .insert(doc.name().to_string(), doc.clone());
        doc
    }
}

#[async_trait]
impl TopologyClient for MemoryTopologyClient {
    async fn get(&self, name: &str) -> Result<Option<NodeResourceTopology>> {
        Ok(self.stored(name))
    }

    async fn create(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology> {
        if self.stored(nrt.name()).is_some() {
            return Err(RteError::Conflict(nrt.name().to_string()));
        }
        Ok(self.store(nrt))
    }

    async fn update(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology> {
        let current = self
            .stored(nrt.name())
            .ok_or_else(|| RteError::Api(format!("{} not found", nrt.name())))?;
        if current.metadata.resource_version != nrt.metadata.resource_version {
            return Err(RteError::Conflict(nrt.name().to_string()));
        }
        Ok(self.store(nrt))
    }
}

#[derive(Default)]
pub struct RecordingPatcher {
    pub patched: Mutex<Vec<(PodIdent, String, String)>>,
}

#[async_trait]
impl PodStatusPatcher for RecordingPatcher {
    async fn patch_condition(&self, pod: &PodIdent, condition: &PodCondition) -> Result<()> {
        self.patched.lock().unwrap().push((
            pod.clone(),
            condition.type_.clone(),
            condition.status.clone(),
        ));
        Ok(())
    }
}

/// Event source driven by the test through the returned sender.
pub struct ManualEventSource {
    events_rx: Option<mpsc::Receiver<ChangeEvent>>,
    stopped: std::sync::Arc<Notify>,
}

impl ManualEventSource {
    pub fn new() -> (Self, mpsc::Sender<ChangeEvent>) {
        let (tx, rx) = mpsc::channel(64);
        (
            Self {
                events_rx: Some(rx),
                stopped: std::sync::Arc::new(Notify::new()),
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

    fn set_interval(&mut self, _interval: Duration) -> Result<()> {
        Ok(())
    }

    fn events(&mut self) -> Result<mpsc::Receiver<ChangeEvent>> {
        self.events_rx.take().ok_or(RteError::EventsTaken)
    }

    fn run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn wait(&mut self) {
        self.stopped.notified().await;
    }

    fn close(&mut self) {
        self.stopped.notify_waiters();
    }
}

/// Receive conditions until one of `condition_type` arrives; returns its status.
pub async fn wait_for_condition(
    conditions: &mut mpsc::Receiver<PodCondition>,
    condition_type: ConditionType,
) -> String {
    let wanted = condition_type.as_str();
    tokio::time::timeout(DEFAULT_TIMEOUT, async {
        loop {
            match conditions.recv().await {
                Some(cond) if cond.type_ == wanted => return cond.status,
                Some(_) => continue,
                None => panic!("condition channel closed while waiting for {wanted}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted}"))
}

/// Sysfs tree with a single NUMA node holding `cpulist`.
pub fn write_sysfs(root: &Path, cpulist: &str) {
    let node = root.join("devices/system/node/node0");
    fs::create_dir_all(&node).unwrap();
    fs::write(node.join("cpulist"), format!("{cpulist}\n")).unwrap();
    fs::write(node.join("distance"), "10\n").unwrap();
    fs::write(node.join("meminfo"), "Node 0 MemTotal:  16777216 kB\n").unwrap();
}

pub fn write_kubelet_config(dir: &Path, policy: &str, scope: &str) -> PathBuf {
    let path = dir.join("kubelet-config.yaml");
    fs::write(
        &path,
        format!(
            "apiVersion: kubelet.config.k8s.io/v1beta1\n\
             kind: KubeletConfiguration\n\
             topologyManagerPolicy: {policy}\n\
             topologyManagerScope: {scope}\n"
        ),
    )
    .unwrap();
    path
}
