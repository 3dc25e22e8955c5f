// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Per-zone resource accounting.
//!
//! A scan combines three inputs: the host NUMA layout (sysfs), what the node
//! can hand out (`GetAllocatableResources`) and what is currently handed out
//! (`List`). Every scan starts from scratch; nothing but the allocatable
//! amounts is carried over between scans.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use crate::error::{Result, RteError};
use crate::nrt::{
    self, AttributeList, CostInfo, Quantity, ResourceInfo, ZONE_TYPE_NODE, Zone, ZoneList,
};
use crate::podres::{ContainerDevices, ContainerMemory, PodResources, PodResourcesLister};
use crate::sysinfo::{DEFAULT_SYSFS_ROOT, HostTopology};

pub const PODS_FINGERPRINT_PREFIX: &str = "pfp0v001";
const EXCLUDE_ALL_NODES: &str = "*";

/// Where zone capacity comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapacitySource {
    /// Capacity mirrors allocatable.
    #[default]
    Allocatable,
    /// CPU and memory capacity are read from the host topology, never below
    /// allocatable. Other resources still mirror allocatable.
    Host,
}

/// Resources left out of the published zones, per node name (`*` for all).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExcludeList(HashMap<String, BTreeSet<String>>);

impl ExcludeList {
    /// Parse `node=resource[,resource...]` entries.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self> {
        let mut list: HashMap<String, BTreeSet<String>> = HashMap::new();
        for entry in entries {
            let entry = entry.as_ref();
            let invalid = |reason| RteError::InvalidExclude {
                entry: entry.to_string(),
                reason,
            };
            let (node, resources) = entry
                .split_once('=')
                .ok_or_else(|| invalid("expected node=resource"))?;
            let node = node.trim();
            let resources: Vec<&str> = resources
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .collect();
            if node.is_empty() || resources.is_empty() {
                return Err(invalid("expected node=resource"));
            }
            // every zone must keep its cpu entry
            if resources.contains(&nrt::RESOURCE_CPU) {
                return Err(invalid("cpu cannot be excluded"));
            }
            list.entry(node.to_string())
                .or_default()
                .extend(resources.into_iter().map(String::from));
        }
        Ok(Self(list))
    }

    pub fn is_excluded(&self, node_name: &str, resource: &str) -> bool {
        [node_name, EXCLUDE_ALL_NODES]
            .iter()
            .filter_map(|node| self.0.get(*node))
            .any(|set| set.contains(resource))
    }
}

#[derive(Debug, Clone)]
pub struct Args {
    pub node_name: String,
    /// Only account pods in this namespace; empty means every namespace.
    pub namespace: String,
    pub sysfs_root: PathBuf,
    pub refresh_node_resources: bool,
    pub pods_fingerprint: bool,
    pub exclude_list: ExcludeList,
    pub capacity_source: CapacitySource,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            namespace: String::new(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            refresh_node_resources: false,
            pods_fingerprint: false,
            exclude_list: ExcludeList::default(),
            capacity_source: CapacitySource::default(),
        }
    }
}

/// Point-in-time snapshot of every zone. Superseded by the next one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
    pub zones: ZoneList,
    /// Node-level attributes computed by the scan (pod fingerprint).
    pub attributes: AttributeList,
}

pub fn zone_name(node_id: i64) -> String {
    format!("node-{node_id}")
}

/// Amounts per NUMA node id, then per resource name.
type ZoneAmounts = BTreeMap<i64, BTreeMap<String, i64>>;

pub struct ResourceMonitor {
    lister: Arc<dyn PodResourcesLister>,
    topology: HostTopology,
    args: Args,
    allocatable: Option<ZoneAmounts>,
}

impl ResourceMonitor {
    /// Discover the host topology under `args.sysfs_root`.
    pub fn new(lister: Arc<dyn PodResourcesLister>, args: Args) -> Result<Self> {
        let topology = HostTopology::discover(&args.sysfs_root)?;
        Ok(Self::with_topology(lister, topology, args))
    }

    pub fn with_topology(
        lister: Arc<dyn PodResourcesLister>,
        topology: HostTopology,
        args: Args,
    ) -> Self {
        Self {
            lister,
            topology,
            args,
            allocatable: None,
        }
    }

    pub fn topology(&self) -> &HostTopology {
        &self.topology
    }

    /// Query the resource-listing API and compute a fresh snapshot.
    pub async fn scan(&mut self) -> Result<Info> {
        let allocatable = self.allocatable().await?;

        let response = self.lister.list().await?;
        let pods: Vec<&PodResources> = response
            .pod_resources
            .iter()
            .filter(|pod| self.args.namespace.is_empty() || pod.namespace == self.args.namespace)
            .collect();

        let mut used = ZoneAmounts::new();
        for pod in &pods {
            for container in &pod.containers {
                self.account_cpus(&container.cpu_ids, &mut used);
                self.account_devices(&container.devices, &mut used);
                self.account_memory(&container.memory, &mut used);
            }
        }
        trace!(?used, pods = pods.len(), "accounted assigned resources");

        let zones = self.build_zones(&allocatable, &used);
        let mut attributes = AttributeList::new();
        if self.args.pods_fingerprint {
            let fingerprint = pods_fingerprint(&pods);
            debug!(%fingerprint, "computed pods fingerprint");
            nrt::set_attribute(&mut attributes, nrt::ATTRIBUTE_PODS_FINGERPRINT, &fingerprint);
        }

        Ok(Info { zones, attributes })
    }

    async fn allocatable(&mut self) -> Result<ZoneAmounts> {
        if !self.args.refresh_node_resources
            && let Some(cached) = &self.allocatable
        {
            return Ok(cached.clone());
        }

        let response = self.lister.get_allocatable_resources().await?;
        let mut amounts = ZoneAmounts::new();
        self.account_cpus(&response.cpu_ids, &mut amounts);
        self.account_devices(&response.devices, &mut amounts);
        self.account_memory(&response.memory, &mut amounts);
        debug!(?amounts, "fetched allocatable resources");

        self.allocatable = Some(amounts.clone());
        Ok(amounts)
    }

    fn account_cpus(&self, cpu_ids: &[i64], amounts: &mut ZoneAmounts) {
        for cpu in cpu_ids {
            match self.topology.node_of_cpu(*cpu) {
                Some(node) => add(amounts, node, nrt::RESOURCE_CPU, 1),
                None => debug!(cpu, "cpu not found in host topology, skipped"),
            }
        }
    }

    fn account_devices(&self, devices: &[ContainerDevices], amounts: &mut ZoneAmounts) {
        for dev in devices {
            let Some(node) = dev.topology.as_ref().and_then(|t| t.first_node()) else {
                continue;
            };
            add(amounts, node, &dev.resource_name, dev.device_ids.len() as i64);
        }
    }

    fn account_memory(&self, memory: &[ContainerMemory], amounts: &mut ZoneAmounts) {
        for mem in memory {
            let Some(node) = mem.topology.as_ref().and_then(|t| t.first_node()) else {
                continue;
            };
            let size = i64::try_from(mem.size).unwrap_or(i64::MAX);
            add(amounts, node, &mem.memory_type, size);
        }
    }

    fn build_zones(&self, allocatable: &ZoneAmounts, used: &ZoneAmounts) -> ZoneList {
        let empty = BTreeMap::new();
        self.topology
            .nodes
            .iter()
            .map(|node| {
                let zone_alloc = allocatable.get(&node.id).unwrap_or(&empty);
                let zone_used = used.get(&node.id).unwrap_or(&empty);

                let mut names: BTreeSet<&str> = zone_alloc.keys().map(String::as_str).collect();
                names.insert(nrt::RESOURCE_CPU);

                let resources = names
                    .into_iter()
                    .filter(|name| !self.args.exclude_list.is_excluded(&self.args.node_name, name))
                    .map(|name| {
                        let alloc = zone_alloc.get(name).copied().unwrap_or(0);
                        let in_use = zone_used.get(name).copied().unwrap_or(0);
                        ResourceInfo {
                            name: name.to_string(),
                            capacity: Quantity(self.capacity(node.id, name, alloc)),
                            allocatable: Quantity(alloc),
                            available: Quantity((alloc - in_use).max(0)),
                        }
                    })
                    .collect();

                let costs = self
                    .topology
                    .costs(node.id)
                    .into_iter()
                    .map(|(other, value)| CostInfo {
                        name: zone_name(other),
                        value,
                    })
                    .collect();

                Zone {
                    name: zone_name(node.id),
                    zone_type: ZONE_TYPE_NODE.to_string(),
                    parent: String::new(),
                    costs,
                    attributes: vec![],
                    resources,
                }
            })
            .collect()
    }

    fn capacity(&self, node_id: i64, resource: &str, allocatable: i64) -> i64 {
        if self.args.capacity_source == CapacitySource::Allocatable {
            return allocatable;
        }
        let Some(node) = self.topology.node(node_id) else {
            return allocatable;
        };
        let host = match resource {
            nrt::RESOURCE_CPU => Some(node.cpus.len() as i64),
            nrt::RESOURCE_MEMORY => node
                .memory_total
                .map(|m| i64::try_from(m).unwrap_or(i64::MAX)),
            _ => None,
        };
        host.map_or(allocatable, |h| h.max(allocatable))
    }
}

fn add(amounts: &mut ZoneAmounts, node: i64, resource: &str, amount: i64) {
    *amounts
        .entry(node)
        .or_default()
        .entry(resource.to_string())
        .or_default() += amount;
}

/// Stable digest of the set of listed pods.
pub fn pods_fingerprint(pods: &[&PodResources]) -> String {
    let mut names: Vec<String> = pods
        .iter()
        .map(|p| format!("{}/{}", p.namespace, p.name))
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in &names {
        hasher.update(name.as_bytes());
        hasher.update(b"\n");
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{PODS_FINGERPRINT_PREFIX}{}", &digest[..16])
}
