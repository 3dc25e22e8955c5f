// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Host NUMA layout discovered from sysfs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{Result, RteError};

pub const DEFAULT_SYSFS_ROOT: &str = "/sys";

pub const LOCAL_DISTANCE: i64 = 10;
pub const REMOTE_DISTANCE: i64 = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    pub id: i64,
    pub cpus: Vec<i64>,
    /// Distance row as published by the kernel, indexed like `HostTopology::nodes`.
    pub distances: Vec<i64>,
    /// Bytes, from the node `meminfo`.
    pub memory_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTopology {
    pub nodes: Vec<NumaNode>,
    cpu_to_node: HashMap<i64, i64>,
}

impl HostTopology {
    pub fn new(mut nodes: Vec<NumaNode>) -> Self {
        nodes.sort_by_key(|n| n.id);
        let cpu_to_node = nodes
            .iter()
            .flat_map(|n| n.cpus.iter().map(move |cpu| (*cpu, n.id)))
            .collect();
        Self { nodes, cpu_to_node }
    }

    /// Single node `0` owning `cpus`.
    pub fn single_node(cpus: Vec<i64>) -> Self {
        Self::new(vec![NumaNode {
            id: 0,
            cpus,
            distances: vec![],
            memory_total: None,
        }])
    }

    /// Read `<root>/devices/system/node/node*`. A host without NUMA entries
    /// is reported as a single node holding every online CPU.
    pub fn discover(sysfs_root: &Path) -> Result<Self> {
        let node_dir = sysfs_root.join("devices/system/node");
        let mut nodes = Vec::new();

        if node_dir.is_dir() {
            let entries = fs::read_dir(&node_dir).map_err(|source| RteError::Sysfs {
                path: node_dir.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(id) = name
                    .to_str()
                    .and_then(|n| n.strip_prefix("node"))
                    .and_then(|n| n.parse::<i64>().ok())
                else {
                    continue;
                };
                nodes.push(read_node(&entry.path(), id)?);
            }
        }

        if nodes.is_empty() {
            let cpus = online_cpus(sysfs_root)?;
            info!(cpus = cpus.len(), "no NUMA nodes found, using a single zone");
            return Ok(Self::single_node(cpus));
        }

        debug!(nodes = nodes.len(), "discovered NUMA nodes");
        Ok(Self::new(nodes))
    }

    pub fn node_of_cpu(&self, cpu: i64) -> Option<i64> {
        self.cpu_to_node.get(&cpu).copied()
    }

    pub fn node(&self, id: i64) -> Option<&NumaNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Distances from `id` to every node, as `(node id, value)`. Falls back
    /// to the trivial table when the kernel row is missing or malformed.
    pub fn costs(&self, id: i64) -> Vec<(i64, i64)> {
        if let Some(node) = self.node(id)
            && node.distances.len() == self.nodes.len()
        {
            return self
                .nodes
                .iter()
                .zip(&node.distances)
                .map(|(other, d)| (other.id, *d))
                .collect();
        }
        self.nodes
            .iter()
            .map(|other| {
                let d = if other.id == id {
                    LOCAL_DISTANCE
                } else {
                    REMOTE_DISTANCE
                };
                (other.id, d)
            })
            .collect()
    }
}

fn read_node(dir: &Path, id: i64) -> Result<NumaNode> {
    let cpulist = read_to_string(&dir.join("cpulist"))?;
    let cpus = parse_cpu_list(&cpulist).map_err(|reason| RteError::Sysfs {
        path: dir.join("cpulist"),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, reason),
    })?;

    let distances = fs::read_to_string(dir.join("distance"))
        .ok()
        .map(|raw| {
            raw.split_whitespace()
                .filter_map(|d| d.parse::<i64>().ok())
                .collect()
        })
        .unwrap_or_default();

    let memory_total = fs::read_to_string(dir.join("meminfo"))
        .ok()
        .and_then(|raw| parse_mem_total(&raw));

    Ok(NumaNode {
        id,
        cpus,
        distances,
        memory_total,
    })
}

fn online_cpus(sysfs_root: &Path) -> Result<Vec<i64>> {
    let online = sysfs_root.join("devices/system/cpu/online");
    if online.exists() {
        let raw = read_to_string(&online)?;
        return parse_cpu_list(&raw).map_err(|reason| RteError::Sysfs {
            path: online,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, reason),
        });
    }
    let count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    Ok((0..count as i64).collect())
}

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| RteError::Sysfs {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse a kernel cpu list such as `0-3,8,10-11`.
pub fn parse_cpu_list(raw: &str) -> std::result::Result<Vec<i64>, String> {
    let mut cpus = Vec::new();
    for part in raw.trim().split(',').filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let lo: i64 = lo.parse().map_err(|_| format!("bad range {part:?}"))?;
                let hi: i64 = hi.parse().map_err(|_| format!("bad range {part:?}"))?;
                if hi < lo {
                    return Err(format!("bad range {part:?}"));
                }
                cpus.extend(lo..=hi);
            }
            None => cpus.push(part.parse().map_err(|_| format!("bad cpu {part:?}"))?),
        }
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

/// `Node 0 MemTotal:  16384 kB` -> bytes.
fn parse_mem_total(meminfo: &str) -> Option<u64> {
    meminfo.lines().find_map(|line| {
        let (_, rest) = line.split_once("MemTotal:")?;
        let mut fields = rest.split_whitespace();
        let value: u64 = fields.next()?.parse().ok()?;
        match fields.next() {
            Some("kB") => Some(value * 1024),
            _ => Some(value),
        }
    })
}
