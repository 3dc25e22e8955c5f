// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Validation and comparison of published documents.
//!
//! These helpers describe what a consumer accepts. The exporter never calls
//! them on its hot path; they back the tests and external verifiers.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::debug;

use crate::nrt::{
    self, AttributeList, CostList, NodeResourceTopology, Quantity, ResourceInfoList,
};

/// Resource name -> quantity.
pub type ResourceList = BTreeMap<String, Quantity>;

/// Zone name -> resources.
pub type ZoneResources = BTreeMap<String, ResourceList>;

/// Which field `is_valid_resource_list` reads as allocatable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResourceCheck {
    #[default]
    Allocatable,
    /// Read allocatable from capacity, as older verifiers did.
    CapacityAsAllocatable,
}

/// Result of comparing expected and observed resources.
///
/// `ok` is false when the two sides do not describe the same set of zones or
/// resources; `zone` and `resource` name the first offender. When `ok` is
/// true, `ordering` is how the observed quantity compares to the expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comparison {
    pub ok: bool,
    pub zone: String,
    pub resource: String,
    pub ordering: Ordering,
}

impl Comparison {
    fn equal() -> Self {
        Self {
            ok: true,
            zone: String::new(),
            resource: String::new(),
            ordering: Ordering::Equal,
        }
    }

    fn mismatch(zone: &str, resource: &str) -> Self {
        Self {
            ok: false,
            zone: zone.to_string(),
            resource: resource.to_string(),
            ordering: Ordering::Equal,
        }
    }

    fn in_zone(mut self, zone: &str) -> Self {
        self.zone = zone.to_string();
        self
    }
}

fn is_node_zone(zone_type: &str) -> bool {
    zone_type.to_ascii_uppercase().starts_with("NODE")
}

fn is_valid_attribute(attrs: &AttributeList, name: &str, expected: &str) -> bool {
    let Some(attr) = nrt::get_attribute(attrs, name) else {
        debug!(attribute = name, "missing expected attribute");
        return false;
    };
    if attr.value.is_empty() {
        debug!(attribute = name, "empty attribute value");
        return false;
    }
    if !expected.is_empty() && attr.value != expected {
        debug!(attribute = name, got = %attr.value, expected, "attribute value mismatch");
        return false;
    }
    true
}

/// Structural check of a published document. An empty `tm_policy` or
/// `tm_scope` accepts any non-empty value.
pub fn is_valid_node_topology(
    nrt: Option<&NodeResourceTopology>,
    tm_policy: &str,
    tm_scope: &str,
) -> bool {
    is_valid_node_topology_with(nrt, tm_policy, tm_scope, ResourceCheck::default())
}

pub fn is_valid_node_topology_with(
    nrt: Option<&NodeResourceTopology>,
    tm_policy: &str,
    tm_scope: &str,
    check: ResourceCheck,
) -> bool {
    let Some(nrt) = nrt else {
        debug!("no node topology to validate");
        return false;
    };
    if !nrt.topology_policies.is_empty() {
        debug!(name = nrt.name(), "topologyPolicies is deprecated and must not be set");
        return false;
    }
    if !is_valid_attribute(&nrt.attributes, nrt::ATTRIBUTE_POLICY, tm_policy)
        || !is_valid_attribute(&nrt.attributes, nrt::ATTRIBUTE_SCOPE, tm_scope)
    {
        return false;
    }
    if nrt.zones.is_empty() {
        debug!(name = nrt.name(), "no zones");
        return false;
    }

    let mut found = 0;
    for zone in nrt.zones.iter().filter(|z| is_node_zone(&z.zone_type)) {
        found += 1;
        if !is_valid_cost_list(&zone.name, &zone.costs) {
            debug!(name = nrt.name(), zone = %zone.name, "invalid cost list");
            return false;
        }
        if !is_valid_resource_list(&zone.name, &zone.resources, check) {
            debug!(name = nrt.name(), zone = %zone.name, "invalid resource list");
            return false;
        }
    }
    if found == 0 {
        debug!(name = nrt.name(), "no zone of node type");
    }
    found > 0
}

pub fn is_valid_cost_list(zone_name: &str, costs: &CostList) -> bool {
    if costs.is_empty() {
        debug!(zone = zone_name, "no costs");
        return false;
    }
    match costs.iter().find(|c| c.name.is_empty() || c.value < 0) {
        Some(cost) => {
            debug!(zone = zone_name, ?cost, "malformed cost");
            false
        }
        None => true,
    }
}

/// Every entry must satisfy `0 <= available <= capacity` and
/// `0 <= allocatable <= capacity`, and a cpu entry must be present.
pub fn is_valid_resource_list(
    zone_name: &str,
    resources: &ResourceInfoList,
    check: ResourceCheck,
) -> bool {
    if resources.is_empty() {
        debug!(zone = zone_name, "no resources");
        return false;
    }
    let mut found_cpu = false;
    for res in resources {
        if res.name == nrt::RESOURCE_CPU {
            found_cpu = true;
        }
        let available = res.available.value();
        let capacity = res.capacity.value();
        let allocatable = match check {
            ResourceCheck::Allocatable => res.allocatable.value(),
            ResourceCheck::CapacityAsAllocatable => capacity,
        };
        if available < 0 || allocatable < 0 || capacity < 0 || capacity < available || capacity < allocatable {
            debug!(zone = zone_name, resource = ?res, "malformed resource");
            return false;
        }
    }
    found_cpu
}

/// Available quantities of every `Node` zone with at least one resource.
pub fn available_resource_list_from_nrt(nrt: &NodeResourceTopology) -> ZoneResources {
    nrt.zones
        .iter()
        .filter(|z| z.zone_type == nrt::ZONE_TYPE_NODE)
        .filter(|z| !z.resources.is_empty())
        .map(|z| {
            let list = z
                .resources
                .iter()
                .map(|r| (r.name.clone(), r.available))
                .collect();
            (z.name.clone(), list)
        })
        .collect()
}

/// First resource whose quantity differs, in name order.
pub fn cmp_resource_list(expected: &ResourceList, got: &ResourceList) -> Comparison {
    if expected.len() != got.len() {
        debug!(?expected, ?got, "resource lists differ in length");
        let offender = expected
            .keys()
            .find(|k| !got.contains_key(*k))
            .or_else(|| got.keys().find(|k| !expected.contains_key(*k)))
            .map(String::as_str)
            .unwrap_or_default();
        return Comparison::mismatch("", offender);
    }
    for (name, exp_qty) in expected {
        let Some(got_qty) = got.get(name) else {
            return Comparison::mismatch("", name);
        };
        let ordering = got_qty.cmp(exp_qty);
        if ordering != Ordering::Equal {
            debug!(resource = %name, ?ordering, expected = %exp_qty, got = %got_qty, "resource differs");
            return Comparison {
                ok: true,
                zone: String::new(),
                resource: name.clone(),
                ordering,
            };
        }
    }
    Comparison::equal()
}

/// First zone and resource whose quantity differs.
pub fn cmp_available_resources(expected: &ZoneResources, got: &ZoneResources) -> Comparison {
    if expected.len() != got.len() {
        debug!(expected = expected.len(), got = got.len(), "zone counts differ");
        return Comparison::mismatch("", "");
    }
    for (zone, exp_list) in expected {
        let Some(got_list) = got.get(zone) else {
            return Comparison::mismatch(zone, "");
        };
        let cmp = cmp_resource_list(exp_list, got_list);
        if !cmp.ok || cmp.ordering != Ordering::Equal {
            return cmp.in_zone(zone);
        }
    }
    Comparison::equal()
}

/// Some resource is strictly lower than expected; returns where.
pub fn less_available_resources(
    expected: &ZoneResources,
    got: &ZoneResources,
) -> Option<(String, String)> {
    let cmp = cmp_available_resources(expected, got);
    if cmp.ok && cmp.ordering == Ordering::Less {
        return Some((cmp.zone, cmp.resource));
    }
    debug!(?cmp, "no resource lower than expected");
    None
}

/// Compare the cpu entry of every zone; the first differing zone decides.
pub fn cmp_available_cpus(expected: &ZoneResources, got: &ZoneResources) -> Comparison {
    if expected.len() != got.len() {
        debug!(expected = expected.len(), got = got.len(), "zone counts differ");
        return Comparison::mismatch("", nrt::RESOURCE_CPU);
    }
    for (zone, exp_list) in expected {
        let Some(got_list) = got.get(zone) else {
            return Comparison::mismatch(zone, nrt::RESOURCE_CPU);
        };
        let (Some(exp_cpu), Some(got_cpu)) =
            (exp_list.get(nrt::RESOURCE_CPU), got_list.get(nrt::RESOURCE_CPU))
        else {
            debug!(zone = %zone, "cpu missing from zone");
            return Comparison::mismatch(zone, nrt::RESOURCE_CPU);
        };
        let ordering = got_cpu.cmp(exp_cpu);
        if ordering != Ordering::Equal {
            return Comparison {
                ok: true,
                zone: zone.clone(),
                resource: nrt::RESOURCE_CPU.to_string(),
                ordering,
            };
        }
    }
    Comparison::equal()
}

/// Any node-type zone lists `resource`.
pub fn contains_resource(nrt: &NodeResourceTopology, resource: &str) -> bool {
    nrt.zones
        .iter()
        .filter(|z| is_node_zone(&z.zone_type))
        .any(|z| z.resources.iter().any(|r| r.name == resource))
}
