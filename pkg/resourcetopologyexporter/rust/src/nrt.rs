// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! `NodeResourceTopology` (topology.node.k8s.io/v1alpha2) document model.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const API_GROUP: &str = "topology.node.k8s.io";
pub const API_VERSION: &str = "v1alpha2";
pub const KIND: &str = "NodeResourceTopology";

pub const ZONE_TYPE_NODE: &str = "Node";

pub const ATTRIBUTE_POLICY: &str = "topologyManagerPolicy";
pub const ATTRIBUTE_SCOPE: &str = "topologyManagerScope";
pub const ATTRIBUTE_PODS_FINGERPRINT: &str = "nodeTopologyPodsFingerprint";

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";

/// Integral resource amount: cores for cpu, bytes for memory, a count for
/// devices. Serialized as a Kubernetes quantity string.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Quantity(pub i64);

impl Quantity {
    pub fn value(self) -> i64 {
        self.0
    }

    /// Parse a Kubernetes quantity, rounding fractions up like
    /// `resource.Quantity.Value()`. Accepts the decimal (`n` to `E`) and
    /// binary (`Ki` to `Ei`) suffixes and exponent notation (`1e3`).
    pub fn parse(s: &str) -> Result<Self, String> {
        let invalid = || format!("invalid quantity {s:?}");
        let out_of_range = || format!("quantity {s:?} out of range");

        let trimmed = s.trim();
        let (negative, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(end);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if (whole.is_empty() && fraction.is_empty()) || fraction.contains('.') {
            return Err(invalid());
        }

        let digits = format!("{whole}{fraction}");
        let digits = digits.trim_start_matches('0');
        let mantissa: u128 = if digits.is_empty() {
            0
        } else {
            digits.parse().map_err(|_| out_of_range())?
        };

        let (pow10, pow2): (i64, u32) = match suffix {
            "" => (0, 0),
            "n" => (-9, 0),
            "u" => (-6, 0),
            "m" => (-3, 0),
            "k" => (3, 0),
            "M" => (6, 0),
            "G" => (9, 0),
            "T" => (12, 0),
            "P" => (15, 0),
            "E" => (18, 0),
            "Ki" => (0, 10),
            "Mi" => (0, 20),
            "Gi" => (0, 30),
            "Ti" => (0, 40),
            "Pi" => (0, 50),
            "Ei" => (0, 60),
            exp if exp.starts_with(['e', 'E']) => {
                (exp[1..].parse::<i64>().map_err(|_| invalid())?, 0)
            }
            other => return Err(format!("unknown quantity suffix {other:?} in {s:?}")),
        };

        let scaled = mantissa
            .checked_mul(1u128 << pow2)
            .ok_or_else(out_of_range)?;
        let exponent = pow10.saturating_sub(fraction.len() as i64);
        let magnitude = if exponent >= 0 {
            u32::try_from(exponent)
                .ok()
                .and_then(|e| 10u128.checked_pow(e))
                .and_then(|m| scaled.checked_mul(m))
                .ok_or_else(out_of_range)?
        } else {
            let divisor = u32::try_from(exponent.unsigned_abs())
                .ok()
                .and_then(|e| 10u128.checked_pow(e));
            match divisor {
                // ceil for positive amounts, truncation toward zero for negative ones
                Some(d) if negative => scaled / d,
                Some(d) => scaled.div_ceil(d),
                None if negative || scaled == 0 => 0,
                None => 1,
            }
        };

        let magnitude = i128::try_from(magnitude).map_err(|_| out_of_range())?;
        let value = if negative { -magnitude } else { magnitude };
        i64::try_from(value).map(Quantity).map_err(|_| out_of_range())
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Quantity {
    fn from(v: i64) -> Self {
        Quantity(v)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Str(String),
            Int(i64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Str(s) => Quantity::parse(&s).map_err(serde::de::Error::custom),
            Raw::Int(v) => Ok(Quantity(v)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub name: String,
    pub capacity: Quantity,
    pub allocatable: Quantity,
    pub available: Quantity,
}

pub type ResourceInfoList = Vec<ResourceInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostInfo {
    pub name: String,
    pub value: i64,
}

pub type CostList = Vec<CostInfo>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeInfo {
    pub name: String,
    pub value: String,
}

pub type AttributeList = Vec<AttributeInfo>;

pub fn get_attribute<'a>(attrs: &'a AttributeList, name: &str) -> Option<&'a AttributeInfo> {
    attrs.iter().find(|attr| attr.name == name)
}

/// Insert or replace the attribute called `name`.
pub fn set_attribute(attrs: &mut AttributeList, name: &str, value: &str) {
    match attrs.iter_mut().find(|attr| attr.name == name) {
        Some(attr) => attr.value = value.to_string(),
        None => attrs.push(AttributeInfo {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub costs: CostList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: AttributeList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: ResourceInfoList,
}

pub type ZoneList = Vec<Zone>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResourceTopology {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Deprecated in favour of attributes; never populated by the exporter.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topology_policies: Vec<String>,
    #[serde(default)]
    pub zones: ZoneList,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: AttributeList,
}

impl NodeResourceTopology {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Sort every list by name so that two documents describing the same
    /// state compare equal regardless of the order they were built in.
    pub fn normalize(&mut self) {
        self.zones.sort_by(|a, b| a.name.cmp(&b.name));
        for zone in &mut self.zones {
            zone.costs.sort_by(|a, b| a.name.cmp(&b.name));
            zone.attributes.sort_by(|a, b| a.name.cmp(&b.name));
            zone.resources.sort_by(|a, b| a.name.cmp(&b.name));
        }
        self.attributes.sort_by(|a, b| a.name.cmp(&b.name));
    }

    /// Compare everything but object metadata.
    pub fn same_content(&self, other: &NodeResourceTopology) -> bool {
        let mut lhs = self.content();
        let mut rhs = other.content();
        lhs.normalize();
        rhs.normalize();
        lhs == rhs
    }

    fn content(&self) -> NodeResourceTopology {
        NodeResourceTopology {
            metadata: ObjectMeta::default(),
            topology_policies: self.topology_policies.clone(),
            zones: self.zones.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(name: &str, cpu_available: i64) -> Zone {
        Zone {
            name: name.to_string(),
            zone_type: ZONE_TYPE_NODE.to_string(),
            parent: String::new(),
            costs: vec![CostInfo {
                name: name.to_string(),
                value: 10,
            }],
            attributes: vec![],
            resources: vec![ResourceInfo {
                name: RESOURCE_CPU.to_string(),
                capacity: Quantity(8),
                allocatable: Quantity(8),
                available: Quantity(cpu_available),
            }],
        }
    }

    #[test]
    fn test_quantity_parse() {
        assert_eq!(Quantity::parse("4").unwrap(), Quantity(4));
        assert_eq!(Quantity::parse("1Ki").unwrap(), Quantity(1024));
        assert_eq!(Quantity::parse("2Gi").unwrap(), Quantity(2 * 1024 * 1024 * 1024));
        assert_eq!(Quantity::parse("1k").unwrap(), Quantity(1000));
        assert_eq!(Quantity::parse("1500m").unwrap(), Quantity(2));
        assert_eq!(Quantity::parse("0.5").unwrap(), Quantity(1));
        assert_eq!(Quantity::parse("-3").unwrap(), Quantity(-3));
        assert!(Quantity::parse("").is_err());
        assert!(Quantity::parse("12Xi").is_err());
        assert!(Quantity::parse("abc").is_err());
    }

    #[test]
    fn test_quantity_parse_full_suffix_set() {
        assert_eq!(Quantity::parse("100n").unwrap(), Quantity(1));
        assert_eq!(Quantity::parse("5u").unwrap(), Quantity(1));
        assert_eq!(Quantity::parse("0n").unwrap(), Quantity(0));
        assert_eq!(Quantity::parse("1e3").unwrap(), Quantity(1000));
        assert_eq!(Quantity::parse("2E3").unwrap(), Quantity(2000));
        assert_eq!(Quantity::parse("1.5e-1").unwrap(), Quantity(1));
        assert_eq!(Quantity::parse("1E").unwrap(), Quantity(1_000_000_000_000_000_000));
        assert_eq!(Quantity::parse("1.5Gi").unwrap(), Quantity(1_610_612_736));
        assert_eq!(Quantity::parse("-1500m").unwrap(), Quantity(-1));
        assert_eq!(Quantity::parse("+7").unwrap(), Quantity(7));
        assert!(Quantity::parse("1e").is_err());
        assert!(Quantity::parse("1.2.3").is_err());
        assert!(Quantity::parse(".").is_err());
    }

    #[test]
    fn test_quantity_parse_is_exact_near_i64_limits() {
        assert_eq!(
            Quantity::parse("9223372036854775807").unwrap(),
            Quantity(i64::MAX)
        );
        assert_eq!(
            Quantity::parse("9007199254740993").unwrap(),
            Quantity(9_007_199_254_740_993)
        );
        assert!(Quantity::parse("9223372036854775808").is_err());
        assert!(Quantity::parse("8Ei").is_err());
        assert!(Quantity::parse("1e30").is_err());
    }

    #[test]
    fn test_document_json_shape() {
        let mut nrt = NodeResourceTopology {
            zones: vec![zone("node-0", 4)],
            ..Default::default()
        };
        nrt.metadata.name = Some("worker-0".to_string());
        set_attribute(&mut nrt.attributes, ATTRIBUTE_POLICY, "single-numa-node");

        let value = serde_json::to_value(&nrt).unwrap();
        assert_eq!(value["metadata"]["name"], "worker-0");
        assert!(value.get("topologyPolicies").is_none());
        assert_eq!(value["zones"][0]["type"], "Node");
        assert_eq!(value["zones"][0]["resources"][0]["available"], "4");
        assert_eq!(value["attributes"][0]["name"], "topologyManagerPolicy");

        let back: NodeResourceTopology = serde_json::from_value(value).unwrap();
        assert_eq!(back, nrt);
    }

    #[test]
    fn test_deserialize_api_quantities() {
        let raw = serde_json::json!({
            "apiVersion": "topology.node.k8s.io/v1alpha2",
            "kind": "NodeResourceTopology",
            "metadata": {"name": "worker-0", "resourceVersion": "42"},
            "topologyPolicies": ["SingleNUMANodeContainerLevel"],
            "zones": [{
                "name": "node-0",
                "type": "Node",
                "resources": [
                    {"name": "memory", "capacity": "16Gi", "allocatable": "15Gi", "available": 1024}
                ]
            }]
        });
        let nrt: NodeResourceTopology = serde_json::from_value(raw).unwrap();
        assert_eq!(nrt.name(), "worker-0");
        assert_eq!(nrt.topology_policies.len(), 1);
        let mem = &nrt.zones[0].resources[0];
        assert_eq!(mem.capacity, Quantity(16 * 1024 * 1024 * 1024));
        assert_eq!(mem.available, Quantity(1024));
    }

    #[test]
    fn test_same_content_ignores_metadata_and_order() {
        let mut a = NodeResourceTopology {
            zones: vec![zone("node-0", 4), zone("node-1", 2)],
            ..Default::default()
        };
        a.metadata.resource_version = Some("1".to_string());
        let mut b = NodeResourceTopology {
            zones: vec![zone("node-1", 2), zone("node-0", 4)],
            ..Default::default()
        };
        b.metadata.resource_version = Some("7".to_string());
        assert!(a.same_content(&b));

        b.zones[0].resources[0].available = Quantity(1);
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_set_attribute_replaces() {
        let mut attrs = AttributeList::new();
        set_attribute(&mut attrs, ATTRIBUTE_SCOPE, "container");
        set_attribute(&mut attrs, ATTRIBUTE_SCOPE, "pod");
        assert_eq!(attrs.len(), 1);
        assert_eq!(get_attribute(&attrs, ATTRIBUTE_SCOPE).unwrap().value, "pod");
        assert!(get_attribute(&attrs, ATTRIBUTE_POLICY).is_none());
    }
}
