// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Kubelet configuration file reader.
//!
//! Only the handful of `KubeletConfiguration` fields the exporter cares about
//! are decoded; everything else in the file is ignored. The file may be YAML
//! or JSON.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, RteError};

const KUBELET_CONFIGURATION_KIND: &str = "KubeletConfiguration";

/// Kubelet defaults, applied when the file leaves the field unset.
pub const DEFAULT_TOPOLOGY_MANAGER_POLICY: &str = "none";
pub const DEFAULT_TOPOLOGY_MANAGER_SCOPE: &str = "container";

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawKubeletConfig {
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    topology_manager_policy: Option<String>,
    #[serde(default)]
    topology_manager_scope: Option<String>,
    #[serde(default)]
    cpu_manager_policy: Option<String>,
    #[serde(default)]
    memory_manager_policy: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeletConfig {
    pub topology_manager_policy: String,
    pub topology_manager_scope: String,
    pub cpu_manager_policy: Option<String>,
    pub memory_manager_policy: Option<String>,
}

pub fn get_kubelet_config_from_local_file(path: &Path) -> Result<KubeletConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| RteError::KubeletConfig {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    parse_kubelet_config(&contents).map_err(|reason| RteError::KubeletConfig {
        path: path.to_path_buf(),
        reason,
    })
}

fn parse_kubelet_config(contents: &str) -> std::result::Result<KubeletConfig, String> {
    if contents.trim().is_empty() {
        return Err("empty configuration".to_string());
    }
    let raw: RawKubeletConfig = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;

    if let Some(kind) = raw.kind.as_deref()
        && kind != KUBELET_CONFIGURATION_KIND
    {
        return Err(format!(
            "unexpected kind {kind:?}, want {KUBELET_CONFIGURATION_KIND:?}"
        ));
    }

    let config = KubeletConfig {
        topology_manager_policy: non_empty_or(
            raw.topology_manager_policy,
            DEFAULT_TOPOLOGY_MANAGER_POLICY,
        ),
        topology_manager_scope: non_empty_or(
            raw.topology_manager_scope,
            DEFAULT_TOPOLOGY_MANAGER_SCOPE,
        ),
        cpu_manager_policy: raw.cpu_manager_policy,
        memory_manager_policy: raw.memory_manager_policy,
    };
    debug!(?config, "parsed kubelet configuration");
    Ok(config)
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
