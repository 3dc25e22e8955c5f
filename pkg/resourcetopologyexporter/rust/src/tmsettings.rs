// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Topology manager settings resolution.
//!
//! Resolved once at startup. Explicit policy and scope win; otherwise both are
//! read from the kubelet configuration file.

use std::path::Path;

use tracing::info;

use crate::error::{Result, RteError};
use crate::kubeconf;

/// Topology manager policy and scope of the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmConfig {
    pub policy: String,
    pub scope: String,
}

pub fn resolve(
    policy: &str,
    scope: &str,
    kubelet_config_file: Option<&Path>,
) -> Result<TmConfig> {
    if !policy.is_empty() && !scope.is_empty() {
        let config = TmConfig {
            policy: policy.to_string(),
            scope: scope.to_string(),
        };
        info!(
            policy = %config.policy,
            scope = %config.scope,
            "using given topology manager settings"
        );
        return Ok(config);
    }

    if let Some(path) = kubelet_config_file {
        let kubelet_config = kubeconf::get_kubelet_config_from_local_file(path)
            .map_err(|e| RteError::TopologyManagerSettings(e.to_string()))?;
        let config = TmConfig {
            policy: kubelet_config.topology_manager_policy,
            scope: kubelet_config.topology_manager_scope,
        };
        info!(
            policy = %config.policy,
            scope = %config.scope,
            file = %path.display(),
            "using detected topology manager settings"
        );
        return Ok(config);
    }

    Err(RteError::TopologyManagerSettings(
        "cannot find the kubelet topology manager policy".to_string(),
    ))
}
