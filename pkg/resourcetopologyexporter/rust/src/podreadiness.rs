// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Readiness gating: pipeline stages report progress as conditions on the
//! exporter's own pod.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodCondition};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Client;
use kube::api::{Api, Patch, PatchParams};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, RteError};

pub const CONDITIONS_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    /// The resource-listing API answered.
    PodresourcesFetched,
    /// The topology document is published and current.
    NodeTopologyUpdated,
}

impl ConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::PodresourcesFetched => "PodresourcesFetched",
            ConditionType::NodeTopologyUpdated => "NodeTopologyUpdated",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn new_condition(condition_type: ConditionType, ok: bool, message: &str) -> PodCondition {
    PodCondition {
        type_: condition_type.to_string(),
        status: if ok { "True" } else { "False" }.to_string(),
        last_transition_time: Some(Time(chrono::Utc::now())),
        message: (!message.is_empty()).then(|| message.to_string()),
        ..Default::default()
    }
}

/// Report a condition if gating is enabled. A closed channel is logged and
/// otherwise ignored; readiness never stops the pipeline.
pub async fn set_condition(
    conditions: Option<&mpsc::Sender<PodCondition>>,
    condition_type: ConditionType,
    ok: bool,
    message: &str,
) {
    let Some(tx) = conditions else {
        return;
    };
    if tx
        .send(new_condition(condition_type, ok, message))
        .await
        .is_err()
    {
        debug!(condition = %condition_type, "condition channel closed");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdent {
    pub namespace: String,
    pub name: String,
}

impl PodIdent {
    /// Both parts must be set; they usually come from the downward API.
    pub fn new(namespace: &str, name: &str) -> Option<Self> {
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })
    }
}

impl fmt::Display for PodIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[async_trait]
pub trait PodStatusPatcher: Send + Sync {
    async fn patch_condition(&self, pod: &PodIdent, condition: &PodCondition) -> Result<()>;
}

pub struct KubePodStatusPatcher {
    client: Client,
}

impl KubePodStatusPatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PodStatusPatcher for KubePodStatusPatcher {
    async fn patch_condition(&self, pod: &PodIdent, condition: &PodCondition) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &pod.namespace);
        // conditions merge by type under a strategic patch
        let patch = json!({ "status": { "conditions": [condition] } });
        pods.patch_status(&pod.name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?;
        Ok(())
    }
}

/// Applies received conditions to the exporter pod.
pub struct ConditionInjector {
    patcher: Arc<dyn PodStatusPatcher>,
    pod: PodIdent,
    applied: HashMap<String, String>,
}

impl ConditionInjector {
    pub fn new(
        patcher: Option<Arc<dyn PodStatusPatcher>>,
        pod: Option<PodIdent>,
    ) -> Result<Self> {
        let patcher = patcher
            .ok_or_else(|| RteError::Readiness("no pod status client available".to_string()))?;
        let pod = pod.ok_or_else(|| {
            RteError::Readiness("pod name and namespace must be set".to_string())
        })?;
        Ok(Self {
            patcher,
            pod,
            applied: HashMap::new(),
        })
    }

    pub fn run(mut self, mut conditions: mpsc::Receiver<PodCondition>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(pod = %self.pod, "condition injector started");
            while let Some(condition) = conditions.recv().await {
                self.apply(&condition).await;
            }
            debug!("condition injector stopped");
        })
    }

    async fn apply(&mut self, condition: &PodCondition) {
        if self.applied.get(&condition.type_) == Some(&condition.status) {
            return;
        }
        match self.patcher.patch_condition(&self.pod, condition).await {
            Ok(()) => {
                debug!(
                    condition = %condition.type_,
                    status = %condition.status,
                    "pod condition updated"
                );
                self.applied
                    .insert(condition.type_.clone(), condition.status.clone());
            }
            Err(e) => warn!(
                condition = %condition.type_,
                error = %e,
                "failed to update pod condition"
            ),
        }
    }
}
