// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Shared CPU pool middleware.
//!
//! Kubelet reports the shared pool CPUs for containers that have no exclusive
//! allocation. Given a reference container known to run in the shared pool,
//! its CPUs are stripped from every container so that only exclusive
//! assignments count as consumed.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::PodResourcesLister;
use super::api::{AllocatableResourcesResponse, ListPodResourcesResponse};
use crate::error::{Result, RteError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerIdent {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

impl FromStr for ContainerIdent {
    type Err = RteError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [namespace, pod_name, container_name]
                if !namespace.is_empty() && !pod_name.is_empty() && !container_name.is_empty() =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    pod_name: pod_name.to_string(),
                    container_name: container_name.to_string(),
                })
            }
            _ => Err(RteError::InvalidReferenceContainer(s.to_string())),
        }
    }
}

impl fmt::Display for ContainerIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.pod_name, self.container_name
        )
    }
}

pub struct SharedCpusPoolLister {
    inner: Arc<dyn PodResourcesLister>,
    reference: ContainerIdent,
}

impl SharedCpusPoolLister {
    pub fn new(inner: Arc<dyn PodResourcesLister>, reference: ContainerIdent) -> Self {
        Self { inner, reference }
    }

    fn shared_pool(&self, resp: &ListPodResourcesResponse) -> Option<HashSet<i64>> {
        resp.pod_resources
            .iter()
            .filter(|pod| {
                pod.namespace == self.reference.namespace && pod.name == self.reference.pod_name
            })
            .flat_map(|pod| pod.containers.iter())
            .find(|container| container.name == self.reference.container_name)
            .map(|container| container.cpu_ids.iter().copied().collect())
    }
}

#[async_trait]
impl PodResourcesLister for SharedCpusPoolLister {
    async fn list(&self) -> Result<ListPodResourcesResponse> {
        let mut resp = self.inner.list().await?;
        let Some(shared) = self.shared_pool(&resp) else {
            warn!(
                reference = %self.reference,
                "reference container not found, cannot detect shared cpu pool"
            );
            return Ok(resp);
        };
        debug!(reference = %self.reference, cpus = ?shared, "shared cpu pool");

        for pod in &mut resp.pod_resources {
            for container in &mut pod.containers {
                container.cpu_ids.retain(|cpu| !shared.contains(cpu));
            }
        }
        Ok(resp)
    }

    async fn get_allocatable_resources(&self) -> Result<AllocatableResourcesResponse> {
        self.inner.get_allocatable_resources().await
    }
}
