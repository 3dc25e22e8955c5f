// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Resource-listing API: the kubelet pod resources service.

pub mod api;
pub mod client;
pub mod sharedcpuspool;

use async_trait::async_trait;

use crate::error::Result;

pub use api::{
    AllocatableResourcesResponse, ContainerDevices, ContainerMemory, ContainerResources,
    ListPodResourcesResponse, NumaNode, PodResources, TopologyInfo,
};
pub use client::{DEFAULT_SOCKET_PATH, GrpcPodResourcesClient};
pub use sharedcpuspool::{ContainerIdent, SharedCpusPoolLister};

/// Read-only view of the resources kubelet assigned to running containers.
#[async_trait]
pub trait PodResourcesLister: Send + Sync {
    /// Resources currently assigned to every running pod and container.
    async fn list(&self) -> Result<ListPodResourcesResponse>;

    /// Resources the node can hand out to containers.
    async fn get_allocatable_resources(&self) -> Result<AllocatableResourcesResponse>;
}
