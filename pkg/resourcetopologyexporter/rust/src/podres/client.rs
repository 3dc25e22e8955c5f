// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! gRPC client for the kubelet pod resources socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use hyper_util::rt::TokioIo;
use tokio::net::UnixStream;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint, Uri};
use tower::service_fn;
use tracing::{debug, info};

use super::PodResourcesLister;
use super::api::{
    AllocatableResourcesRequest, AllocatableResourcesResponse, ListPodResourcesRequest,
    ListPodResourcesResponse,
};
use crate::error::{Result, RteError};

pub const DEFAULT_SOCKET_PATH: &str = "/var/lib/kubelet/pod-resources/kubelet.sock";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const LIST_PATH: &str = "/v1.PodResourcesLister/List";
const GET_ALLOCATABLE_PATH: &str = "/v1.PodResourcesLister/GetAllocatableResources";

#[derive(Clone)]
pub struct GrpcPodResourcesClient {
    channel: Channel,
    socket_path: PathBuf,
}

impl GrpcPodResourcesClient {
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        if !socket_path.exists() {
            return Err(RteError::Transport(format!(
                "pod resources socket {} does not exist",
                socket_path.display()
            )));
        }

        let path = socket_path.to_path_buf();
        // The URI is ignored, the connector always dials the unix socket.
        let channel = Endpoint::try_from("http://[::]:50051")
            .map_err(|e| RteError::Transport(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .connect_with_connector(service_fn(move |_: Uri| {
                let path = path.clone();
                async move { UnixStream::connect(path).await.map(TokioIo::new) }
            }))
            .await
            .map_err(|e| {
                RteError::Transport(format!(
                    "connecting to {}: {e}",
                    socket_path.display()
                ))
            })?;

        info!(socket = %socket_path.display(), "connected to pod resources API");
        Ok(Self {
            channel,
            socket_path: socket_path.to_path_buf(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| RteError::Transport(format!("pod resources service not ready: {e}")))?;

        let codec = tonic_prost::ProstCodec::<Req, Resp>::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await
            .map_err(|status| {
                RteError::PodResources(format!(
                    "{path} on {}: {}",
                    self.socket_path.display(),
                    status.message()
                ))
            })?;
        debug!(method = path, "pod resources call completed");
        Ok(response.into_inner())
    }
}

#[async_trait]
impl PodResourcesLister for GrpcPodResourcesClient {
    async fn list(&self) -> Result<ListPodResourcesResponse> {
        self.unary(LIST_PATH, ListPodResourcesRequest {}).await
    }

    async fn get_allocatable_resources(&self) -> Result<AllocatableResourcesResponse> {
        self.unary(GET_ALLOCATABLE_PATH, AllocatableResourcesRequest {})
            .await
    }
}
