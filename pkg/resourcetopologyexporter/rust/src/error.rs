// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RteError {
    // Startup errors
    #[error("invalid watch path {}: {reason}", path.display())]
    InvalidWatchPath { path: PathBuf, reason: String },

    #[error("event source is already running")]
    AlreadyRunning,

    #[error("event stream was already taken")]
    EventsTaken,

    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    #[error("kubelet config {}: {reason}", path.display())]
    KubeletConfig { path: PathBuf, reason: String },

    #[error("error getting topology manager settings: {0}")]
    TopologyManagerSettings(String),

    #[error("invalid reference container {0:?}: expected namespace/pod/container")]
    InvalidReferenceContainer(String),

    #[error("cannot determine node name: {0}")]
    NodeName(String),

    #[error("invalid exclude entry {entry:?}: {reason}")]
    InvalidExclude { entry: String, reason: &'static str },

    #[error("reading {}: {source}", path.display())]
    Sysfs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file watch setup failed: {0}")]
    Notify(#[from] notify::Error),

    // Per-cycle errors
    #[error("pod resources query failed: {0}")]
    PodResources(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("conflict updating {0}")]
    Conflict(String),

    #[error("cluster API error: {0}")]
    Api(String),

    #[error("pod readiness: {0}")]
    Readiness(String),

    #[error("refusing to publish invalid topology for {0}")]
    InvalidTopology(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("task {name} failed: {reason}")]
    Task { name: &'static str, reason: String },
}

impl RteError {
    /// Errors that abandon a single cycle; the next trigger retries from scratch.
    /// `Serialization` is here because documents read back from the API may be
    /// malformed by other writers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RteError::PodResources(_)
                | RteError::Transport(_)
                | RteError::Conflict(_)
                | RteError::Api(_)
                | RteError::InvalidTopology(_)
                | RteError::Serialization(_)
        )
    }
}

impl From<kube::Error> for RteError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) if resp.code == 409 => RteError::Conflict(resp.message),
            other => RteError::Api(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, RteError>;
