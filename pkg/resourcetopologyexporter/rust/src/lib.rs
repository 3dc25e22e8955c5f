// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Node-resident exporter of NUMA-zone resource topology.
//!
//! The exporter watches kubelet state for resource assignment changes and
//! republishes the per-zone availability of the node as a
//! `NodeResourceTopology` object, so that a topology-aware scheduler can place
//! pods without querying the node.
//!
//! ## Pipeline
//!
//! ```text
//! EventSource -> [RateLimiter] -> ResourceObserver -> NrtUpdater -> cluster API
//!                                       \                 /
//!                                        +-> ConditionInjector (optional)
//! ```
//!
//! Every stage is an independent tokio task; stages are connected by bounded
//! `mpsc` channels with a single consumer each. A slow stage throttles the one
//! upstream of it, and a dropped trigger is recovered by the next one since
//! every snapshot is recomputed from scratch.

pub mod config;
pub mod error;
pub mod exporter;
pub mod kubeconf;
pub mod nodetopology;
pub mod notification;
pub mod nrt;
pub mod nrtupdater;
pub mod observer;
pub mod podreadiness;
pub mod podres;
pub mod ratelimiter;
pub mod resourcemonitor;
pub mod sysinfo;
pub mod tmsettings;

pub use error::{Result, RteError};
