// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Publication of the `NodeResourceTopology` document.
//!
//! The updater is the only writer of this node's document. It remembers the
//! last document it saw on the API and writes only when a snapshot changes
//! its content, so duplicate triggers cost a comparison and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Client;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, PostParams};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RteError};
use crate::nodetopology;
use crate::nrt::{self, NodeResourceTopology};
use crate::podreadiness::{self, ConditionType};
use crate::resourcemonitor::Info;
use crate::tmsettings::TmConfig;

const PLURAL: &str = "noderesourcetopologies";

#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Compute and log documents but never write them.
    pub no_publish: bool,
    /// Return after the first successful publish.
    pub oneshot: bool,
    /// Node name, used as the document name.
    pub hostname: String,
    pub debug: bool,
}

/// Cluster API operations on the per-node document.
#[async_trait]
pub trait TopologyClient: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<NodeResourceTopology>>;

    async fn create(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology>;

    /// Replace the stored document. Fails with [`RteError::Conflict`] when
    /// `nrt.metadata.resource_version` is stale.
    async fn update(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology>;
}

/// `TopologyClient` over the cluster-scoped `NodeResourceTopology` CRD.
pub struct KubeTopologyClient {
    api: Api<DynamicObject>,
    resource: ApiResource,
}

impl KubeTopologyClient {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk(nrt::API_GROUP, nrt::API_VERSION, nrt::KIND);
        let resource = ApiResource::from_gvk_with_plural(&gvk, PLURAL);
        Self {
            api: Api::all_with(client, &resource),
            resource,
        }
    }

    fn to_dynamic(&self, nrt: &NodeResourceTopology) -> Result<DynamicObject> {
        let mut value = serde_json::to_value(nrt)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("apiVersion".into(), self.resource.api_version.clone().into());
            obj.insert("kind".into(), self.resource.kind.clone().into());
        }
        Ok(serde_json::from_value(value)?)
    }

    fn from_dynamic(obj: DynamicObject) -> Result<NodeResourceTopology> {
        Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
    }
}

#[async_trait]
impl TopologyClient for KubeTopologyClient {
    async fn get(&self, name: &str) -> Result<Option<NodeResourceTopology>> {
        self.api
            .get_opt(name)
            .await?
            .map(Self::from_dynamic)
            .transpose()
    }

    async fn create(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology> {
        let obj = self.to_dynamic(nrt)?;
        Self::from_dynamic(self.api.create(&PostParams::default(), &obj).await?)
    }

    async fn update(&self, nrt: &NodeResourceTopology) -> Result<NodeResourceTopology> {
        let obj = self.to_dynamic(nrt)?;
        Self::from_dynamic(
            self.api
                .replace(nrt.name(), &PostParams::default(), &obj)
                .await?,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    /// Content matched the stored document.
    Unchanged,
    /// Publishing is disabled.
    Skipped,
}

pub struct NrtUpdater {
    args: Args,
    tm_config: TmConfig,
    client: Arc<dyn TopologyClient>,
    /// Last document known to be stored, with its API metadata.
    last: Option<NodeResourceTopology>,
    fetched: bool,
}

impl NrtUpdater {
    pub fn new(args: Args, tm_config: TmConfig, client: Arc<dyn TopologyClient>) -> Self {
        Self {
            args,
            tm_config,
            client,
            last: None,
            fetched: false,
        }
    }

    /// Candidate document for `info`.
    pub fn build(&self, info: &Info) -> NodeResourceTopology {
        let mut attributes = nrt::AttributeList::new();
        nrt::set_attribute(&mut attributes, nrt::ATTRIBUTE_POLICY, &self.tm_config.policy);
        nrt::set_attribute(&mut attributes, nrt::ATTRIBUTE_SCOPE, &self.tm_config.scope);
        for attr in &info.attributes {
            nrt::set_attribute(&mut attributes, &attr.name, &attr.value);
        }

        let mut doc = NodeResourceTopology {
            metadata: ObjectMeta {
                name: Some(self.args.hostname.clone()),
                ..Default::default()
            },
            topology_policies: vec![],
            zones: info.zones.clone(),
            attributes,
        };
        doc.normalize();
        doc
    }

    /// Publish `info` if it changes the stored document. Documents failing
    /// the structural checks of [`nodetopology::is_valid_node_topology`] are
    /// never written.
    pub async fn update(&mut self, info: &Info) -> Result<Outcome> {
        let mut candidate = self.build(info);
        if self.args.debug || self.args.no_publish {
            info!(document = %serde_json::to_string(&candidate)?, "computed topology");
        }
        if !nodetopology::is_valid_node_topology(
            Some(&candidate),
            &self.tm_config.policy,
            &self.tm_config.scope,
        ) {
            warn!(
                node = %self.args.hostname,
                zones = candidate.zones.len(),
                "computed topology is invalid, not publishing"
            );
            return Err(RteError::InvalidTopology(self.args.hostname.clone()));
        }
        if self.args.no_publish {
            return Ok(Outcome::Skipped);
        }

        if !self.fetched {
            self.last = self.client.get(&self.args.hostname).await?;
            self.fetched = true;
        }

        let result = match &self.last {
            Some(last) if last.same_content(&candidate) => return Ok(Outcome::Unchanged),
            Some(last) => {
                candidate.metadata = last.metadata.clone();
                self.client
                    .update(&candidate)
                    .await
                    .map(|doc| (doc, Outcome::Updated))
            }
            None => self
                .client
                .create(&candidate)
                .await
                .map(|doc| (doc, Outcome::Created)),
        };

        match result {
            Ok((doc, outcome)) => {
                self.last = Some(doc);
                Ok(outcome)
            }
            Err(e) => {
                // stored state unknown: read it back before the next write
                self.last = None;
                self.fetched = false;
                Err(e)
            }
        }
    }

    /// Consume snapshots until the observer stops. Failed cycles are logged
    /// and reported as a condition; the next snapshot retries.
    pub async fn run(
        mut self,
        mut infos: mpsc::Receiver<Info>,
        conditions: Option<mpsc::Sender<PodCondition>>,
    ) -> Result<()> {
        info!(
            node = %self.args.hostname,
            policy = %self.tm_config.policy,
            scope = %self.tm_config.scope,
            no_publish = self.args.no_publish,
            "topology updater started"
        );
        while let Some(info) = infos.recv().await {
            match self.update(&info).await {
                Ok(outcome) => {
                    debug!(?outcome, "topology update done");
                    podreadiness::set_condition(
                        conditions.as_ref(),
                        ConditionType::NodeTopologyUpdated,
                        true,
                        "",
                    )
                    .await;
                    if self.args.oneshot {
                        info!("oneshot update done");
                        return Ok(());
                    }
                }
                Err(e) => {
                    podreadiness::set_condition(
                        conditions.as_ref(),
                        ConditionType::NodeTopologyUpdated,
                        false,
                        &e.to_string(),
                    )
                    .await;
                    if e.is_retryable() {
                        warn!(error = %e, "topology update failed, retrying on next snapshot");
                    } else {
                        error!(error = %e, "topology update failed, retrying on next snapshot");
                    }
                }
            }
        }
        Err(RteError::ChannelClosed("resource snapshots"))
    }
}
