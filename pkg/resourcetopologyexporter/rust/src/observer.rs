// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

use k8s_openapi::api::core::v1::PodCondition;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::notification::ChangeEvent;
use crate::podreadiness::{self, ConditionType};
use crate::resourcemonitor::{Info, ResourceMonitor};

/// observer -> updater. Snapshots supersede each other, so one slot is enough.
pub const INFOS_CAPACITY: usize = 1;

/// Turns change events into resource snapshots.
pub struct ResourceObserver {
    monitor: ResourceMonitor,
    infos: mpsc::Sender<Info>,
}

impl ResourceObserver {
    pub fn new(monitor: ResourceMonitor) -> (Self, mpsc::Receiver<Info>) {
        let (infos, rx) = mpsc::channel(INFOS_CAPACITY);
        (Self { monitor, infos }, rx)
    }

    /// Scan once at startup, then once per event, until the source closes
    /// or the updater goes away.
    ///
    /// A failed scan skips the cycle; the next event recomputes everything.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ChangeEvent>,
        conditions: Option<mpsc::Sender<PodCondition>>,
    ) {
        info!("resource observer started");
        if self.cycle(conditions.as_ref()).await {
            while events.recv().await.is_some() {
                debug!("change event received");
                if !self.cycle(conditions.as_ref()).await {
                    break;
                }
            }
        }
        info!("resource observer stopped");
    }

    /// Returns false once nobody consumes snapshots anymore.
    async fn cycle(&mut self, conditions: Option<&mpsc::Sender<PodCondition>>) -> bool {
        let info = match self.monitor.scan().await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "failed to scan pod resources, skipping cycle");
                podreadiness::set_condition(
                    conditions,
                    ConditionType::PodresourcesFetched,
                    false,
                    &e.to_string(),
                )
                .await;
                return true;
            }
        };
        podreadiness::set_condition(conditions, ConditionType::PodresourcesFetched, true, "")
            .await;

        if self.infos.send(info).await.is_err() {
            debug!("snapshot consumer gone");
            return false;
        }
        true
    }
}
