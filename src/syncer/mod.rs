// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-port NEG syncers.
//!
//! Each live [`PortInfo`] entry gets one syncer task. A pass:
//!
//! 1. lists the zones for the entry's endpoint calculation mode
//! 2. ensures the NEG exists in each zone
//! 3. computes the target endpoints and attaches or detaches the difference
//!
//! Passes run on demand ([`SyncerHandle::sync`]), after a jittered resync
//! period, or after a backoff delay when the previous pass failed. A syncer
//! runs until [`SyncerHandle::stop`]; it never touches other syncers' NEGs.

pub mod endpoints;
pub mod manager;

use crate::cloud::{NegCloud, NetworkEndpoint, NetworkEndpointGroup};
use crate::config::ControllerConfig;
use crate::errors::CloudError;
use crate::metrics::MetricsSink;
use crate::queue::backoff::syncer_backoff;
use crate::types::{PortInfo, PortInfoMapKey};
use crate::zones::ZoneGetter;
use chrono::{DateTime, Utc};
use endpoints::{calculate_endpoints, EndpointSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum endpoints per attach or detach call.
const MAX_ENDPOINTS_PER_BATCH: usize = 500;

/// Shared collaborators of every syncer.
#[derive(Clone)]
pub struct SyncerContext {
    pub cloud: Arc<dyn NegCloud>,
    pub zones: Arc<dyn ZoneGetter>,
    pub endpoints: Arc<dyn EndpointSource>,
    pub metrics: Arc<dyn MetricsSink>,
    pub config: Arc<ControllerConfig>,
}

/// Observable progress of a syncer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncerStatus {
    /// Completed passes, successful or not
    pub passes: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Description recorded on NEGs we create.
#[derive(Serialize, Deserialize)]
struct NegDescription<'a> {
    #[serde(rename = "cluster-uid")]
    cluster_uid: &'a str,
    namespace: &'a str,
    #[serde(rename = "service-name")]
    service_name: &'a str,
    port: String,
}

/// Handle to a running syncer task.
pub struct SyncerHandle {
    key: PortInfoMapKey,
    info: PortInfo,
    notify: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<SyncerStatus>,
    task: JoinHandle<()>,
}

impl SyncerHandle {
    /// Spawn the syncer task for one entry. The first pass starts immediately.
    #[must_use]
    pub fn spawn(ctx: SyncerContext, key: PortInfoMapKey, info: PortInfo) -> Self {
        let notify = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(SyncerStatus::default());

        let syncer = Syncer {
            ctx,
            key: key.clone(),
            info: info.clone(),
            notify: notify.clone(),
            status: status_tx,
        };
        let task = tokio::spawn(syncer.run(stop_rx));

        info!(service = %key, neg = %info.neg_name, mode = %info.mode, "Started syncer");
        Self {
            key,
            info,
            notify,
            stop_tx,
            status_rx,
            task,
        }
    }

    #[must_use]
    pub fn key(&self) -> &PortInfoMapKey {
        &self.key
    }

    #[must_use]
    pub fn info(&self) -> &PortInfo {
        &self.info
    }

    /// Request a pass. Requests made while a pass runs coalesce into one more pass.
    pub fn sync(&self) {
        self.notify.notify_one();
    }

    /// Ask the task to exit after its current pass.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// `true` once the task has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    #[must_use]
    pub fn status(&self) -> SyncerStatus {
        self.status_rx.borrow().clone()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncerStatus> {
        self.status_rx.clone()
    }
}

struct Syncer {
    ctx: SyncerContext,
    key: PortInfoMapKey,
    info: PortInfo,
    notify: Arc<Notify>,
    status: watch::Sender<SyncerStatus>,
}

impl Syncer {
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        let mut backoff = syncer_backoff();
        loop {
            if *stop_rx.borrow() {
                break;
            }

            let start = Instant::now();
            let result = self.sync_once().await;
            self.ctx
                .metrics
                .record_reconciliation("syncer", result.is_ok(), start.elapsed());

            let wait = match &result {
                Ok(()) => {
                    backoff.reset();
                    backoff.apply_jitter(self.ctx.config.resync_period)
                }
                Err(e) => {
                    let delay = backoff.next_backoff();
                    warn!(service = %self.key, neg = %self.info.neg_name, error = %e, retry_in = ?delay, "NEG sync failed");
                    delay
                }
            };
            self.status.send_modify(|status| {
                status.passes += 1;
                match result {
                    Ok(()) => {
                        status.last_success = Some(Utc::now());
                        status.last_error = None;
                    }
                    Err(e) => status.last_error = Some(e.to_string()),
                }
            });

            tokio::select! {
                _ = stop_rx.changed() => {}
                () = self.notify.notified() => {}
                () = tokio::time::sleep(wait) => {}
            }
        }
        info!(service = %self.key, neg = %self.info.neg_name, "Stopped syncer");
    }

    async fn sync_once(&self) -> Result<(), CloudError> {
        let zones = self.ctx.zones.list_zones(self.info.mode);
        for zone in &zones {
            self.ensure_neg(zone).await?;
        }

        let mut target = calculate_endpoints(
            &self.key,
            &self.info,
            self.ctx.endpoints.as_ref(),
            self.ctx.zones.as_ref(),
        );
        for zone in &zones {
            let desired = target.remove(zone).unwrap_or_default();
            self.sync_zone(zone, &desired).await?;
        }
        for zone in target.keys() {
            debug!(service = %self.key, zone = %zone, "Endpoints in a zone outside the NEG zones, skipping");
        }
        Ok(())
    }

    async fn ensure_neg(&self, zone: &str) -> Result<(), CloudError> {
        let name = self.info.neg_name.as_str();
        match self.ctx.cloud.get_neg(name, zone).await {
            Ok(existing) => {
                if existing.network_endpoint_type != self.info.endpoint_type {
                    return Err(CloudError::Api {
                        code: 409,
                        message: format!(
                            "NEG {name} in {zone} has type {} but {} is required",
                            existing.network_endpoint_type, self.info.endpoint_type
                        ),
                    });
                }
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                let description = serde_json::to_string(&NegDescription {
                    cluster_uid: &self.ctx.config.cluster_uid,
                    namespace: &self.key.namespace,
                    service_name: &self.key.name,
                    port: self.key.port.to_string(),
                })
                .unwrap_or_default();
                let neg = NetworkEndpointGroup {
                    name: name.to_string(),
                    network_endpoint_type: self.info.endpoint_type,
                    network: self.info.network.network_url.clone(),
                    subnetwork: self.info.network.subnetwork_url.clone(),
                    description,
                    zone: zone.to_string(),
                    self_link: String::new(),
                };
                info!(neg = %name, zone = %zone, service = %self.key, "Creating NEG");
                self.ctx.cloud.create_neg(&neg, zone).await
            }
            Err(e) => Err(e),
        }
    }

    async fn sync_zone(
        &self,
        zone: &str,
        desired: &BTreeSet<NetworkEndpoint>,
    ) -> Result<(), CloudError> {
        let name = self.info.neg_name.as_str();
        let current: BTreeSet<NetworkEndpoint> = self
            .ctx
            .cloud
            .list_network_endpoints(name, zone)
            .await?
            .into_iter()
            .collect();

        let to_attach: Vec<NetworkEndpoint> = desired.difference(&current).cloned().collect();
        let to_detach: Vec<NetworkEndpoint> = current.difference(desired).cloned().collect();
        if to_attach.is_empty() && to_detach.is_empty() {
            return Ok(());
        }

        debug!(neg = %name, zone = %zone, attach = to_attach.len(), detach = to_detach.len(), "Syncing NEG endpoints");
        for batch in to_attach.chunks(MAX_ENDPOINTS_PER_BATCH) {
            self.ctx.cloud.attach_network_endpoints(name, zone, batch).await?;
        }
        for batch in to_detach.chunks(MAX_ENDPOINTS_PER_BATCH) {
            self.ctx.cloud.detach_network_endpoints(name, zone, batch).await?;
        }
        Ok(())
    }
}
