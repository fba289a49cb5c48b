// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! NEG controller: queue workers and the per-service reconciliation pass.
//!
//! Three queues feed three single-task workers:
//!
//! - **service**: resolve the desired NEGs, write the status annotation and
//!   converge the syncers
//! - **endpoint**: trigger the syncers of one service
//! - **node**: trigger every node-IP syncer
//!
//! Failed service passes are retried with per-key exponential backoff and
//! reported as a Warning event on the Service. Garbage collection runs on its
//! own timer.
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example(controller: std::sync::Arc<negsync::controller::NegController>) {
//! let runner = controller.clone();
//! let handle = tokio::spawn(async move { runner.run().await });
//! // ...
//! controller.shut_down();
//! let _ = handle.await;
//! # }
//! ```

use crate::context::{split_key, Context};
use crate::events::{reasons, warn_service, Enqueuer, EventPublisher};
use crate::queue::WorkQueue;
use crate::resolver::Resolver;
use crate::status::StatusWriter;
use crate::syncer::manager::SyncerManager;
use anyhow::{anyhow, Context as _, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Owns the work queues and drives every reconciliation.
pub struct NegController {
    ctx: Context,
    manager: Arc<SyncerManager>,
    status: StatusWriter,
    events: Arc<dyn EventPublisher>,
    service_queue: WorkQueue,
    endpoint_queue: WorkQueue,
    node_queue: WorkQueue,
    stop_tx: watch::Sender<bool>,
}

impl NegController {
    #[must_use]
    pub fn new(
        ctx: Context,
        manager: Arc<SyncerManager>,
        status: StatusWriter,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            ctx,
            manager,
            status,
            events,
            service_queue: WorkQueue::new("service"),
            endpoint_queue: WorkQueue::new("endpoint"),
            node_queue: WorkQueue::new("node"),
            stop_tx,
        }
    }

    /// Event router feeding this controller's queues.
    #[must_use]
    pub fn enqueuer(&self) -> Enqueuer {
        Enqueuer::new(
            self.service_queue.clone(),
            self.endpoint_queue.clone(),
            self.node_queue.clone(),
            self.ctx.config.clone(),
        )
    }

    #[must_use]
    pub fn service_queue(&self) -> &WorkQueue {
        &self.service_queue
    }

    #[must_use]
    pub fn manager(&self) -> &Arc<SyncerManager> {
        &self.manager
    }

    /// Run the workers and the garbage collector until [`NegController::shut_down`].
    pub async fn run(self: Arc<Self>) {
        info!("Starting NEG controller workers");
        let service_worker = tokio::spawn(self.clone().run_service_worker());
        let endpoint_worker = tokio::spawn(self.clone().run_endpoint_worker());
        let node_worker = tokio::spawn(self.clone().run_node_worker());
        let gc = tokio::spawn(self.clone().run_gc());

        for (name, task) in [
            ("service", service_worker),
            ("endpoint", endpoint_worker),
            ("node", node_worker),
            ("gc", gc),
        ] {
            if let Err(e) = task.await {
                error!(worker = name, error = %e, "Worker task failed");
            }
        }
        info!("NEG controller stopped");
    }

    /// Stop the queues, the garbage collector and every syncer.
    pub fn shut_down(&self) {
        info!("Shutting down NEG controller");
        self.service_queue.shut_down();
        self.endpoint_queue.shut_down();
        self.node_queue.shut_down();
        let _ = self.stop_tx.send(true);
        self.manager.shut_down();
    }

    /// `false` once no service or endpoint pass has completed within the staleness bound.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        let healthy = self
            .ctx
            .tracker
            .is_fresh(Utc::now(), self.ctx.config.staleness_bound);
        if !healthy {
            warn!(last_sync = %self.ctx.tracker.get(), "No reconciliation pass within the staleness bound");
        }
        healthy
    }

    async fn run_service_worker(self: Arc<Self>) {
        while let Some(key) = self.service_queue.get().await {
            let result = self.process_service(&key).await;
            self.handle_service_err(&key, result).await;
            self.service_queue.done(&key);
        }
        debug!("Service worker exiting");
    }

    async fn run_endpoint_worker(self: Arc<Self>) {
        while let Some(key) = self.endpoint_queue.get().await {
            self.process_endpoint(&key);
            self.endpoint_queue.done(&key);
        }
        debug!("Endpoint worker exiting");
    }

    async fn run_node_worker(self: Arc<Self>) {
        while let Some(key) = self.node_queue.get().await {
            debug!(node = %key, "Node changed, syncing node-IP NEGs");
            let start = Instant::now();
            self.manager.sync_nodes();
            self.ctx
                .metrics
                .record_reconciliation("node", true, start.elapsed());
            self.node_queue.done(&key);
        }
        debug!("Node worker exiting");
    }

    async fn run_gc(self: Arc<Self>) {
        let period = self.ctx.config.gc_period;
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            tokio::select! {
                _ = stop_rx.changed() => continue,
                () = tokio::time::sleep(period) => {}
            }
            if let Err(e) = self.manager.gc().await {
                warn!(error = %e, "Garbage collection failed");
                self.ctx.metrics.record_controller_error("gc");
            }
        }
        debug!("Garbage collector exiting");
    }

    /// Reconcile one service key.
    ///
    /// # Errors
    ///
    /// Returns resolution, status annotation and syncer errors. Syncer errors
    /// are reported after every other syncer of the service was handled.
    pub async fn process_service(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let result = self.sync_service(key).await;
        self.ctx
            .metrics
            .record_reconciliation("service", result.is_ok(), start.elapsed());
        self.ctx.metrics.set_last_sync(self.ctx.tracker.track());
        result
    }

    async fn sync_service(&self, key: &str) -> Result<()> {
        let (namespace, name) =
            split_key(key).ok_or_else(|| anyhow!("invalid service key {key}"))?;

        let Some(service) = self.ctx.stores.get_service(namespace, name) else {
            info!(service = %key, "Service not found, stopping its syncers");
            self.ctx.metrics.delete_neg_usage(key);
            self.manager.stop_syncer(namespace, name);
            return Ok(());
        };

        let ingresses = self.ctx.stores.ingresses();
        let resolution = Resolver::new(&self.ctx.config, &self.ctx.namer)
            .resolve(&service, &ingresses)
            .with_context(|| format!("failed to resolve NEGs of service {key}"))?;

        if let Some(reason) = &resolution.skipped {
            info!(service = %key, reason = %reason, "Skipping L4 NEG");
            warn_service(
                self.events.as_ref(),
                &service,
                reasons::PROCESS_SERVICE_SKIPPED,
                reason.clone(),
            )
            .await;
        }

        let map = &resolution.port_info_map;
        if map.is_empty() {
            debug!(service = %key, "Service needs no NEGs");
            self.ctx.metrics.delete_neg_usage(key);
            self.manager.stop_syncer(namespace, name);
            return self.status.sync(&service, map).await;
        }

        self.status.sync(&service, map).await?;

        let (success, errored, result) = self.manager.ensure_syncers(namespace, name, map).await;
        let mut usage = resolution.usage;
        usage.successful = success;
        usage.errored = errored;
        self.ctx.metrics.set_neg_usage(key, usage);
        debug!(service = %key, negs = map.len(), success, errored, "Service processed");
        result
    }

    /// Trigger the syncers of the service behind an endpoint key.
    pub fn process_endpoint(&self, key: &str) {
        let start = Instant::now();
        match split_key(key) {
            Some((namespace, name)) => self.manager.sync(namespace, name),
            None => warn!(key = %key, "Ignoring invalid endpoint key"),
        }
        self.ctx
            .metrics
            .record_reconciliation("endpoint", true, start.elapsed());
        self.ctx.metrics.set_last_sync(self.ctx.tracker.track());
    }

    async fn handle_service_err(&self, key: &str, result: Result<()>) {
        let Err(e) = result else {
            self.service_queue.forget(key);
            return;
        };

        let requeues = self.service_queue.num_requeues(key);
        warn!(service = %key, error = %format!("{e:#}"), requeues, "Failed to process service, requeuing");
        self.ctx.metrics.record_controller_error("service");

        if let Some(service) = split_key(key)
            .and_then(|(namespace, name)| self.ctx.stores.get_service(namespace, name))
        {
            warn_service(
                self.events.as_ref(),
                &service,
                reasons::PROCESS_SERVICE_FAILED,
                format!("{e:#}"),
            )
            .await;
        }
        self.service_queue.add_rate_limited(key);
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod controller_tests;
