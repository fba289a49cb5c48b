// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lifecycle of the per-port syncers.
//!
//! The manager keeps one live syncer per desired [`PortInfoMap`] entry and
//! stops syncers whose entries disappear. Stopped syncers stay in a
//! `stopping` list until their task exits; their NEGs are still considered
//! live by garbage collection until then. Node-IP entries are marked pending
//! from before their backend service is ensured until their syncer is in the
//! table, so a sweep never sees that backend service unowned.
//!
//! Custom-named NEGs do not carry the cluster prefix. When their syncer
//! stops, the name is queued for the next garbage collection.
//!
//! The syncer table is guarded by one lock. No remote call is made while it
//! is held.

use super::{SyncerContext, SyncerHandle};
use crate::backends::{Backends, L4BackendServiceParams};
use crate::gc::{GarbageCollector, GcReport};
use crate::types::{NetworkEndpointType, PortInfo, PortInfoMap, PortInfoMapKey};
use anyhow::{anyhow, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

#[derive(Default)]
struct ManagerState {
    syncers: HashMap<PortInfoMapKey, SyncerHandle>,
    stopping: Vec<SyncerHandle>,
    /// Node-IP NEG names whose backend service is being ensured
    pending: BTreeSet<String>,
    /// Custom NEG names left behind by stopped syncers
    custom_deletes: BTreeSet<String>,
    shutting_down: bool,
}

impl ManagerState {
    fn live_names(&self) -> BTreeSet<String> {
        self.syncers
            .values()
            .chain(self.stopping.iter())
            .map(|h| h.info().neg_name.clone())
            .chain(self.pending.iter().cloned())
            .collect()
    }

    fn retire(&mut self, handle: SyncerHandle) {
        info!(service = %handle.key(), neg = %handle.info().neg_name, "Stopping syncer");
        handle.stop();
        if handle.info().custom_name {
            self.custom_deletes.insert(handle.info().neg_name.clone());
        }
        self.stopping.push(handle);
    }
}

/// Owns every live syncer.
pub struct SyncerManager {
    ctx: SyncerContext,
    backends: Arc<Backends>,
    collector: GarbageCollector,
    state: Mutex<ManagerState>,
}

impl SyncerManager {
    #[must_use]
    pub fn new(ctx: SyncerContext, backends: Arc<Backends>, collector: GarbageCollector) -> Self {
        Self {
            ctx,
            backends,
            collector,
            state: Mutex::new(ManagerState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Converge the syncers of service `namespace/name` onto `desired`.
    ///
    /// Entries missing from `desired` are stopped; new entries get a syncer.
    /// An entry whose attributes changed keeps its old syncer until the
    /// replacement is ready. Node-IP entries first have their regional
    /// backend service ensured, and a failure there keeps that one syncer
    /// from starting (or being replaced) without affecting the others.
    ///
    /// Returns `(success_count, error_count, result)` where `result` carries
    /// every error encountered.
    pub async fn ensure_syncers(
        &self,
        namespace: &str,
        name: &str,
        desired: &PortInfoMap,
    ) -> (usize, usize, Result<()>) {
        let to_start = {
            let mut state = self.state();
            if state.shutting_down {
                return (0, 0, Err(anyhow!("syncer manager is shutting down")));
            }

            let removed: Vec<PortInfoMapKey> = state
                .syncers
                .keys()
                .filter(|key| key.namespace == namespace && key.name == name)
                .filter(|key| desired.get(key).is_none())
                .cloned()
                .collect();
            for key in removed {
                if let Some(handle) = state.syncers.remove(&key) {
                    state.retire(handle);
                }
            }

            let to_start: Vec<(PortInfoMapKey, PortInfo)> = desired
                .iter()
                .filter(|(key, info)| state.syncers.get(*key).map(SyncerHandle::info) != Some(*info))
                .map(|(key, info)| (key.clone(), info.clone()))
                .collect();
            for (_, info) in &to_start {
                if info.endpoint_type == NetworkEndpointType::VmIp {
                    state.pending.insert(info.neg_name.clone());
                }
            }
            to_start
        };

        let mut errors = Vec::new();
        let mut ready = Vec::with_capacity(to_start.len());
        let mut pending = Vec::new();
        for (key, info) in to_start {
            if info.endpoint_type == NetworkEndpointType::VmIp {
                pending.push(info.neg_name.clone());
                if let Err(e) = self.ensure_backend_service(&key, &info).await {
                    warn!(service = %key, neg = %info.neg_name, error = %e, "Failed to ensure L4 backend service");
                    errors.push(format!("{key}: {e}"));
                    continue;
                }
            }
            ready.push((key, info));
        }

        {
            let mut state = self.state();
            for neg in &pending {
                state.pending.remove(neg);
            }
            if state.shutting_down {
                return (0, 0, Err(anyhow!("syncer manager is shutting down")));
            }
            for (key, info) in ready {
                let current = state.syncers.get(&key).map(|h| h.info() == &info);
                match current {
                    // another pass started it in the meantime
                    Some(true) => continue,
                    Some(false) => {
                        if let Some(old) = state.syncers.remove(&key) {
                            state.retire(old);
                        }
                    }
                    None => {}
                }
                state.custom_deletes.remove(&info.neg_name);
                let handle = SyncerHandle::spawn(self.ctx.clone(), key.clone(), info);
                state.syncers.insert(key, handle);
            }
        }

        let error_count = errors.len();
        let success_count = desired.len() - error_count;
        let result = if errors.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "failed to ensure {error_count} syncer(s) for {namespace}/{name}: {}",
                errors.join("; ")
            ))
        };
        (success_count, error_count, result)
    }

    async fn ensure_backend_service(&self, key: &PortInfoMapKey, info: &PortInfo) -> Result<()> {
        let Some(l4) = &info.l4 else {
            return Ok(());
        };
        let params = L4BackendServiceParams {
            name: info.neg_name.clone(),
            health_check_link: self.ctx.config.health_check_url(&info.neg_name),
            protocol: l4.protocol.clone(),
            session_affinity: l4.session_affinity.clone(),
            scheme: l4.load_balancing_scheme.clone(),
            service_key: format!("{}/{}", key.namespace, key.name),
            network: info.network.clone(),
            connection_tracking: l4.connection_tracking.clone(),
        };
        self.backends.ensure_l4_backend_service(&params).await?;
        Ok(())
    }

    /// Stop every syncer of service `namespace/name`.
    pub fn stop_syncer(&self, namespace: &str, name: &str) {
        let mut state = self.state();
        let keys: Vec<PortInfoMapKey> = state
            .syncers
            .keys()
            .filter(|key| key.namespace == namespace && key.name == name)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = state.syncers.remove(&key) {
                state.retire(handle);
            }
        }
    }

    /// Trigger a pass of every syncer of service `namespace/name`.
    pub fn sync(&self, namespace: &str, name: &str) {
        let state = self.state();
        for (key, handle) in &state.syncers {
            if key.namespace == namespace && key.name == name {
                debug!(service = %key, "Triggering syncer");
                handle.sync();
            }
        }
    }

    /// Trigger a pass of every node-IP syncer. Never starts or stops syncers.
    pub fn sync_nodes(&self) {
        let state = self.state();
        for handle in state
            .syncers
            .values()
            .filter(|h| h.info().endpoint_type == NetworkEndpointType::VmIp)
        {
            handle.sync();
        }
    }

    /// Names of NEGs still owned by a live, stopping or pending syncer.
    #[must_use]
    pub fn live_neg_names(&self) -> BTreeSet<String> {
        self.state().live_names()
    }

    /// Number of live syncers.
    #[must_use]
    pub fn syncer_count(&self) -> usize {
        self.state().syncers.len()
    }

    /// `true` if a live syncer exists for `key`.
    #[must_use]
    pub fn has_syncer(&self, key: &PortInfoMapKey) -> bool {
        self.state().syncers.contains_key(key)
    }

    /// Delete orphaned remote objects.
    ///
    /// Remote objects are listed first; the live set is read afterwards, so
    /// anything a syncer created during the listing is kept. Custom NEG names
    /// queued by stopped syncers are dropped from the queue once they are
    /// gone or owned again.
    ///
    /// # Errors
    ///
    /// Returns the aggregated sweep error.
    pub async fn gc(&self) -> Result<GcReport> {
        let custom = self.state().custom_deletes.clone();
        let candidates = self.collector.list_candidates(&custom).await;
        let complete = candidates.is_complete();

        let live = {
            let mut state = self.state();
            state.stopping.retain(|h| !h.is_stopped());
            state.live_names()
        };
        let report = self.collector.delete_orphans(candidates, &live).await;

        if complete {
            let mut state = self.state();
            state
                .custom_deletes
                .retain(|neg| live.contains(neg) || report.undeleted_negs.contains(neg));
        }
        report.into_result()
    }

    /// Stop every syncer and refuse new ones.
    pub fn shut_down(&self) {
        let mut state = self.state();
        state.shutting_down = true;
        let handles: Vec<SyncerHandle> = state.syncers.drain().map(|(_, h)| h).collect();
        for handle in handles {
            handle.stop();
            state.stopping.push(handle);
        }
        info!(stopping = state.stopping.len(), "Syncer manager shut down");
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
