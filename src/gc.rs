// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Garbage collection of cluster-owned remote objects.
//!
//! A sweep runs in two phases. [`GarbageCollector::list_candidates`] lists
//! NEGs in every zone the cluster spans and backend services in both scopes,
//! keeping those whose names carry this cluster's prefix plus any custom NEG
//! names handed in by the caller. [`GarbageCollector::delete_orphans`] then
//! deletes the candidates missing from a live set taken *after* the listing,
//! so an object created by a syncer that started mid-sweep is never collected.
//!
//! Each candidate is attempted independently; failures are counted and
//! reported together at the end.

use crate::backends::Backends;
use crate::cloud::{ApiVersion, NegCloud, Scope};
use crate::metrics::MetricsSink;
use crate::namer::Namer;
use crate::types::EndpointsCalculatorMode;
use crate::zones::ZoneGetter;
use anyhow::{anyhow, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const KIND_NEG: &str = "networkEndpointGroup";
const KIND_BACKEND_SERVICE: &str = "backendService";

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub deleted_negs: usize,
    pub deleted_backend_services: usize,
    /// Orphaned NEGs still present after the sweep (in use or failed)
    pub undeleted_negs: BTreeSet<String>,
    pub errors: Vec<String>,
}

impl GcReport {
    /// `Ok(self)` when the sweep had no errors.
    ///
    /// # Errors
    ///
    /// Returns every list and delete failure in one error.
    pub fn into_result(self) -> Result<Self> {
        if self.errors.is_empty() {
            Ok(self)
        } else {
            Err(anyhow!(
                "garbage collection had {} error(s): {}",
                self.errors.len(),
                self.errors.join("; ")
            ))
        }
    }
}

/// Remote objects found by the listing phase of a sweep.
#[derive(Clone, Debug, Default)]
pub struct GcCandidates {
    /// `(zone, name)`
    negs: Vec<(String, String)>,
    backend_services: Vec<(Scope, String)>,
    errors: Vec<String>,
}

impl GcCandidates {
    /// `true` if every zone and scope was listed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn neg_names(&self) -> BTreeSet<&str> {
        self.negs.iter().map(|(_, name)| name.as_str()).collect()
    }
}

/// Deletes orphaned NEGs and backend services.
pub struct GarbageCollector {
    cloud: Arc<dyn NegCloud>,
    backends: Arc<Backends>,
    zones: Arc<dyn ZoneGetter>,
    namer: Namer,
    metrics: Arc<dyn MetricsSink>,
}

impl GarbageCollector {
    #[must_use]
    pub fn new(
        cloud: Arc<dyn NegCloud>,
        backends: Arc<Backends>,
        zones: Arc<dyn ZoneGetter>,
        namer: Namer,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            cloud,
            backends,
            zones,
            namer,
            metrics,
        }
    }

    /// Delete every cluster-owned object whose name is not in `live`.
    ///
    /// Only safe when `live` cannot grow while the sweep runs; the syncer
    /// manager uses the two phases directly.
    ///
    /// # Errors
    ///
    /// Returns an aggregated error if any list or delete failed. All other
    /// candidates are still attempted.
    pub async fn sweep(&self, live: &BTreeSet<String>) -> Result<GcReport> {
        let candidates = self.list_candidates(&BTreeSet::new()).await;
        self.delete_orphans(candidates, live).await.into_result()
    }

    fn all_zones(&self) -> BTreeSet<String> {
        [
            EndpointsCalculatorMode::L7,
            EndpointsCalculatorMode::L4Local,
            EndpointsCalculatorMode::L4Cluster,
        ]
        .into_iter()
        .flat_map(|mode| self.zones.list_zones(mode))
        .collect()
    }

    /// List the cluster-owned NEGs and backend services, plus NEGs named in
    /// `custom_negs`.
    pub async fn list_candidates(&self, custom_negs: &BTreeSet<String>) -> GcCandidates {
        let mut candidates = GcCandidates::default();

        for zone in self.all_zones() {
            match self.cloud.list_negs(&zone).await {
                Ok(negs) => candidates.negs.extend(
                    negs.into_iter()
                        .filter(|neg| {
                            self.namer.name_belongs_to_cluster(&neg.name)
                                || custom_negs.contains(&neg.name)
                        })
                        .map(|neg| (zone.clone(), neg.name)),
                ),
                Err(e) => {
                    warn!(zone = %zone, error = %e, "Failed to list NEGs");
                    candidates.errors.push(format!("list NEGs in {zone}: {e}"));
                }
            }
        }

        for scope in [Scope::Global, Scope::Regional] {
            match self.backends.list(ApiVersion::Ga, scope).await {
                Ok(services) => candidates
                    .backend_services
                    .extend(services.into_iter().map(|bs| (scope, bs.name))),
                Err(e) => {
                    warn!(scope = %scope, error = %e, "Failed to list backend services");
                    candidates
                        .errors
                        .push(format!("list {scope} backend services: {e}"));
                }
            }
        }

        candidates
    }

    /// Delete the candidates whose names are not in `live`.
    pub async fn delete_orphans(&self, candidates: GcCandidates, live: &BTreeSet<String>) -> GcReport {
        let mut report = GcReport {
            errors: candidates.errors,
            ..Default::default()
        };

        for (zone, name) in candidates.negs.into_iter().filter(|(_, n)| !live.contains(n)) {
            info!(neg = %name, zone = %zone, "Deleting orphaned NEG");
            match self.cloud.delete_neg(&name, &zone).await {
                Ok(()) => {
                    self.metrics.record_gc_deletion(KIND_NEG, "success");
                    report.deleted_negs += 1;
                }
                Err(e) if e.is_not_found() => {
                    debug!(neg = %name, zone = %zone, "NEG already gone");
                    self.metrics.record_gc_deletion(KIND_NEG, "success");
                }
                Err(e) if e.is_in_use() => {
                    debug!(neg = %name, zone = %zone, error = %e, "NEG still in use, retrying next sweep");
                    self.metrics.record_gc_deletion(KIND_NEG, "success");
                    report.undeleted_negs.insert(name);
                }
                Err(e) => {
                    warn!(neg = %name, zone = %zone, error = %e, "Failed to delete NEG");
                    self.metrics.record_gc_deletion(KIND_NEG, "error");
                    report.errors.push(format!("delete NEG {name} in {zone}: {e}"));
                    report.undeleted_negs.insert(name);
                }
            }
        }

        for (scope, name) in candidates
            .backend_services
            .into_iter()
            .filter(|(_, n)| !live.contains(n))
        {
            match self.backends.delete(&name, ApiVersion::Ga, scope).await {
                Ok(()) => {
                    self.metrics.record_gc_deletion(KIND_BACKEND_SERVICE, "success");
                    report.deleted_backend_services += 1;
                }
                Err(e) => {
                    self.metrics.record_gc_deletion(KIND_BACKEND_SERVICE, "error");
                    report
                        .errors
                        .push(format!("delete backend service {name}: {e}"));
                }
            }
        }

        info!(
            deleted_negs = report.deleted_negs,
            deleted_backend_services = report.deleted_backend_services,
            errors = report.errors.len(),
            "Garbage collection finished"
        );
        report
    }
}

#[cfg(test)]
#[path = "gc_tests.rs"]
mod gc_tests;
