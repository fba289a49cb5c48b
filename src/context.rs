// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for the controller workers.
//!
//! Workers never query the API server for the objects they reconcile; they
//! read the reflector stores kept warm by the watch pump. The stores are
//! eventually consistent, so a worker may briefly see an older revision than
//! the event that enqueued it. The next event for the same key corrects that.

use crate::config::ControllerConfig;
use crate::health::TimeTracker;
use crate::metrics::MetricsSink;
use crate::namer::Namer;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Reflector stores for every watched kind.
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub ingresses: Store<Ingress>,
    pub nodes: Store<Node>,
    pub endpoint_slices: Store<EndpointSlice>,
}

impl Stores {
    /// Look up a service by namespace and name.
    #[must_use]
    pub fn get_service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services
            .get(&ObjectRef::new(name).within(namespace))
    }

    /// Every cached ingress.
    #[must_use]
    pub fn ingresses(&self) -> Vec<Arc<Ingress>> {
        self.ingresses.state()
    }

    /// Wait until every store has seen its initial listing.
    ///
    /// # Errors
    ///
    /// Fails if a store's writer was dropped before it became ready.
    pub async fn wait_until_ready(&self) -> Result<(), kube::runtime::reflector::store::WriterDropped> {
        self.services.wait_until_ready().await?;
        self.ingresses.wait_until_ready().await?;
        self.nodes.wait_until_ready().await?;
        self.endpoint_slices.wait_until_ready().await
    }
}

/// Everything a worker needs besides its queue.
#[derive(Clone)]
pub struct Context {
    pub stores: Stores,
    pub config: Arc<ControllerConfig>,
    pub namer: Namer,
    pub metrics: Arc<dyn MetricsSink>,
    /// Completion time of the last service or endpoint pass
    pub tracker: Arc<TimeTracker>,
}

/// Split a `namespace/name` queue key.
#[must_use]
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    match key.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Some((namespace, name))
        }
        _ => None,
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod context_tests;
