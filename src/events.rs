// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cluster events in, work queue keys and Kubernetes Events out.
//!
//! [`Enqueuer`] turns watch events on Services, Ingresses, EndpointSlices and
//! Nodes into keys on the controller's three queues. [`EventPublisher`]
//! reports processing problems back on the Service as Warning events.

use crate::config::ControllerConfig;
use crate::queue::WorkQueue;
use crate::resolver::ingress::{has_default_backend, ingress_service_keys, is_gce_ingress};
use crate::syncer::endpoints::slice_service_name;
use crate::types::EndpointsCalculatorMode;
use crate::zones::is_candidate_node;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, ObjectReference, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Warning reasons attached to Services.
pub mod reasons {
    /// Processing the service failed and will be retried
    pub const PROCESS_SERVICE_FAILED: &str = "ProcessServiceFailed";
    /// The service was deliberately not processed
    pub const PROCESS_SERVICE_SKIPPED: &str = "ProcessServiceSkipped";
}

/// Event action reported with every Warning.
pub const ACTION_SYNC: &str = "SyncNetworkEndpointGroups";

/// A change observed on a watched object.
#[derive(Clone, Debug)]
pub enum ResourceEvent<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

fn object_key<K: Resource>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{ns}/{}", obj.name_any()),
        None => obj.name_any(),
    }
}

/// Keys of the services an ingress change must reprocess.
///
/// The default backend service is included when the ingress has no default
/// backend of its own, since it then serves unmatched traffic.
#[must_use]
pub fn ingress_event_keys(ing: &Ingress, config: &ControllerConfig) -> BTreeSet<String> {
    let mut keys = ingress_service_keys(ing);
    if !has_default_backend(ing) {
        if let Some(default_backend) = &config.default_backend {
            keys.insert(default_backend.key());
        }
    }
    keys
}

/// `true` if a node update changes the node's eligibility for any NEG type.
#[must_use]
pub fn node_candidacy_changed(old: &Node, new: &Node) -> bool {
    [
        EndpointsCalculatorMode::L7,
        EndpointsCalculatorMode::L4Cluster,
    ]
    .into_iter()
    .any(|mode| is_candidate_node(old, mode) != is_candidate_node(new, mode))
}

/// Routes watch events to the controller queues.
#[derive(Clone)]
pub struct Enqueuer {
    services: WorkQueue,
    endpoints: WorkQueue,
    nodes: WorkQueue,
    config: Arc<ControllerConfig>,
}

impl Enqueuer {
    #[must_use]
    pub fn new(
        services: WorkQueue,
        endpoints: WorkQueue,
        nodes: WorkQueue,
        config: Arc<ControllerConfig>,
    ) -> Self {
        Self {
            services,
            endpoints,
            nodes,
            config,
        }
    }

    pub fn on_service(&self, event: &ResourceEvent<Service>) {
        let svc = match event {
            ResourceEvent::Added(svc) | ResourceEvent::Deleted(svc) => svc,
            ResourceEvent::Updated { new, .. } => new,
        };
        self.services.add(&object_key(svc.as_ref()));
    }

    pub fn on_ingress(&self, event: &ResourceEvent<Ingress>) {
        let regional = self.config.enable_ingress_regional_external;
        let keys = match event {
            ResourceEvent::Added(ing) | ResourceEvent::Deleted(ing) => {
                if !is_gce_ingress(ing, regional) {
                    debug!(ingress = %object_key(ing.as_ref()), "Ignoring non-GCE ingress");
                    return;
                }
                ingress_event_keys(ing, &self.config)
            }
            ResourceEvent::Updated { old, new } => {
                if !is_gce_ingress(old, regional) && !is_gce_ingress(new, regional) {
                    debug!(ingress = %object_key(new.as_ref()), "Ignoring non-GCE ingress update");
                    return;
                }
                let mut keys = ingress_event_keys(old, &self.config);
                keys.extend(ingress_event_keys(new, &self.config));
                keys
            }
        };
        for key in keys {
            self.services.add(&key);
        }
    }

    pub fn on_endpoint_slice(&self, event: &ResourceEvent<EndpointSlice>) {
        let slice = match event {
            ResourceEvent::Added(s) | ResourceEvent::Deleted(s) => s,
            ResourceEvent::Updated { new, .. } => new,
        };
        let (Some(namespace), Some(service)) = (slice.namespace(), slice_service_name(slice))
        else {
            debug!(slice = %slice.name_any(), "EndpointSlice without owning service");
            return;
        };
        self.endpoints.add(&format!("{namespace}/{service}"));
    }

    pub fn on_node(&self, event: &ResourceEvent<Node>) {
        let node = match event {
            ResourceEvent::Added(node) | ResourceEvent::Deleted(node) => node,
            ResourceEvent::Updated { old, new } => {
                if !node_candidacy_changed(old, new) {
                    return;
                }
                new
            }
        };
        self.nodes.add(&node.name_any());
    }
}

/// Publishes Kubernetes Events. Failures are logged, never returned.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publish a Warning on a service.
pub async fn warn_service(publisher: &dyn EventPublisher, service: &Service, reason: &str, note: String) {
    publisher
        .publish(&service.object_ref(&()), EventType::Warning, reason, ACTION_SYNC, Some(note))
        .await;
}

/// [`EventPublisher`] backed by `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;
