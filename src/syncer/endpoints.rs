// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Target endpoint calculation, per zone.
//!
//! - `L7`: ready pod addresses from the service's EndpointSlices, with the
//!   slice port matching the service port name
//! - `L4Local`: internal IPs of eligible nodes running a ready endpoint
//! - `L4Cluster`: internal IPs of eligible nodes, capped and picked in name order

use crate::cloud::NetworkEndpoint;
use crate::constants::MAX_L4_CLUSTER_ENDPOINTS;
use crate::labels::ENDPOINT_SLICE_SERVICE_NAME;
use crate::types::{EndpointsCalculatorMode, PortInfo, PortInfoMapKey};
use crate::zones::{is_candidate_node, node_internal_ip, node_zone, ZoneGetter};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointSlice};
use kube::runtime::reflector::Store;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

/// Desired endpoints keyed by zone.
pub type ZoneEndpoints = BTreeMap<String, BTreeSet<NetworkEndpoint>>;

/// Cluster state the endpoint calculation reads.
pub trait EndpointSource: Send + Sync {
    /// EndpointSlices owned by one service.
    fn endpoint_slices(&self, namespace: &str, service: &str) -> Vec<Arc<EndpointSlice>>;

    fn nodes(&self) -> Vec<Arc<Node>>;
}

/// [`EndpointSource`] over reflector stores.
#[derive(Clone)]
pub struct StoreEndpointSource {
    slices: Store<EndpointSlice>,
    nodes: Store<Node>,
}

impl StoreEndpointSource {
    #[must_use]
    pub fn new(slices: Store<EndpointSlice>, nodes: Store<Node>) -> Self {
        Self { slices, nodes }
    }
}

impl EndpointSource for StoreEndpointSource {
    fn endpoint_slices(&self, namespace: &str, service: &str) -> Vec<Arc<EndpointSlice>> {
        self.slices
            .state()
            .into_iter()
            .filter(|slice| slice.namespace().as_deref() == Some(namespace))
            .filter(|slice| slice_service_name(slice) == Some(service))
            .collect()
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.state()
    }
}

/// Owning service name of an EndpointSlice.
#[must_use]
pub fn slice_service_name(slice: &EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(ENDPOINT_SLICE_SERVICE_NAME))
        .map(String::as_str)
}

fn is_ready(endpoint: &Endpoint) -> bool {
    endpoint
        .conditions
        .as_ref()
        .and_then(|c| c.ready)
        .unwrap_or(true)
}

/// Compute the endpoints `info` should contain.
#[must_use]
pub fn calculate_endpoints(
    key: &PortInfoMapKey,
    info: &PortInfo,
    source: &dyn EndpointSource,
    zones: &dyn ZoneGetter,
) -> ZoneEndpoints {
    match info.mode {
        EndpointsCalculatorMode::L7 => pod_endpoints(key, info, source, zones),
        EndpointsCalculatorMode::L4Local => {
            let hosting: BTreeSet<String> = source
                .endpoint_slices(&key.namespace, &key.name)
                .iter()
                .flat_map(|slice| slice.endpoints.iter())
                .filter(|ep| is_ready(ep))
                .filter_map(|ep| ep.node_name.clone())
                .collect();
            node_endpoints(source, info.mode, |node| hosting.contains(&node.name_any()))
        }
        EndpointsCalculatorMode::L4Cluster => node_endpoints(source, info.mode, |_| true),
    }
}

fn pod_endpoints(
    key: &PortInfoMapKey,
    info: &PortInfo,
    source: &dyn EndpointSource,
    zones: &dyn ZoneGetter,
) -> ZoneEndpoints {
    let mut result = ZoneEndpoints::new();
    for slice in source.endpoint_slices(&key.namespace, &key.name) {
        let Some(port) = slice
            .ports
            .iter()
            .flatten()
            .find(|p| p.name.as_deref().unwrap_or_default() == info.port_tuple.name)
            .and_then(|p| p.port)
        else {
            continue;
        };

        for endpoint in slice.endpoints.iter().filter(|ep| is_ready(ep)) {
            let (Some(node), Some(ip)) = (endpoint.node_name.as_ref(), endpoint.addresses.first())
            else {
                continue;
            };
            let Some(zone) = zones.zone_for_node(node) else {
                debug!(service = %key, node = %node, "Skipping endpoint on node without zone");
                continue;
            };
            result.entry(zone).or_default().insert(NetworkEndpoint {
                ip_address: ip.clone(),
                port: Some(port),
                instance: node.clone(),
            });
        }
    }
    result
}

fn node_endpoints(
    source: &dyn EndpointSource,
    mode: EndpointsCalculatorMode,
    include: impl Fn(&Node) -> bool,
) -> ZoneEndpoints {
    let mut nodes: Vec<Arc<Node>> = source
        .nodes()
        .into_iter()
        .filter(|node| is_candidate_node(node, mode) && include(&**node))
        .collect();
    nodes.sort_by_key(|node| node.name_any());
    if mode == EndpointsCalculatorMode::L4Cluster {
        nodes.truncate(MAX_L4_CLUSTER_ENDPOINTS);
    }

    let mut result = ZoneEndpoints::new();
    for node in nodes {
        let (Some(zone), Some(ip)) = (node_zone(&node), node_internal_ip(&node)) else {
            continue;
        };
        result.entry(zone).or_default().insert(NetworkEndpoint {
            ip_address: ip,
            port: None,
            instance: node.name_any(),
        });
    }
    result
}

#[cfg(test)]
#[path = "endpoints_tests.rs"]
mod endpoints_tests;
