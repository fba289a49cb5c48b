// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Zone discovery from the node cache.
//!
//! Which nodes count depends on the endpoint calculation mode: L7 NEGs only
//! land on ready, schedulable nodes, while node-IP NEGs include any node not
//! explicitly excluded from load balancers.

use crate::labels::{
    EXCLUDE_BALANCER_LEGACY, EXCLUDE_FROM_EXTERNAL_LB, NODE_ADDRESS_INTERNAL_IP,
    NODE_CONDITION_READY, TOPOLOGY_ZONE,
};
use crate::types::EndpointsCalculatorMode;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::{ObjectRef, Store};
use std::collections::BTreeSet;

/// Source of the zones NEGs must exist in.
pub trait ZoneGetter: Send + Sync {
    /// Sorted zones containing at least one candidate node for `mode`.
    fn list_zones(&self, mode: EndpointsCalculatorMode) -> Vec<String>;

    /// Zone of a node, if the node is known and labelled.
    fn zone_for_node(&self, node_name: &str) -> Option<String>;
}

/// [`ZoneGetter`] backed by a node reflector store.
#[derive(Clone)]
pub struct NodeZoneGetter {
    nodes: Store<Node>,
}

impl NodeZoneGetter {
    #[must_use]
    pub fn new(nodes: Store<Node>) -> Self {
        Self { nodes }
    }
}

impl ZoneGetter for NodeZoneGetter {
    fn list_zones(&self, mode: EndpointsCalculatorMode) -> Vec<String> {
        self.nodes
            .state()
            .iter()
            .filter(|node| is_candidate_node(node, mode))
            .filter_map(|node| node_zone(node))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn zone_for_node(&self, node_name: &str) -> Option<String> {
        self.nodes
            .get(&ObjectRef::new(node_name))
            .and_then(|node| node_zone(&node))
    }
}

/// Returns `true` if `node` may host endpoints for `mode`.
#[must_use]
pub fn is_candidate_node(node: &Node, mode: EndpointsCalculatorMode) -> bool {
    match mode {
        EndpointsCalculatorMode::L7 => is_node_ready(node) && is_node_schedulable(node),
        EndpointsCalculatorMode::L4Local | EndpointsCalculatorMode::L4Cluster => {
            !is_excluded_from_load_balancers(node)
        }
    }
}

#[must_use]
pub fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == NODE_CONDITION_READY && c.status == "True")
        })
}

#[must_use]
pub fn is_node_schedulable(node: &Node) -> bool {
    !node
        .spec
        .as_ref()
        .and_then(|s| s.unschedulable)
        .unwrap_or(false)
}

#[must_use]
pub fn is_excluded_from_load_balancers(node: &Node) -> bool {
    node.metadata.labels.as_ref().is_some_and(|labels| {
        labels.contains_key(EXCLUDE_FROM_EXTERNAL_LB) || labels.contains_key(EXCLUDE_BALANCER_LEGACY)
    })
}

/// Zone label of a node. Empty values count as unlabelled.
#[must_use]
pub fn node_zone(node: &Node) -> Option<String> {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(TOPOLOGY_ZONE))
        .filter(|zone| !zone.is_empty())
        .cloned()
}

/// First internal IP of a node.
#[must_use]
pub fn node_internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addresses| {
            addresses
                .iter()
                .find(|a| a.type_ == NODE_ADDRESS_INTERNAL_IP)
                .map(|a| a.address.clone())
        })
}

#[cfg(test)]
#[path = "zones_tests.rs"]
mod zones_tests;
