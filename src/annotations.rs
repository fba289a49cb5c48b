// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service annotations read and written by the controller.
//!
//! Two annotations carry NEG state on a `Service`:
//!
//! - `cloud.google.com/neg` (exposure): `{"ingress": true, "exposed_ports": {"80": {"name": "custom"}}}`
//! - `cloud.google.com/neg-status` (status): `{"network_endpoint_groups": {"80": "k8s1-..."}, "zones": ["us-central1-a"]}`
//!
//! The L4 predicates at the bottom decide whether a load balancer service
//! needs a node-IP NEG.

use crate::constants::{
    ILB_V2_FINALIZER, L4_LB_TYPE_ANNOTATION_KEY, L4_LB_TYPE_INTERNAL,
    L4_LB_TYPE_LEGACY_ANNOTATION_KEY, NEG_ANNOTATION_KEY, NETWORK_ANNOTATION_KEY,
    RBS_ANNOTATION_KEY, RBS_ENABLED,
};
use crate::errors::AnnotationError;
use crate::labels::{SERVICE_TYPE_LOAD_BALANCER, TRAFFIC_POLICY_LOCAL};
use k8s_openapi::api::core::v1::Service;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-port attributes of the exposure annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegAttributes {
    /// Optional custom NEG name for this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Parsed `cloud.google.com/neg` annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegAnnotation {
    /// Create NEGs for the ports referenced by GCE ingresses
    #[serde(default)]
    pub ingress: bool,

    /// Ports exposed as standalone NEGs, keyed by service port number
    #[serde(default)]
    pub exposed_ports: BTreeMap<String, NegAttributes>,
}

impl NegAnnotation {
    /// Returns `true` if the service participates in ingress exposure.
    #[must_use]
    pub fn neg_enabled_for_ingress(&self) -> bool {
        self.ingress
    }

    /// Returns `true` if the service exposes standalone NEGs.
    #[must_use]
    pub fn neg_exposed(&self) -> bool {
        !self.exposed_ports.is_empty()
    }

    /// Returns the exposed ports with their optional custom names.
    ///
    /// # Errors
    ///
    /// Returns [`AnnotationError::InvalidPort`] if a key is not a port number.
    pub fn exposed_ports(&self) -> Result<BTreeMap<i32, Option<String>>, AnnotationError> {
        let mut ports = BTreeMap::new();
        for (key, attrs) in &self.exposed_ports {
            let port: i32 = key.trim().parse().map_err(|_| AnnotationError::InvalidPort {
                key: NEG_ANNOTATION_KEY.to_string(),
                port: key.clone(),
            })?;
            if !(1..=65535).contains(&port) {
                return Err(AnnotationError::InvalidPort {
                    key: NEG_ANNOTATION_KEY.to_string(),
                    port: key.clone(),
                });
            }
            ports.insert(port, attrs.name.clone());
        }
        Ok(ports)
    }
}

/// Parsed `cloud.google.com/neg-status` annotation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegStatus {
    /// Service port number to NEG name
    pub network_endpoint_groups: BTreeMap<String, String>,
    /// Zones the NEGs exist in, sorted
    pub zones: Vec<String>,
}

impl NegStatus {
    /// Build a status value; zones are sorted and deduplicated.
    #[must_use]
    pub fn new(mut zones: Vec<String>, port_negs: &BTreeMap<i32, String>) -> Self {
        zones.sort();
        zones.dedup();
        Self {
            network_endpoint_groups: port_negs
                .iter()
                .map(|(port, neg)| (port.to_string(), neg.clone()))
                .collect(),
            zones,
        }
    }

    /// Serialize to the canonical annotation value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn marshal(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Read and parse the exposure annotation of a service.
///
/// Returns `Ok(None)` when the annotation is absent.
///
/// # Errors
///
/// Returns [`AnnotationError::Parse`] if the value is not valid JSON.
pub fn neg_annotation(service: &Service) -> Result<Option<NegAnnotation>, AnnotationError> {
    let Some(value) = annotation(service, NEG_ANNOTATION_KEY) else {
        return Ok(None);
    };
    serde_json::from_str(value)
        .map(Some)
        .map_err(|e| AnnotationError::Parse {
            key: NEG_ANNOTATION_KEY.to_string(),
            reason: e.to_string(),
        })
}

/// Look up a single annotation value.
#[must_use]
pub fn annotation<'a>(service: &'a Service, key: &str) -> Option<&'a str> {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Network name selected by the `networking.gke.io/network` annotation.
#[must_use]
pub fn network_name(service: &Service) -> Option<&str> {
    annotation(service, NETWORK_ANNOTATION_KEY).filter(|n| !n.is_empty())
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == SERVICE_TYPE_LOAD_BALANCER)
}

/// Returns `true` if the service requests an internal L4 load balancer.
#[must_use]
pub fn wants_l4_ilb(service: &Service) -> bool {
    if !is_load_balancer(service) {
        return false;
    }
    [L4_LB_TYPE_ANNOTATION_KEY, L4_LB_TYPE_LEGACY_ANNOTATION_KEY]
        .iter()
        .filter_map(|key| annotation(service, key))
        .any(|v| v.eq_ignore_ascii_case(L4_LB_TYPE_INTERNAL))
}

/// Returns `true` if the service requests an external L4 load balancer.
#[must_use]
pub fn wants_l4_netlb(service: &Service) -> bool {
    is_load_balancer(service) && !wants_l4_ilb(service)
}

/// Returns `true` if the service opted into regional backend services.
#[must_use]
pub fn has_rbs_annotation(service: &Service) -> bool {
    annotation(service, RBS_ANNOTATION_KEY) == Some(RBS_ENABLED)
}

/// Returns `true` once the L4 controller has claimed the ILB service for NEG subsetting.
#[must_use]
pub fn has_ilb_v2_finalizer(service: &Service) -> bool {
    service
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|f| f == ILB_V2_FINALIZER))
}

/// Returns `true` if the service keeps traffic on the node that received it.
#[must_use]
pub fn requests_only_local_traffic(service: &Service) -> bool {
    is_load_balancer(service)
        && service
            .spec
            .as_ref()
            .and_then(|s| s.external_traffic_policy.as_deref())
            == Some(TRAFFIC_POLICY_LOCAL)
}

#[cfg(test)]
#[path = "annotations_tests.rs"]
mod annotations_tests;
