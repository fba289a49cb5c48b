// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ingress helpers: class predicates and backend traversal.

use crate::labels::{
    GCE_INGRESS_CLASS, GCE_L7ILB_INGRESS_CLASS, GCE_L7XLB_REGIONAL_INGRESS_CLASS,
    INGRESS_CLASS_ANNOTATION,
};
use crate::types::SvcPortTuple;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::warn;

/// How an ingress backend refers to a service port.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BackendPort {
    Number(i32),
    Name(String),
}

/// A service port referenced by an ingress backend.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServicePortId {
    pub namespace: String,
    pub name: String,
    pub port: BackendPort,
}

impl ServicePortId {
    #[must_use]
    pub fn service_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// The `kubernetes.io/ingress.class` annotation, if set.
#[must_use]
pub fn ingress_class(ing: &Ingress) -> Option<&str> {
    ing.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(INGRESS_CLASS_ANNOTATION))
        .map(String::as_str)
}

/// Returns `true` if the ingress is handled by the GCE ingress controller.
///
/// An ingress with neither a class annotation nor `spec.ingressClassName`
/// is a GCE ingress. The regional external class counts only when enabled.
#[must_use]
pub fn is_gce_ingress(ing: &Ingress, regional_external_enabled: bool) -> bool {
    match ingress_class(ing) {
        None | Some("") => ing
            .spec
            .as_ref()
            .and_then(|s| s.ingress_class_name.as_ref())
            .is_none(),
        Some(GCE_INGRESS_CLASS | GCE_L7ILB_INGRESS_CLASS) => true,
        Some(GCE_L7XLB_REGIONAL_INGRESS_CLASS) => regional_external_enabled,
        Some(_) => false,
    }
}

#[must_use]
pub fn is_l7_ilb_ingress(ing: &Ingress) -> bool {
    ingress_class(ing) == Some(GCE_L7ILB_INGRESS_CLASS)
}

#[must_use]
pub fn is_l7_xlb_regional_ingress(ing: &Ingress) -> bool {
    ingress_class(ing) == Some(GCE_L7XLB_REGIONAL_INGRESS_CLASS)
}

#[must_use]
pub fn has_default_backend(ing: &Ingress) -> bool {
    ing.spec
        .as_ref()
        .is_some_and(|s| s.default_backend.is_some())
}

fn port_id(namespace: &str, backend: &IngressBackend) -> Option<ServicePortId> {
    let svc = backend.service.as_ref()?;
    let port = svc.port.as_ref()?;
    let port = match (port.number, port.name.as_ref()) {
        (Some(number), _) if number > 0 => BackendPort::Number(number),
        (_, Some(name)) if !name.is_empty() => BackendPort::Name(name.clone()),
        _ => return None,
    };
    Some(ServicePortId {
        namespace: namespace.to_string(),
        name: svc.name.clone(),
        port,
    })
}

/// Every service port referenced by the ingress, default backend first.
#[must_use]
pub fn ingress_backends(ing: &Ingress) -> Vec<ServicePortId> {
    let namespace = ing.namespace().unwrap_or_default();
    let Some(spec) = ing.spec.as_ref() else {
        return Vec::new();
    };

    let mut ids = Vec::new();
    if let Some(id) = spec
        .default_backend
        .as_ref()
        .and_then(|b| port_id(&namespace, b))
    {
        ids.push(id);
    }
    for rule in spec.rules.iter().flatten() {
        let Some(http) = rule.http.as_ref() else {
            continue;
        };
        ids.extend(http.paths.iter().filter_map(|p| port_id(&namespace, &p.backend)));
    }
    ids
}

/// `namespace/name` of every service the ingress references.
#[must_use]
pub fn ingress_service_keys(ing: &Ingress) -> BTreeSet<String> {
    ingress_backends(ing)
        .iter()
        .map(ServicePortId::service_key)
        .collect()
}

/// GCE ingresses in the service's namespace that reference the service.
#[must_use]
pub fn ingresses_for_service(
    ingresses: &[Arc<Ingress>],
    service: &Service,
    regional_external_enabled: bool,
) -> Vec<Arc<Ingress>> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    ingresses
        .iter()
        .filter(|ing| ing.namespace().as_deref() == Some(namespace.as_str()))
        .filter(|ing| is_gce_ingress(ing, regional_external_enabled))
        .filter(|ing| ingress_backends(ing).iter().any(|id| id.name == name))
        .cloned()
        .collect()
}

fn target_port_string(port: &ServicePort) -> String {
    match &port.target_port {
        Some(IntOrString::Int(n)) => n.to_string(),
        Some(IntOrString::String(s)) => s.clone(),
        // The API server defaults an unset target port to the port
        None => port.port.to_string(),
    }
}

/// The identity tuple of a service port.
#[must_use]
pub fn port_tuple(port: &ServicePort) -> SvcPortTuple {
    SvcPortTuple {
        port: port.port,
        name: port.name.clone().unwrap_or_default(),
        target_port: target_port_string(port),
    }
}

/// Tuples for every port declared on the service.
#[must_use]
pub fn service_port_tuples(service: &Service) -> BTreeSet<SvcPortTuple> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .map(|ports| ports.iter().map(port_tuple).collect())
        .unwrap_or_default()
}

fn find_service_port<'a>(service: &'a Service, port: &BackendPort) -> Option<&'a ServicePort> {
    let ports = service.spec.as_ref()?.ports.as_ref()?;
    ports.iter().find(|p| match port {
        BackendPort::Number(n) => p.port == *n,
        BackendPort::Name(name) => p.name.as_deref() == Some(name.as_str()),
    })
}

/// Tuples of the service ports referenced by any of `ingresses`.
///
/// References to ports the service does not declare are logged and skipped.
#[must_use]
pub fn ports_used_by_ingresses(
    ingresses: &[Arc<Ingress>],
    service: &Service,
    regional_external_enabled: bool,
) -> BTreeSet<SvcPortTuple> {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let mut tuples = BTreeSet::new();
    for ing in ingresses {
        if !is_gce_ingress(ing, regional_external_enabled) {
            continue;
        }
        for id in ingress_backends(ing) {
            if id.name != name || id.namespace != namespace {
                continue;
            }
            match find_service_port(service, &id.port) {
                Some(port) => {
                    tuples.insert(port_tuple(port));
                }
                None => {
                    warn!(service = %id.service_key(), port = ?id.port, ingress = %ing.name_any(), "Port not found in service");
                }
            }
        }
    }
    tuples
}

#[cfg(test)]
#[path = "ingress_tests.rs"]
mod ingress_tests;
