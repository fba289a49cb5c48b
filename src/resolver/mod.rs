// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Desired-state resolver.
//!
//! Computes the [`PortInfoMap`] of a service from its current snapshot and
//! the ingresses in the cache. Sources are merged in a fixed order:
//!
//! 1. default backend (when this service is the cluster default backend)
//! 2. ports referenced by GCE ingresses (`ingress: true`)
//! 3. standalone exposed ports (`exposed_ports`)
//! 4. every port, in mesh mode
//! 5. a single node-IP entry for L4 load balancers
//!
//! Any merge collision aborts the whole resolution. The resolver holds no
//! state; resolving the same snapshot twice yields identical maps.

pub mod ingress;

use crate::annotations::{
    has_ilb_v2_finalizer, has_rbs_annotation, neg_annotation, network_name,
    requests_only_local_traffic, wants_l4_ilb, wants_l4_netlb, NegAnnotation,
};
use crate::backends::{SCHEME_EXTERNAL, SCHEME_INTERNAL};
use crate::cloud::ConnectionTrackingPolicy;
use crate::config::ControllerConfig;
use crate::constants::DEFAULT_TRACKING_MODE;
use crate::errors::ResolveError;
use crate::labels::{IP_FAMILY_IPV6, IP_FAMILY_POLICY_SINGLE_STACK, SERVICE_TYPE_LOAD_BALANCER};
use crate::namer::{is_valid_resource_name, Namer};
use crate::types::{L4Params, NegUsage, NetworkInfo, PortInfoMap, SvcPortTuple};
use ingress::{
    has_default_backend, is_gce_ingress, is_l7_ilb_ingress, is_l7_xlb_regional_ingress,
    ports_used_by_ingresses, service_port_tuples,
};
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Outcome of resolving one service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub port_info_map: PortInfoMap,
    pub usage: NegUsage,
    /// Set when an L4 service was deliberately left alone
    pub skipped: Option<String>,
}

/// Pure function from resource snapshots to desired NEGs.
pub struct Resolver<'a> {
    config: &'a ControllerConfig,
    namer: &'a Namer,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(config: &'a ControllerConfig, namer: &'a Namer) -> Self {
        Self { config, namer }
    }

    /// Network the service's NEGs attach to.
    #[must_use]
    pub fn network_info(&self, service: &Service) -> NetworkInfo {
        match network_name(service) {
            Some(network) if network != self.config.network => NetworkInfo {
                is_default: false,
                network_url: self.config.network_url(network),
                subnetwork_url: self.config.subnetwork_url(network),
            },
            _ => NetworkInfo {
                is_default: true,
                network_url: self.config.network_url(&self.config.network),
                subnetwork_url: self.config.subnetwork_url(&self.config.subnetwork),
            },
        }
    }

    /// Resolve the desired NEGs of `service` given every cached ingress.
    ///
    /// # Errors
    ///
    /// Returns a [`ResolveError`] for unparseable annotations, merge
    /// conflicts, undeclared or invalidly named exposed ports, custom names
    /// combined with ingress exposure and single-stack IPv6 services.
    pub fn resolve(
        &self,
        service: &Service,
        ingresses: &[Arc<Ingress>],
    ) -> Result<Resolution, ResolveError> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let key = format!("{namespace}/{name}");

        if !is_load_balancer(service) && is_single_stack_ipv6(service) {
            return Err(ResolveError::UnsupportedIpv6 { service: key });
        }

        let annotation = neg_annotation(service)?;
        let network = self.network_info(service);
        let mut usage = NegUsage::default();
        let mut map = PortInfoMap::new();

        if self
            .config
            .default_backend
            .as_ref()
            .is_some_and(|b| b.key() == key)
        {
            if let Some(default_map) =
                self.default_backend_port_info_map(annotation.as_ref(), ingresses, &network)
            {
                map.merge(&default_map)?;
            }
        }
        usage.ingress = map.len();

        if annotation
            .as_ref()
            .is_some_and(NegAnnotation::neg_enabled_for_ingress)
        {
            let tuples = ports_used_by_ingresses(
                ingresses,
                service,
                self.config.enable_ingress_regional_external,
            );
            let ingress_map = PortInfoMap::from_port_tuples(
                &namespace,
                &name,
                &tuples,
                self.namer,
                true,
                &BTreeMap::new(),
                &network,
            );
            map.merge(&ingress_map)?;
        }
        usage.ingress = map.len();

        if let Some(ann) = annotation.as_ref().filter(|a| a.neg_exposed()) {
            let (tuples, custom_names) = exposed_port_tuples(&key, service, ann)?;
            if ann.neg_enabled_for_ingress() && !custom_names.is_empty() {
                return Err(ResolveError::CustomNameWithIngress { service: key });
            }
            usage.custom_named = custom_names.len();
            let standalone = PortInfoMap::from_port_tuples(
                &namespace,
                &name,
                &tuples,
                self.namer,
                true,
                &custom_names,
                &network,
            );
            map.merge(&standalone)?;
        }
        usage.standalone = map.len() - usage.ingress;

        if self.config.enable_mesh {
            let mesh = self.mesh_port_info_map(&namespace, &name, service, &network);
            usage.mesh = mesh.len();
            map.merge(&mesh)?;
        }

        let mut skipped = None;
        if self.config.run_l4 {
            match self.vm_ip_port_info_map(&namespace, &name, service, &network) {
                Ok(Some(vm_ip)) => {
                    usage.vm_ip = 1;
                    map.merge(&vm_ip)?;
                }
                Ok(None) => {}
                Err(reason) => {
                    info!(service = %key, "{reason}");
                    skipped = Some(reason);
                }
            }
        }

        debug!(service = %key, entries = map.len(), "Resolved desired NEGs");
        Ok(Resolution {
            port_info_map: map,
            usage,
            skipped,
        })
    }

    /// Default backend entry when a qualifying ingress lacks its own default backend.
    fn default_backend_port_info_map(
        &self,
        annotation: Option<&NegAnnotation>,
        all_ingresses: &[Arc<Ingress>],
        network: &NetworkInfo,
    ) -> Option<PortInfoMap> {
        let backend = self.config.default_backend.as_ref()?;
        let without_default = || all_ingresses.iter().filter(|i| !has_default_backend(i));

        let mut qualifies = without_default().any(|i| is_l7_ilb_ingress(i));
        if !qualifies && self.config.enable_ingress_regional_external {
            qualifies = without_default().any(|i| is_l7_xlb_regional_ingress(i));
        }
        if !qualifies && annotation.is_some_and(NegAnnotation::neg_enabled_for_ingress) {
            qualifies = without_default()
                .any(|i| is_gce_ingress(i, self.config.enable_ingress_regional_external));
        }
        if !qualifies {
            return None;
        }

        let tuple = SvcPortTuple {
            port: backend.port,
            name: backend.port_name.clone(),
            target_port: backend.target_port.clone(),
        };
        Some(PortInfoMap::from_port_tuples(
            &backend.namespace,
            &backend.name,
            &BTreeSet::from([tuple]),
            self.namer,
            false,
            &BTreeMap::new(),
            network,
        ))
    }

    fn mesh_port_info_map(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
        network: &NetworkInfo,
    ) -> PortInfoMap {
        let has_selector = service
            .spec
            .as_ref()
            .and_then(|s| s.selector.as_ref())
            .is_some_and(|s| !s.is_empty());
        if !has_selector {
            info!(service = %format!("{namespace}/{name}"), "Skip NEG creation for services with no selector");
            return PortInfoMap::new();
        }
        if self.config.mesh_skip_namespaces.iter().any(|n| n == namespace) {
            info!(namespace = %namespace, "Skip NEG creation for services in namespace");
            return PortInfoMap::new();
        }
        PortInfoMap::from_port_tuples(
            namespace,
            name,
            &service_port_tuples(service),
            self.namer,
            false,
            &BTreeMap::new(),
            network,
        )
    }

    /// Node-IP entry for L4 services. `Err` carries the reason a candidate was skipped.
    fn vm_ip_port_info_map(
        &self,
        namespace: &str,
        name: &str,
        service: &Service,
        network: &NetworkInfo,
    ) -> Result<Option<PortInfoMap>, String> {
        let ilb = wants_l4_ilb(service);
        let netlb = wants_l4_netlb(service) && !network.is_default && has_rbs_annotation(service);
        if !ilb && !netlb {
            return Ok(None);
        }
        if ilb && !has_ilb_v2_finalizer(service) {
            return Err(format!(
                "Ignoring ILB Service {name}, namespace {namespace} as it does not have the v2 finalizer"
            ));
        }
        let spec = service.spec.as_ref();
        if let Some(class) = spec.and_then(|s| s.load_balancer_class.as_ref()) {
            info!(service = %format!("{namespace}/{name}"), class = %class, "Ignoring Service with a LoadBalancerClass");
            return Ok(None);
        }

        let protocol = spec
            .and_then(|s| s.ports.as_ref())
            .and_then(|p| p.first())
            .and_then(|p| p.protocol.clone())
            .unwrap_or_else(|| "TCP".to_string());
        let session_affinity = spec
            .and_then(|s| s.session_affinity.clone())
            .unwrap_or_else(|| "None".to_string());
        let params = if ilb {
            L4Params {
                protocol,
                session_affinity,
                load_balancing_scheme: SCHEME_INTERNAL.to_string(),
                connection_tracking: None,
            }
        } else {
            L4Params {
                protocol,
                session_affinity,
                load_balancing_scheme: SCHEME_EXTERNAL.to_string(),
                connection_tracking: Some(ConnectionTrackingPolicy {
                    tracking_mode: DEFAULT_TRACKING_MODE.to_string(),
                    enable_strong_affinity: false,
                    idle_timeout_sec: 0,
                }),
            }
        };

        Ok(Some(PortInfoMap::for_vm_ip(
            namespace,
            name,
            self.namer,
            requests_only_local_traffic(service),
            network,
            params,
        )))
    }
}

fn is_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        == Some(SERVICE_TYPE_LOAD_BALANCER)
}

/// Single-stack (or unset policy) service whose only family is IPv6.
fn is_single_stack_ipv6(service: &Service) -> bool {
    let Some(spec) = service.spec.as_ref() else {
        return false;
    };
    if spec
        .ip_family_policy
        .as_deref()
        .is_some_and(|p| p != IP_FAMILY_POLICY_SINGLE_STACK)
    {
        return false;
    }
    matches!(spec.ip_families.as_deref(), Some([family]) if family == IP_FAMILY_IPV6)
}

/// Tuples and custom names of the exposed ports, validated against the service.
fn exposed_port_tuples(
    key: &str,
    service: &Service,
    annotation: &NegAnnotation,
) -> Result<(BTreeSet<SvcPortTuple>, BTreeMap<SvcPortTuple, String>), ResolveError> {
    let known = service_port_tuples(service);
    let mut tuples = BTreeSet::new();
    let mut custom_names = BTreeMap::new();

    for (port, custom) in annotation.exposed_ports()? {
        let tuple = known
            .iter()
            .find(|t| t.port == port)
            .cloned()
            .ok_or_else(|| ResolveError::UndeclaredPort {
                service: key.to_string(),
                port,
            })?;
        if let Some(custom) = custom {
            if !is_valid_resource_name(&custom) {
                return Err(ResolveError::InvalidCustomName {
                    service: key.to_string(),
                    name: custom,
                });
            }
            custom_names.insert(tuple.clone(), custom);
        }
        tuples.insert(tuple);
    }
    Ok((tuples, custom_names))
}
