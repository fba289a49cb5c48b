// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Core data model: service port tuples, per-port NEG attributes and the
//! `PortInfoMap` built on every reconciliation pass.
//!
//! A `PortInfoMap` is rebuilt from scratch for each pass and never persisted.
//! Maps from independent sources are combined with [`PortInfoMap::merge`],
//! which fails closed on any divergent attribute and never mutates the target
//! on error.

use crate::cloud::ConnectionTrackingPolicy;
use crate::errors::ResolveError;
use crate::namer::Namer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of one service port.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SvcPortTuple {
    pub port: i32,
    pub name: String,
    pub target_port: String,
}

impl fmt::Display for SvcPortTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.port, self.name, self.target_port)
    }
}

/// Granularity of the endpoints placed in a NEG.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NetworkEndpointType {
    /// Pod IP and port
    #[serde(rename = "GCE_VM_IP_PORT")]
    VmIpPort,
    /// Node IP only
    #[serde(rename = "GCE_VM_IP")]
    VmIp,
}

impl fmt::Display for NetworkEndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEndpointType::VmIpPort => write!(f, "GCE_VM_IP_PORT"),
            NetworkEndpointType::VmIp => write!(f, "GCE_VM_IP"),
        }
    }
}

/// How endpoints are calculated for a NEG.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EndpointsCalculatorMode {
    /// Pod endpoints from EndpointSlices
    #[default]
    L7,
    /// Nodes running a ready pod of the service
    L4Local,
    /// Any eligible node, capped
    L4Cluster,
}

impl fmt::Display for EndpointsCalculatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointsCalculatorMode::L7 => write!(f, "L7"),
            EndpointsCalculatorMode::L4Local => write!(f, "L4Local"),
            EndpointsCalculatorMode::L4Cluster => write!(f, "L4Cluster"),
        }
    }
}

/// VPC network a service's NEGs attach to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub is_default: bool,
    pub network_url: String,
    pub subnetwork_url: String,
}

/// Backend service attributes carried by a node-IP entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct L4Params {
    pub protocol: String,
    pub session_affinity: String,
    pub load_balancing_scheme: String,
    pub connection_tracking: Option<ConnectionTrackingPolicy>,
}

/// Key of a [`PortInfoMap`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortInfoMapKey {
    pub namespace: String,
    pub name: String,
    pub port: i32,
}

impl fmt::Display for PortInfoMapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

/// NEG attributes for one service port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    pub port_tuple: SvcPortTuple,
    pub neg_name: String,
    pub endpoint_type: NetworkEndpointType,
    pub mode: EndpointsCalculatorMode,
    pub readiness_gate: bool,
    pub network: NetworkInfo,
    /// `neg_name` was chosen by the user rather than the namer
    pub custom_name: bool,
    pub l4: Option<L4Params>,
}

/// Desired NEGs for one pass, keyed by `(namespace, name, port)`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortInfoMap(BTreeMap<PortInfoMapKey, PortInfo>);

impl PortInfoMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build L7 entries for a set of service ports.
    ///
    /// Ports present in `custom_names` use that name instead of the generated one.
    #[must_use]
    pub fn from_port_tuples(
        namespace: &str,
        name: &str,
        tuples: &BTreeSet<SvcPortTuple>,
        namer: &Namer,
        readiness_gate: bool,
        custom_names: &BTreeMap<SvcPortTuple, String>,
        network: &NetworkInfo,
    ) -> Self {
        let entries = tuples
            .iter()
            .map(|tuple| {
                let custom = custom_names.get(tuple);
                let info = PortInfo {
                    port_tuple: tuple.clone(),
                    neg_name: custom
                        .cloned()
                        .unwrap_or_else(|| namer.neg_name(namespace, name, tuple.port)),
                    endpoint_type: NetworkEndpointType::VmIpPort,
                    mode: EndpointsCalculatorMode::L7,
                    readiness_gate,
                    network: network.clone(),
                    custom_name: custom.is_some(),
                    l4: None,
                };
                (
                    PortInfoMapKey {
                        namespace: namespace.to_string(),
                        name: name.to_string(),
                        port: tuple.port,
                    },
                    info,
                )
            })
            .collect();
        Self(entries)
    }

    /// Build the single node-IP entry of an L4 service. It is keyed by port 0.
    #[must_use]
    pub fn for_vm_ip(
        namespace: &str,
        name: &str,
        namer: &Namer,
        only_local: bool,
        network: &NetworkInfo,
        l4: L4Params,
    ) -> Self {
        let mode = if only_local {
            EndpointsCalculatorMode::L4Local
        } else {
            EndpointsCalculatorMode::L4Cluster
        };
        let mut map = BTreeMap::new();
        map.insert(
            PortInfoMapKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
                port: 0,
            },
            PortInfo {
                port_tuple: SvcPortTuple::default(),
                neg_name: namer.l4_name(namespace, name),
                endpoint_type: NetworkEndpointType::VmIp,
                mode,
                readiness_gate: false,
                network: network.clone(),
                custom_name: false,
                l4: Some(l4),
            },
        );
        Self(map)
    }

    /// Merge `other` into `self`.
    ///
    /// An entry present in both maps must agree on port tuple, NEG name,
    /// endpoint type and mode; the readiness gate is OR-ed.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Conflict`] on the first divergent key. `self`
    /// is left untouched in that case.
    pub fn merge(&mut self, other: &PortInfoMap) -> Result<(), ResolveError> {
        let mut merged = self.0.clone();
        for (key, incoming) in &other.0 {
            match merged.get_mut(key) {
                None => {
                    merged.insert(key.clone(), incoming.clone());
                }
                Some(existing) => {
                    check_compatible(key, existing, incoming)?;
                    existing.readiness_gate |= incoming.readiness_gate;
                }
            }
        }
        self.0 = merged;
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortInfoMapKey, &PortInfo)> {
        self.0.iter()
    }

    #[must_use]
    pub fn get(&self, key: &PortInfoMapKey) -> Option<&PortInfo> {
        self.0.get(key)
    }

    /// Endpoint calculation mode implied by the map.
    ///
    /// A node-IP entry determines the mode; otherwise the map is L7.
    #[must_use]
    pub fn endpoints_calculator_mode(&self) -> EndpointsCalculatorMode {
        self.0
            .values()
            .find(|info| info.endpoint_type == NetworkEndpointType::VmIp)
            .map_or(EndpointsCalculatorMode::L7, |info| info.mode)
    }

    /// Service port to NEG name, as published in the status annotation.
    #[must_use]
    pub fn to_port_neg_map(&self) -> BTreeMap<i32, String> {
        self.0
            .iter()
            .map(|(key, info)| (key.port, info.neg_name.clone()))
            .collect()
    }
}

impl Serialize for PortInfoMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

fn check_compatible(
    key: &PortInfoMapKey,
    existing: &PortInfo,
    incoming: &PortInfo,
) -> Result<(), ResolveError> {
    let conflict = |reason: String| ResolveError::Conflict {
        key: key.to_string(),
        reason,
    };
    if existing.port_tuple != incoming.port_tuple {
        return Err(conflict(format!(
            "port tuple {} != {}",
            existing.port_tuple, incoming.port_tuple
        )));
    }
    if existing.neg_name != incoming.neg_name {
        return Err(conflict(format!(
            "NEG name {} != {}",
            existing.neg_name, incoming.neg_name
        )));
    }
    if existing.endpoint_type != incoming.endpoint_type {
        return Err(conflict(format!(
            "endpoint type {} != {}",
            existing.endpoint_type, incoming.endpoint_type
        )));
    }
    if existing.mode != incoming.mode {
        return Err(conflict(format!(
            "endpoint calculator mode {} != {}",
            existing.mode, incoming.mode
        )));
    }
    Ok(())
}

/// Per-service NEG usage, recomputed on every pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NegUsage {
    pub ingress: usize,
    pub standalone: usize,
    pub mesh: usize,
    pub vm_ip: usize,
    pub custom_named: usize,
    pub successful: usize,
    pub errored: usize,
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod types_tests;
