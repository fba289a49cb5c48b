// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Controller configuration.
//!
//! The binary maps its command-line flags onto [`ControllerConfig`]; the
//! library only ever sees this struct.

use crate::constants::{
    DEFAULT_GC_PERIOD_SECS, DEFAULT_RESYNC_PERIOD_SECS, STALENESS_BOUND_SECS,
};
use std::str::FromStr;
use std::time::Duration;

/// The service (and port) used as the cluster's default ingress backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefaultBackend {
    pub namespace: String,
    pub name: String,
    /// Service port name, may be empty
    pub port_name: String,
    pub port: i32,
    pub target_port: String,
}

impl DefaultBackend {
    /// Queue key of the default backend service.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Parses `NAMESPACE/NAME:PORT[:TARGET_PORT]`.
///
/// The target port defaults to the service port.
impl FromStr for DefaultBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid default backend {s:?}, expected NAMESPACE/NAME:PORT[:TARGET_PORT]");
        let (namespace, rest) = s.split_once('/').ok_or_else(invalid)?;
        let mut parts = rest.split(':');
        let name = parts.next().unwrap_or_default();
        let port: i32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .filter(|p| *p > 0)
            .ok_or_else(invalid)?;
        let target_port = parts.next().map_or_else(|| port.to_string(), str::to_string);
        if namespace.is_empty() || name.is_empty() || target_port.is_empty() || parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            port_name: String::new(),
            port,
            target_port,
        })
    }
}

/// Settings shared by every controller component.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Cluster UID embedded in remote resource names
    pub cluster_uid: String,
    pub project: String,
    pub region: String,
    /// Name of the cluster's default VPC network
    pub network: String,
    /// Name of the cluster's default subnetwork
    pub subnetwork: String,
    pub default_backend: Option<DefaultBackend>,
    /// Create NEGs for every port of every selector-backed service
    pub enable_mesh: bool,
    /// Namespaces excluded from mesh-wide NEGs
    pub mesh_skip_namespaces: Vec<String>,
    /// Handle L4 internal and multi-network external load balancers
    pub run_l4: bool,
    /// Treat the regional external ingress class as a GCE ingress
    pub enable_ingress_regional_external: bool,
    /// Compare connection tracking policies on L4 backend services
    pub enable_connection_tracking: bool,
    pub resync_period: Duration,
    pub gc_period: Duration,
    pub staleness_bound: chrono::Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_uid: String::new(),
            project: String::new(),
            region: String::new(),
            network: "default".to_string(),
            subnetwork: "default".to_string(),
            default_backend: None,
            enable_mesh: false,
            mesh_skip_namespaces: vec!["kube-system".to_string(), "istio-system".to_string()],
            run_l4: false,
            enable_ingress_regional_external: false,
            enable_connection_tracking: false,
            resync_period: Duration::from_secs(DEFAULT_RESYNC_PERIOD_SECS),
            gc_period: Duration::from_secs(DEFAULT_GC_PERIOD_SECS),
            staleness_bound: chrono::Duration::seconds(STALENESS_BOUND_SECS),
        }
    }
}

impl ControllerConfig {
    /// URL of a network in this project.
    #[must_use]
    pub fn network_url(&self, network: &str) -> String {
        format!("projects/{}/global/networks/{network}", self.project)
    }

    /// URL of a subnetwork in this project and region.
    #[must_use]
    pub fn subnetwork_url(&self, subnetwork: &str) -> String {
        format!(
            "projects/{}/regions/{}/subnetworks/{subnetwork}",
            self.project, self.region
        )
    }

    /// URL of the health check an L4 backend service references.
    #[must_use]
    pub fn health_check_url(&self, name: &str) -> String {
        format!(
            "projects/{}/regions/{}/healthChecks/{name}",
            self.project, self.region
        )
    }
}
