// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Remote compute API records and the traits the controller calls through.
//!
//! The controller never talks HTTP directly. Everything goes through
//! [`BackendServiceCloud`] and [`NegCloud`], implemented for production by
//! [`compute::ComputeClient`] and in tests by an in-memory fake.
//!
//! Records serialize with the compute API's camelCase field names so the
//! REST adapter can send and receive them as-is.

pub mod compute;

#[cfg(test)]
pub(crate) mod fake;

use crate::constants::HEALTH_STATE_HEALTHY;
use crate::errors::CloudError;
use crate::types::NetworkEndpointType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Compute API version. Ordered from least to most stable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ApiVersion {
    Alpha,
    Beta,
    #[default]
    Ga,
}

impl ApiVersion {
    /// Path segment used by the REST API (`compute/<segment>/...`)
    #[must_use]
    pub fn path_segment(self) -> &'static str {
        match self {
            ApiVersion::Alpha => "alpha",
            ApiVersion::Beta => "beta",
            ApiVersion::Ga => "v1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::Alpha => write!(f, "alpha"),
            ApiVersion::Beta => write!(f, "beta"),
            ApiVersion::Ga => write!(f, "ga"),
        }
    }
}

/// Location scope of a backend service.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Scope {
    #[default]
    Global,
    Regional,
}

impl Scope {
    /// Derive the scope from a resource self link.
    #[must_use]
    pub fn from_self_link(self_link: &str) -> Self {
        if self_link.contains("/regions/") {
            Scope::Regional
        } else {
            Scope::Global
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Regional => write!(f, "regional"),
        }
    }
}

/// Connection tracking policy of an L4 backend service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTrackingPolicy {
    /// `PER_CONNECTION` or `PER_SESSION`
    #[serde(default)]
    pub tracking_mode: String,
    #[serde(default)]
    pub enable_strong_affinity: bool,
    #[serde(default)]
    pub idle_timeout_sec: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDraining {
    #[serde(default)]
    pub draining_timeout_sec: i64,
}

/// A NEG attached to a backend service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Self link of the attached NEG
    pub group: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub balancing_mode: String,
}

/// Backend service as submitted to or read back from the remote API.
///
/// `fingerprint` is the compare-and-swap token: updates must carry the value
/// returned by the most recent read.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendService {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port_name: String,
    #[serde(default)]
    pub health_checks: Vec<String>,
    #[serde(default)]
    pub load_balancing_scheme: String,
    #[serde(default)]
    pub session_affinity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_draining: Option<ConnectionDraining>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_tracking_policy: Option<ConnectionTrackingPolicy>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default)]
    pub backends: Vec<Backend>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub self_link: String,
    /// Populated from `self_link` on read; never sent
    #[serde(skip)]
    pub scope: Scope,
}

impl BackendService {
    /// Connection draining timeout in seconds, zero when unset.
    #[must_use]
    pub fn draining_timeout_sec(&self) -> i64 {
        self.connection_draining
            .as_ref()
            .map_or(0, |d| d.draining_timeout_sec)
    }
}

/// A zonal network endpoint group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEndpointGroup {
    pub name: String,
    pub network_endpoint_type: NetworkEndpointType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subnetwork: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub zone: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub self_link: String,
}

/// One endpoint inside a NEG. `port` is absent for node-IP NEGs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEndpoint {
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instance: String,
}

/// Health of a single endpoint as reported by `getHealth`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    #[serde(default)]
    pub health_state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
}

/// Aggregate health of a backend service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Draining,
    Unknown,
}

impl HealthState {
    /// Map a `healthState` reported by `getHealth`.
    #[must_use]
    pub fn from_reported(state: &str) -> Self {
        match state {
            HEALTH_STATE_HEALTHY => HealthState::Healthy,
            "UNHEALTHY" | "TIMEOUT" => HealthState::Unhealthy,
            "DRAINING" => HealthState::Draining,
            _ => HealthState::Unknown,
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "HEALTHY"),
            HealthState::Unhealthy => write!(f, "UNHEALTHY"),
            HealthState::Draining => write!(f, "DRAINING"),
            HealthState::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Backend service operations on the remote API.
#[async_trait]
pub trait BackendServiceCloud: Send + Sync {
    async fn get_backend_service(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<BackendService, CloudError>;

    async fn create_backend_service(
        &self,
        bs: &BackendService,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError>;

    /// Fails with a generic error if `bs.fingerprint` is stale.
    async fn update_backend_service(
        &self,
        bs: &BackendService,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError>;

    async fn delete_backend_service(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError>;

    async fn list_backend_services(
        &self,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<Vec<BackendService>, CloudError>;

    /// Health of the endpoints of one attached group.
    async fn get_backend_service_health(
        &self,
        name: &str,
        group: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<Vec<HealthStatus>, CloudError>;
}

/// Zonal network endpoint group operations on the remote API.
#[async_trait]
pub trait NegCloud: Send + Sync {
    async fn get_neg(&self, name: &str, zone: &str) -> Result<NetworkEndpointGroup, CloudError>;

    async fn create_neg(&self, neg: &NetworkEndpointGroup, zone: &str) -> Result<(), CloudError>;

    async fn delete_neg(&self, name: &str, zone: &str) -> Result<(), CloudError>;

    async fn list_negs(&self, zone: &str) -> Result<Vec<NetworkEndpointGroup>, CloudError>;

    async fn list_network_endpoints(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Vec<NetworkEndpoint>, CloudError>;

    async fn attach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError>;

    async fn detach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError>;
}

/// Both halves of the remote API.
pub trait Cloud: BackendServiceCloud + NegCloud {}

impl<T: BackendServiceCloud + NegCloud> Cloud for T {}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
