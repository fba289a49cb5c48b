// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend service description metadata and API version selection.
//!
//! The description of every backend service we create is a small JSON
//! document recording the owning service and the features in use. Reading it
//! back tells us the lowest API version that still carries every recorded
//! field, so an update never drops configuration the GA API cannot express.

use crate::cloud::{ApiVersion, Scope};
use serde::{Deserialize, Serialize};

/// HTTP/2 between the load balancer and backends
pub const FEATURE_HTTP2: &str = "HTTP2";
/// Backends are network endpoint groups
pub const FEATURE_NEG: &str = "NEG";
/// Internal managed L7 load balancer
pub const FEATURE_L7ILB: &str = "L7ILB";
/// Regional external managed L7 load balancer
pub const FEATURE_REGIONAL_EXTERNAL: &str = "RegionalExternal";
/// Strong session affinity through the connection tracking policy
pub const FEATURE_STRONG_SESSION_AFFINITY: &str = "StrongSessionAffinity";
/// Connection persistence on unhealthy backends
pub const FEATURE_CONNECTION_PERSISTENCE: &str = "ConnectionPersistence";

const ALPHA_FEATURES: &[&str] = &[FEATURE_CONNECTION_PERSISTENCE];
const BETA_FEATURES: &[&str] = &[FEATURE_STRONG_SESSION_AFFINITY];

/// JSON document stored in a backend service description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Description {
    #[serde(
        rename = "kubernetes.io/service-name",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub service_name: String,
    #[serde(
        rename = "kubernetes.io/service-port",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub service_port: String,
    #[serde(rename = "x-features", default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
}

impl Description {
    #[must_use]
    pub fn new(service_name: &str, service_port: &str, features: &[&str]) -> Self {
        let mut features: Vec<String> = features.iter().map(|f| (*f).to_string()).collect();
        features.sort();
        features.dedup();
        Self {
            service_name: service_name.to_string(),
            service_port: service_port.to_string(),
            features,
        }
    }

    /// Parse a description; anything that is not our JSON yields an empty description.
    #[must_use]
    pub fn parse(description: &str) -> Self {
        serde_json::from_str(description).unwrap_or_default()
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Lowest API version required by a set of features.
#[must_use]
pub fn version_from_features(features: &[String]) -> ApiVersion {
    let mut version = ApiVersion::Ga;
    for feature in features {
        if ALPHA_FEATURES.contains(&feature.as_str()) {
            return ApiVersion::Alpha;
        }
        if BETA_FEATURES.contains(&feature.as_str()) {
            version = ApiVersion::Beta;
        }
    }
    version
}

/// API version required to read back every field recorded in `description`.
#[must_use]
pub fn version_from_description(description: &str) -> ApiVersion {
    version_from_features(&Description::parse(description).features)
}

/// Returns `true` if `required` is strictly less stable than `requested`.
#[must_use]
pub fn is_lower_version(required: ApiVersion, requested: ApiVersion) -> bool {
    required < requested
}

/// Scope of an L7 backend service.
#[must_use]
pub fn scope_for_l7(l7_ilb: bool, regional_external: bool) -> Scope {
    if l7_ilb || regional_external {
        Scope::Regional
    } else {
        Scope::Global
    }
}

#[cfg(test)]
#[path = "features_tests.rs"]
mod features_tests;
