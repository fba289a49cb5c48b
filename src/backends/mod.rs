// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend service reconciler.
//!
//! Idempotent create-or-update of backend services with three rules:
//!
//! - the attached backends list belongs to the NEG linker and is carried over
//!   untouched on update
//! - a positive connection draining timeout set by the user is preserved for
//!   TCP; UDP always resets it to zero
//! - updates carry the fingerprint of the object just read, so a concurrent
//!   writer turns our update into an ordinary error that is retried later

pub mod features;

use crate::cloud::{
    ApiVersion, BackendService, BackendServiceCloud, ConnectionDraining,
    ConnectionTrackingPolicy, HealthState, Scope,
};
use crate::constants::DEFAULT_CONNECTION_DRAINING_TIMEOUT_SECS;
use crate::errors::CloudError;
use crate::labels::SESSION_AFFINITY_CLIENT_IP;
use crate::namer::Namer;
use crate::types::{NetworkInfo, SvcPortTuple};
use features::{is_lower_version, scope_for_l7, version_from_description, Description};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const PROTOCOL_TCP: &str = "TCP";

/// Load balancing scheme of internal managed L7 load balancers
pub const SCHEME_INTERNAL_MANAGED: &str = "INTERNAL_MANAGED";
/// Load balancing scheme of regional external managed L7 load balancers
pub const SCHEME_EXTERNAL_MANAGED: &str = "EXTERNAL_MANAGED";
/// Load balancing scheme of internal L4 load balancers
pub const SCHEME_INTERNAL: &str = "INTERNAL";
/// Load balancing scheme of external L4 load balancers
pub const SCHEME_EXTERNAL: &str = "EXTERNAL";

/// Desired state of an L4 backend service.
#[derive(Clone, Debug, Default)]
pub struct L4BackendServiceParams {
    pub name: String,
    pub health_check_link: String,
    pub protocol: String,
    /// Kubernetes session affinity (`ClientIP` or `None`)
    pub session_affinity: String,
    pub scheme: String,
    /// Owning service, `namespace/name`
    pub service_key: String,
    pub network: NetworkInfo,
    pub connection_tracking: Option<ConnectionTrackingPolicy>,
}

/// An L7 service port backed by a backend service.
///
/// Input of [`Backends::create`]. The controller itself only manages L4
/// backend services; L7 backend services are created through this API by
/// the load balancer pool that links NEGs into them.
#[derive(Clone, Debug, Default)]
pub struct ServicePort {
    pub namespace: String,
    pub name: String,
    pub port: SvcPortTuple,
    pub node_port: i32,
    pub protocol: String,
    pub neg_enabled: bool,
    pub l7_ilb_enabled: bool,
    pub l7_xlb_regional_enabled: bool,
}

impl ServicePort {
    fn features(&self) -> Vec<&'static str> {
        let mut features = Vec::new();
        if self.protocol == "HTTP2" {
            features.push(features::FEATURE_HTTP2);
        }
        if self.neg_enabled {
            features.push(features::FEATURE_NEG);
        }
        if self.l7_ilb_enabled {
            features.push(features::FEATURE_L7ILB);
        }
        if self.l7_xlb_regional_enabled {
            features.push(features::FEATURE_REGIONAL_EXTERNAL);
        }
        features
    }
}

/// Create, update, read and delete backend services.
pub struct Backends {
    cloud: Arc<dyn BackendServiceCloud>,
    namer: Namer,
    use_connection_tracking_policy: bool,
}

impl Backends {
    #[must_use]
    pub fn new(
        cloud: Arc<dyn BackendServiceCloud>,
        namer: Namer,
        use_connection_tracking_policy: bool,
    ) -> Self {
        Self {
            cloud,
            namer,
            use_connection_tracking_policy,
        }
    }

    /// Create the backend service of an L7 service port and read it back.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the create or the re-fetch fails.
    pub async fn create(
        &self,
        sp: &ServicePort,
        name: &str,
        health_check_link: &str,
    ) -> Result<BackendService, CloudError> {
        let features = sp.features();
        let description =
            Description::new(&format!("{}/{}", sp.namespace, sp.name), &sp.port.port.to_string(), &features);
        let version = features::version_from_features(&description.features);
        let scope = scope_for_l7(sp.l7_ilb_enabled, sp.l7_xlb_regional_enabled);

        let scheme = if sp.l7_ilb_enabled {
            SCHEME_INTERNAL_MANAGED
        } else if sp.l7_xlb_regional_enabled {
            SCHEME_EXTERNAL_MANAGED
        } else {
            ""
        };

        let bs = BackendService {
            name: name.to_string(),
            description: description.to_json(),
            protocol: sp.protocol.clone(),
            port: Some(sp.node_port),
            port_name: format!("port{}", sp.node_port),
            health_checks: vec![health_check_link.to_string()],
            load_balancing_scheme: scheme.to_string(),
            ..Default::default()
        };

        info!(backend_service = %name, version = %version, scope = %scope, "Creating backend service");
        self.cloud.create_backend_service(&bs, version, scope).await?;
        // The create response has no fingerprint or self link
        self.get(name, version, scope).await
    }

    /// Submit an update at the version its description requires.
    ///
    /// `bs` must be a value read through [`Backends::get`] so it carries the
    /// current fingerprint and self link.
    ///
    /// # Errors
    ///
    /// Returns the remote error, including fingerprint mismatches.
    pub async fn update(&self, bs: &BackendService) -> Result<(), CloudError> {
        let version = version_from_description(&bs.description);
        let scope = Scope::from_self_link(&bs.self_link);
        debug!(backend_service = %bs.name, version = %version, scope = %scope, "Updating backend service");
        self.cloud.update_backend_service(bs, version, scope).await
    }

    /// Read a backend service, re-reading at a lower version when its
    /// description records features the requested version cannot carry.
    ///
    /// # Errors
    ///
    /// Returns the remote error of either read.
    pub async fn get(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<BackendService, CloudError> {
        let bs = self.cloud.get_backend_service(name, version, scope).await?;

        let required = version_from_description(&bs.description);
        if is_lower_version(required, version) {
            debug!(
                backend_service = %name,
                requested = %version,
                required = %required,
                "Re-fetching backend service at lower API version"
            );
            return self.cloud.get_backend_service(name, required, scope).await;
        }
        Ok(bs)
    }

    /// Delete a backend service. Missing and still-referenced objects count as success.
    ///
    /// # Errors
    ///
    /// Returns any other remote error.
    pub async fn delete(&self, name: &str, version: ApiVersion, scope: Scope) -> Result<(), CloudError> {
        info!(backend_service = %name, scope = %scope, "Deleting backend service");
        match self.cloud.delete_backend_service(name, version, scope).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() || e.is_in_use() => {
                info!(backend_service = %name, error = %e, "Ignorable error deleting backend service");
                Ok(())
            }
            Err(e) => {
                warn!(backend_service = %name, error = %e, "Failed to delete backend service");
                Err(e)
            }
        }
    }

    /// Aggregate health of a backend service.
    ///
    /// Returns [`HealthState::Healthy`] as soon as any endpoint of any attached
    /// group reports `HEALTHY`, without querying the remaining groups.
    /// Otherwise the last reported state is returned. With no attached groups
    /// or no reported status the result is [`HealthState::Unknown`].
    ///
    /// # Errors
    ///
    /// Only remote call failures are errors.
    pub async fn health(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<HealthState, CloudError> {
        let bs = self.get(name, version, scope).await?;

        let mut state = HealthState::Unknown;
        for backend in &bs.backends {
            let statuses = self
                .cloud
                .get_backend_service_health(name, &backend.group, version, scope)
                .await?;
            if statuses.is_empty() {
                debug!(backend_service = %name, group = %backend.group, "Backend group has no health status");
                continue;
            }
            for status in &statuses {
                state = HealthState::from_reported(&status.health_state);
                if state == HealthState::Healthy {
                    return Ok(state);
                }
            }
        }
        Ok(state)
    }

    /// List the backend services owned by this cluster, with scope populated.
    ///
    /// # Errors
    ///
    /// Returns the remote list error.
    pub async fn list(&self, version: ApiVersion, scope: Scope) -> Result<Vec<BackendService>, CloudError> {
        let all = self.cloud.list_backend_services(version, scope).await?;
        Ok(all
            .into_iter()
            .filter(|bs| self.namer.name_belongs_to_cluster(&bs.name))
            .map(|mut bs| {
                bs.scope = Scope::from_self_link(&bs.self_link);
                bs
            })
            .collect())
    }

    /// Ensure the regional backend service of an L4 load balancer matches `params`.
    ///
    /// # Errors
    ///
    /// Returns the remote error of any read, create or update.
    pub async fn ensure_l4_backend_service(
        &self,
        params: &L4BackendServiceParams,
    ) -> Result<BackendService, CloudError> {
        let start = Instant::now();
        let name = params.name.as_str();
        let version = ApiVersion::Ga;
        let scope = Scope::Regional;

        let existing = match self.cloud.get_backend_service(name, version, scope).await {
            Ok(bs) => Some(bs),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        let mut expected = self.expected_l4_backend_service(params);

        let Some(existing) = existing else {
            info!(backend_service = %name, service = %params.service_key, "Creating L4 backend service");
            self.cloud.create_backend_service(&expected, version, scope).await?;
            let created = self.cloud.get_backend_service(name, version, scope).await?;
            debug!(backend_service = %name, elapsed = ?start.elapsed(), "L4 backend service created");
            return Ok(created);
        };

        if backend_svc_equal(&expected, &existing, self.use_connection_tracking_policy) {
            debug!(backend_service = %name, "L4 backend service unchanged, skipping update");
            return Ok(existing);
        }

        if existing.draining_timeout_sec() > 0 && params.protocol == PROTOCOL_TCP {
            expected.connection_draining = Some(ConnectionDraining {
                draining_timeout_sec: existing.draining_timeout_sec(),
            });
        }
        expected.fingerprint.clone_from(&existing.fingerprint);
        expected.backends.clone_from(&existing.backends);

        info!(backend_service = %name, service = %params.service_key, "Updating L4 backend service");
        self.cloud.update_backend_service(&expected, version, scope).await?;
        let updated = self.cloud.get_backend_service(name, version, scope).await?;
        debug!(backend_service = %name, elapsed = ?start.elapsed(), "L4 backend service updated");
        Ok(updated)
    }

    fn expected_l4_backend_service(&self, params: &L4BackendServiceParams) -> BackendService {
        let draining = if params.protocol == PROTOCOL_TCP {
            DEFAULT_CONNECTION_DRAINING_TIMEOUT_SECS
        } else {
            0
        };
        BackendService {
            name: params.name.clone(),
            description: Description::new(&params.service_key, "", &[]).to_json(),
            protocol: params.protocol.clone(),
            health_checks: vec![params.health_check_link.clone()],
            load_balancing_scheme: params.scheme.clone(),
            session_affinity: translate_affinity(&params.session_affinity).to_string(),
            connection_draining: Some(ConnectionDraining {
                draining_timeout_sec: draining,
            }),
            connection_tracking_policy: if self.use_connection_tracking_policy {
                params.connection_tracking.clone()
            } else {
                None
            },
            network: if params.network.is_default {
                String::new()
            } else {
                params.network.network_url.clone()
            },
            ..Default::default()
        }
    }
}

/// Map a Kubernetes session affinity onto the backend service value.
#[must_use]
pub fn translate_affinity(affinity: &str) -> &'static str {
    if affinity == SESSION_AFFINITY_CLIENT_IP {
        "CLIENT_IP"
    } else {
        "NONE"
    }
}

/// Semantic equality of two backend services.
///
/// Ignores the attached backends (owned by the NEG linker) and the connection
/// draining timeout. The connection tracking policy is compared only when
/// `compare_connection_tracking` is set.
#[must_use]
pub fn backend_svc_equal(
    a: &BackendService,
    b: &BackendService,
    compare_connection_tracking: bool,
) -> bool {
    let health_checks = |bs: &BackendService| -> BTreeSet<String> {
        bs.health_checks.iter().cloned().collect()
    };
    let equal = a.protocol == b.protocol
        && a.description == b.description
        && a.session_affinity == b.session_affinity
        && a.load_balancing_scheme == b.load_balancing_scheme
        && health_checks(a) == health_checks(b)
        && a.network == b.network;

    if compare_connection_tracking {
        return equal && a.connection_tracking_policy == b.connection_tracking_policy;
    }
    equal
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod mod_tests;
