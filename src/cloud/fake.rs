// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory compute API for unit tests.
//!
//! Mirrors the remote semantics the controller depends on: creates do not
//! return the fingerprint, updates must carry the current fingerprint, and
//! deletes of missing or referenced objects return the matching error class.

use super::{
    ApiVersion, BackendService, BackendServiceCloud, HealthStatus, NegCloud, NetworkEndpoint,
    NetworkEndpointGroup, Scope,
};
use crate::errors::CloudError;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

/// Operations recorded by the fake, in call order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    GetBackendService(String, ApiVersion),
    CreateBackendService(String),
    UpdateBackendService(String),
    DeleteBackendService(String),
    GetHealth(String),
    CreateNeg(String, String),
    DeleteNeg(String, String),
    ListNegs(String),
    Attach(String, usize),
    Detach(String, usize),
}

#[derive(Default)]
pub(crate) struct FakeState {
    pub backend_services: HashMap<(Scope, String), BackendService>,
    pub negs: BTreeMap<(String, String), NetworkEndpointGroup>,
    pub endpoints: BTreeMap<(String, String), BTreeSet<NetworkEndpoint>>,
    pub health: HashMap<String, Vec<HealthStatus>>,
    pub in_use: HashSet<String>,
    pub failures: HashMap<&'static str, CloudError>,
    pub calls: Vec<Call>,
    fingerprint: u64,
}

#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<FakeState>,
}

fn not_found(kind: &str, name: &str) -> CloudError {
    CloudError::NotFound {
        kind: kind.to_string(),
        name: name.to_string(),
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Make every subsequent call of `op` fail with `err`.
    pub fn fail(&self, op: &'static str, err: CloudError) {
        self.state().failures.insert(op, err);
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    /// Store a backend service as if another actor created it.
    pub fn insert_backend_service(&self, mut bs: BackendService, scope: Scope) {
        let mut state = self.state();
        state.fingerprint += 1;
        bs.fingerprint = format!("fp-{}", state.fingerprint);
        bs.self_link = self_link(&bs.name, scope);
        bs.scope = scope;
        state.backend_services.insert((scope, bs.name.clone()), bs);
    }

    pub fn backend_service(&self, name: &str, scope: Scope) -> Option<BackendService> {
        self.state()
            .backend_services
            .get(&(scope, name.to_string()))
            .cloned()
    }

    pub fn insert_neg(&self, zone: &str, name: &str) {
        let neg = NetworkEndpointGroup {
            name: name.to_string(),
            network_endpoint_type: crate::types::NetworkEndpointType::VmIpPort,
            network: String::new(),
            subnetwork: String::new(),
            description: String::new(),
            zone: zone.to_string(),
            self_link: neg_self_link(zone, name),
        };
        self.state()
            .negs
            .insert((zone.to_string(), name.to_string()), neg);
    }

    pub fn neg_names(&self) -> BTreeSet<String> {
        self.state().negs.keys().map(|(_, n)| n.clone()).collect()
    }

    pub fn endpoints(&self, zone: &str, name: &str) -> BTreeSet<NetworkEndpoint> {
        self.state()
            .endpoints
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_health(&self, group: &str, statuses: Vec<HealthStatus>) {
        self.state().health.insert(group.to_string(), statuses);
    }

    pub fn mark_in_use(&self, name: &str) {
        self.state().in_use.insert(name.to_string());
    }

    fn check(&self, op: &'static str) -> Result<(), CloudError> {
        match self.state().failures.get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

fn self_link(name: &str, scope: Scope) -> String {
    match scope {
        Scope::Global => format!("projects/p/global/backendServices/{name}"),
        Scope::Regional => format!("projects/p/regions/r/backendServices/{name}"),
    }
}

fn neg_self_link(zone: &str, name: &str) -> String {
    format!("projects/p/zones/{zone}/networkEndpointGroups/{name}")
}

#[async_trait]
impl BackendServiceCloud for FakeCloud {
    async fn get_backend_service(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<BackendService, CloudError> {
        self.record(Call::GetBackendService(name.to_string(), version));
        self.check("get_backend_service")?;
        self.backend_service(name, scope)
            .ok_or_else(|| not_found("backendService", name))
    }

    async fn create_backend_service(
        &self,
        bs: &BackendService,
        _version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        self.record(Call::CreateBackendService(bs.name.clone()));
        self.check("create_backend_service")?;
        if self.backend_service(&bs.name, scope).is_some() {
            return Err(CloudError::Api {
                code: 409,
                message: format!("backendService {} already exists", bs.name),
            });
        }
        self.insert_backend_service(bs.clone(), scope);
        Ok(())
    }

    async fn update_backend_service(
        &self,
        bs: &BackendService,
        _version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        self.record(Call::UpdateBackendService(bs.name.clone()));
        self.check("update_backend_service")?;
        let current = self
            .backend_service(&bs.name, scope)
            .ok_or_else(|| not_found("backendService", &bs.name))?;
        if current.fingerprint != bs.fingerprint {
            return Err(CloudError::Api {
                code: 412,
                message: "fingerprint mismatch".to_string(),
            });
        }
        self.insert_backend_service(bs.clone(), scope);
        Ok(())
    }

    async fn delete_backend_service(
        &self,
        name: &str,
        _version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        self.record(Call::DeleteBackendService(name.to_string()));
        self.check("delete_backend_service")?;
        let mut state = self.state();
        if state.in_use.contains(name) {
            return Err(CloudError::InUseBy {
                kind: "backendService".to_string(),
                name: name.to_string(),
                message: "referenced by a forwarding rule".to_string(),
            });
        }
        state
            .backend_services
            .remove(&(scope, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| not_found("backendService", name))
    }

    async fn list_backend_services(
        &self,
        _version: ApiVersion,
        scope: Scope,
    ) -> Result<Vec<BackendService>, CloudError> {
        self.check("list_backend_services")?;
        let state = self.state();
        let mut list: Vec<_> = state
            .backend_services
            .iter()
            .filter(|((s, _), _)| *s == scope)
            .map(|(_, bs)| bs.clone())
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn get_backend_service_health(
        &self,
        _name: &str,
        group: &str,
        _version: ApiVersion,
        _scope: Scope,
    ) -> Result<Vec<HealthStatus>, CloudError> {
        self.record(Call::GetHealth(group.to_string()));
        self.check("get_backend_service_health")?;
        Ok(self.state().health.get(group).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl NegCloud for FakeCloud {
    async fn get_neg(&self, name: &str, zone: &str) -> Result<NetworkEndpointGroup, CloudError> {
        self.check("get_neg")?;
        self.state()
            .negs
            .get(&(zone.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found("networkEndpointGroup", name))
    }

    async fn create_neg(&self, neg: &NetworkEndpointGroup, zone: &str) -> Result<(), CloudError> {
        self.record(Call::CreateNeg(zone.to_string(), neg.name.clone()));
        self.check("create_neg")?;
        let mut state = self.state();
        let key = (zone.to_string(), neg.name.clone());
        if state.negs.contains_key(&key) {
            return Err(CloudError::Api {
                code: 409,
                message: format!("networkEndpointGroup {} already exists", neg.name),
            });
        }
        let mut neg = neg.clone();
        neg.zone = zone.to_string();
        neg.self_link = neg_self_link(zone, &neg.name);
        state.negs.insert(key, neg);
        Ok(())
    }

    async fn delete_neg(&self, name: &str, zone: &str) -> Result<(), CloudError> {
        self.record(Call::DeleteNeg(zone.to_string(), name.to_string()));
        self.check("delete_neg")?;
        let mut state = self.state();
        if state.in_use.contains(name) {
            return Err(CloudError::InUseBy {
                kind: "networkEndpointGroup".to_string(),
                name: name.to_string(),
                message: "attached to a backend service".to_string(),
            });
        }
        let key = (zone.to_string(), name.to_string());
        state.endpoints.remove(&key);
        state
            .negs
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| not_found("networkEndpointGroup", name))
    }

    async fn list_negs(&self, zone: &str) -> Result<Vec<NetworkEndpointGroup>, CloudError> {
        self.record(Call::ListNegs(zone.to_string()));
        self.check("list_negs")?;
        Ok(self
            .state()
            .negs
            .iter()
            .filter(|((z, _), _)| z == zone)
            .map(|(_, neg)| neg.clone())
            .collect())
    }

    async fn list_network_endpoints(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Vec<NetworkEndpoint>, CloudError> {
        self.check("list_network_endpoints")?;
        Ok(self.endpoints(zone, name).into_iter().collect())
    }

    async fn attach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError> {
        self.record(Call::Attach(name.to_string(), endpoints.len()));
        self.check("attach_network_endpoints")?;
        self.state()
            .endpoints
            .entry((zone.to_string(), name.to_string()))
            .or_default()
            .extend(endpoints.iter().cloned());
        Ok(())
    }

    async fn detach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError> {
        self.record(Call::Detach(name.to_string(), endpoints.len()));
        self.check("detach_network_endpoints")?;
        if let Some(set) = self
            .state()
            .endpoints
            .get_mut(&(zone.to_string(), name.to_string()))
        {
            for ep in endpoints {
                set.remove(ep);
            }
        }
        Ok(())
    }
}
