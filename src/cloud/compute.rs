// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! REST adapter for the compute API.
//!
//! A thin `reqwest` client implementing [`BackendServiceCloud`] and
//! [`NegCloud`]. It maps HTTP failures onto the three error classes the
//! controller understands:
//!
//! - HTTP 404 → [`CloudError::NotFound`]
//! - any failure mentioning `resourceInUseByAnotherResource` → [`CloudError::InUseBy`]
//! - everything else → [`CloudError::Api`]
//!
//! Mutating calls return a long-running operation which is waited on before
//! returning, so a create is visible to the re-fetch that follows it.
//! Transient failures are not retried here; the queue and syncer backoff
//! handle retries.

use super::{
    ApiVersion, BackendService, BackendServiceCloud, HealthStatus, NegCloud, NetworkEndpoint,
    NetworkEndpointGroup, Scope,
};
use crate::errors::CloudError;
use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error};
use url::Url;

/// Default compute API endpoint
pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/";

/// Error reason the compute API uses for referenced resources
const IN_USE_REASON: &str = "resourceInUseByAnotherResource";

/// Operation error code for referenced resources
const IN_USE_OPERATION_CODE: &str = "RESOURCE_IN_USE_BY_ANOTHER_RESOURCE";

/// Maximum number of `wait` calls on a single operation
const MAX_OPERATION_POLLS: usize = 30;

const BACKEND_SERVICE: &str = "backendService";
const NEG: &str = "networkEndpointGroup";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Operation {
    #[serde(default)]
    status: String,
    #[serde(default)]
    self_link: String,
    #[serde(default)]
    error: Option<OperationErrors>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationErrors {
    #[serde(default)]
    errors: Vec<OperationError>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointWithHealth {
    network_endpoint: NetworkEndpoint,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackendServiceGroupHealth {
    #[serde(default)]
    health_status: Vec<HealthStatus>,
}

/// Compute API client bound to one project and region.
#[derive(Clone, Debug)]
pub struct ComputeClient {
    http: HttpClient,
    base: Url,
    project: String,
    region: String,
    token: Option<String>,
}

impl ComputeClient {
    /// Create a client.
    ///
    /// # Arguments
    /// * `endpoint` - API root, e.g. [`DEFAULT_COMPUTE_ENDPOINT`]
    /// * `project` - Project owning the resources
    /// * `region` - Region of regional backend services
    /// * `token` - Optional OAuth bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoint` is not a valid URL.
    pub fn new(
        http: HttpClient,
        endpoint: &str,
        project: &str,
        region: &str,
        token: Option<String>,
    ) -> Result<Self, url::ParseError> {
        let mut endpoint = endpoint.to_string();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        Ok(Self {
            http,
            base: Url::parse(&endpoint)?,
            project: project.to_string(),
            region: region.to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, CloudError> {
        self.base
            .join(path)
            .map_err(|e| CloudError::Transport(format!("invalid URL {path}: {e}")))
    }

    fn backend_services_url(
        &self,
        version: ApiVersion,
        scope: Scope,
        suffix: &str,
    ) -> Result<Url, CloudError> {
        let location = match scope {
            Scope::Global => "global".to_string(),
            Scope::Regional => format!("regions/{}", self.region),
        };
        self.url(&format!(
            "{}/projects/{}/{location}/backendServices{suffix}",
            version.path_segment(),
            self.project
        ))
    }

    fn negs_url(&self, zone: &str, suffix: &str) -> Result<Url, CloudError> {
        self.url(&format!(
            "{}/projects/{}/zones/{zone}/networkEndpointGroups{suffix}",
            ApiVersion::Ga.path_segment(),
            self.project
        ))
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        kind: &str,
        name: &str,
    ) -> Result<String, CloudError> {
        debug!(method = %method, url = %url, "Compute API request");

        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CloudError::Transport(format!("failed to send request to {url}: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CloudError::Transport(format!("failed to read response body: {e}")))?;

        if status.is_success() {
            return Ok(text);
        }

        error!(
            method = %method,
            url = %url,
            status = %status,
            error = %text,
            "Compute API request failed"
        );
        Err(map_http_error(status, &text, kind, name))
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        kind: &str,
        name: &str,
    ) -> Result<T, CloudError> {
        let text = self.send(method, url, body, kind, name).await?;
        serde_json::from_str(&text)
            .map_err(|e| CloudError::Transport(format!("failed to decode {kind} response: {e}")))
    }

    /// Send a mutating request and wait for its operation to finish.
    async fn mutate<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        kind: &str,
        name: &str,
    ) -> Result<(), CloudError> {
        let mut op: Operation = self.send_json(method, url, body, kind, name).await?;

        for _ in 0..MAX_OPERATION_POLLS {
            if op.status.is_empty() || op.status == "DONE" || op.self_link.is_empty() {
                return operation_result(&op, kind, name);
            }
            let wait = Url::parse(&format!("{}/wait", op.self_link))
                .map_err(|e| CloudError::Transport(format!("invalid operation link: {e}")))?;
            op = self
                .send_json(Method::POST, wait, None::<&()>, kind, name)
                .await?;
        }

        Err(CloudError::Api {
            code: StatusCode::GATEWAY_TIMEOUT.as_u16(),
            message: format!("operation on {kind} {name} did not complete"),
        })
    }

    async fn list_pages<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        kind: &str,
    ) -> Result<Vec<T>, CloudError> {
        let mut items = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut page_url = url.clone();
            if let Some(token) = &token {
                page_url.query_pairs_mut().append_pair("pageToken", token);
            }
            let page: ListPage<T> = self
                .send_json(method.clone(), page_url, None::<&()>, kind, "")
                .await?;
            items.extend(page.items);
            match page.next_page_token {
                Some(next) if !next.is_empty() => token = Some(next),
                _ => return Ok(items),
            }
        }
    }
}

fn map_http_error(status: StatusCode, body: &str, kind: &str, name: &str) -> CloudError {
    if status == StatusCode::NOT_FOUND {
        return CloudError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        };
    }
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    if body.contains(IN_USE_REASON) {
        return CloudError::InUseBy {
            kind: kind.to_string(),
            name: name.to_string(),
            message,
        };
    }
    CloudError::Api {
        code: status.as_u16(),
        message,
    }
}

fn operation_result(op: &Operation, kind: &str, name: &str) -> Result<(), CloudError> {
    let Some(first) = op.error.as_ref().and_then(|e| e.errors.first()) else {
        return Ok(());
    };
    if first.code == IN_USE_OPERATION_CODE {
        return Err(CloudError::InUseBy {
            kind: kind.to_string(),
            name: name.to_string(),
            message: first.message.clone(),
        });
    }
    Err(CloudError::Api {
        code: StatusCode::CONFLICT.as_u16(),
        message: format!("{}: {}", first.code, first.message),
    })
}

#[async_trait]
impl BackendServiceCloud for ComputeClient {
    async fn get_backend_service(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<BackendService, CloudError> {
        let url = self.backend_services_url(version, scope, &format!("/{name}"))?;
        let mut bs: BackendService = self
            .send_json(Method::GET, url, None::<&()>, BACKEND_SERVICE, name)
            .await?;
        bs.scope = Scope::from_self_link(&bs.self_link);
        Ok(bs)
    }

    async fn create_backend_service(
        &self,
        bs: &BackendService,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        let url = self.backend_services_url(version, scope, "")?;
        self.mutate(Method::POST, url, Some(bs), BACKEND_SERVICE, &bs.name)
            .await
    }

    async fn update_backend_service(
        &self,
        bs: &BackendService,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        let url = self.backend_services_url(version, scope, &format!("/{}", bs.name))?;
        self.mutate(Method::PUT, url, Some(bs), BACKEND_SERVICE, &bs.name)
            .await
    }

    async fn delete_backend_service(
        &self,
        name: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<(), CloudError> {
        let url = self.backend_services_url(version, scope, &format!("/{name}"))?;
        self.mutate(Method::DELETE, url, None::<&()>, BACKEND_SERVICE, name)
            .await
    }

    async fn list_backend_services(
        &self,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<Vec<BackendService>, CloudError> {
        let url = self.backend_services_url(version, scope, "")?;
        let mut list: Vec<BackendService> =
            self.list_pages(Method::GET, url, BACKEND_SERVICE).await?;
        for bs in &mut list {
            bs.scope = Scope::from_self_link(&bs.self_link);
        }
        Ok(list)
    }

    async fn get_backend_service_health(
        &self,
        name: &str,
        group: &str,
        version: ApiVersion,
        scope: Scope,
    ) -> Result<Vec<HealthStatus>, CloudError> {
        let url = self.backend_services_url(version, scope, &format!("/{name}/getHealth"))?;
        let body = json!({ "group": group });
        let health: BackendServiceGroupHealth = self
            .send_json(Method::POST, url, Some(&body), BACKEND_SERVICE, name)
            .await?;
        Ok(health.health_status)
    }
}

#[async_trait]
impl NegCloud for ComputeClient {
    async fn get_neg(&self, name: &str, zone: &str) -> Result<NetworkEndpointGroup, CloudError> {
        let url = self.negs_url(zone, &format!("/{name}"))?;
        self.send_json(Method::GET, url, None::<&()>, NEG, name)
            .await
    }

    async fn create_neg(&self, neg: &NetworkEndpointGroup, zone: &str) -> Result<(), CloudError> {
        let url = self.negs_url(zone, "")?;
        self.mutate(Method::POST, url, Some(neg), NEG, &neg.name)
            .await
    }

    async fn delete_neg(&self, name: &str, zone: &str) -> Result<(), CloudError> {
        let url = self.negs_url(zone, &format!("/{name}"))?;
        self.mutate(Method::DELETE, url, None::<&()>, NEG, name)
            .await
    }

    async fn list_negs(&self, zone: &str) -> Result<Vec<NetworkEndpointGroup>, CloudError> {
        let url = self.negs_url(zone, "")?;
        self.list_pages(Method::GET, url, NEG).await
    }

    async fn list_network_endpoints(
        &self,
        name: &str,
        zone: &str,
    ) -> Result<Vec<NetworkEndpoint>, CloudError> {
        let url = self.negs_url(zone, &format!("/{name}/listNetworkEndpoints"))?;
        let items: Vec<EndpointWithHealth> = self.list_pages(Method::POST, url, NEG).await?;
        Ok(items.into_iter().map(|i| i.network_endpoint).collect())
    }

    async fn attach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError> {
        let url = self.negs_url(zone, &format!("/{name}/attachNetworkEndpoints"))?;
        let body = json!({ "networkEndpoints": endpoints });
        self.mutate(Method::POST, url, Some(&body), NEG, name)
            .await
    }

    async fn detach_network_endpoints(
        &self,
        name: &str,
        zone: &str,
        endpoints: &[NetworkEndpoint],
    ) -> Result<(), CloudError> {
        let url = self.negs_url(zone, &format!("/{name}/detachNetworkEndpoints"))?;
        let body = json!({ "networkEndpoints": endpoints });
        self.mutate(Method::POST, url, Some(&body), NEG, name)
            .await
    }
}

#[cfg(test)]
#[path = "compute_tests.rs"]
mod compute_tests;
