// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Writes the `cloud.google.com/neg-status` annotation.
//!
//! The value lists the zones covering the map's endpoint calculation mode and
//! the NEG of every port. It is only patched when it differs from what the
//! service already carries, and removed when the map is empty.

use crate::annotations::{annotation, NegStatus};
use crate::constants::NEG_STATUS_ANNOTATION_KEY;
use crate::types::PortInfoMap;
use crate::zones::ZoneGetter;
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Change to apply to the status annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    Set(String),
    Remove,
    Unchanged,
}

/// Decide how the annotation must change.
///
/// An existing value that parses to the same status is left alone even if it
/// is formatted differently.
///
/// # Errors
///
/// Returns an error if the new status cannot be serialized.
pub fn compute_status_update(
    existing: Option<&str>,
    zones: Vec<String>,
    port_info_map: &PortInfoMap,
) -> Result<StatusUpdate, serde_json::Error> {
    if port_info_map.is_empty() {
        return Ok(if existing.is_some() {
            StatusUpdate::Remove
        } else {
            StatusUpdate::Unchanged
        });
    }

    let status = NegStatus::new(zones, &port_info_map.to_port_neg_map());
    let unchanged = existing
        .and_then(|value| serde_json::from_str::<NegStatus>(value).ok())
        .is_some_and(|current| current == status);
    if unchanged {
        return Ok(StatusUpdate::Unchanged);
    }
    Ok(StatusUpdate::Set(status.marshal()?))
}

/// Writes one annotation on a service.
#[async_trait]
pub trait ServiceAnnotator: Send + Sync {
    /// Set `key` to `value`, or remove it when `value` is `None`.
    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()>;
}

/// [`ServiceAnnotator`] using a merge patch against the API server.
pub struct KubeServiceAnnotator {
    client: Client,
}

impl KubeServiceAnnotator {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ServiceAnnotator for KubeServiceAnnotator {
    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> Result<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        // a null value removes the key
        let patch = json!({ "metadata": { "annotations": { key: value } } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("failed to patch annotation {key} on {namespace}/{name}"))?;
        Ok(())
    }
}

/// Keeps the status annotation of services in line with their NEGs.
pub struct StatusWriter {
    annotator: Arc<dyn ServiceAnnotator>,
    zones: Arc<dyn ZoneGetter>,
}

impl StatusWriter {
    #[must_use]
    pub fn new(annotator: Arc<dyn ServiceAnnotator>, zones: Arc<dyn ZoneGetter>) -> Self {
        Self { annotator, zones }
    }

    /// Patch the annotation of `service` if `port_info_map` changed it.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the patch fails.
    pub async fn sync(&self, service: &Service, port_info_map: &PortInfoMap) -> Result<()> {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let key = format!("{namespace}/{name}");
        let zones = self
            .zones
            .list_zones(port_info_map.endpoints_calculator_mode());
        let existing = annotation(service, NEG_STATUS_ANNOTATION_KEY);

        match compute_status_update(existing, zones, port_info_map)
            .context("failed to serialize NEG status")?
        {
            StatusUpdate::Unchanged => {
                debug!(service = %key, "NEG status unchanged");
                Ok(())
            }
            StatusUpdate::Remove => {
                info!(service = %key, "Removing NEG status annotation");
                self.annotator
                    .annotate(&namespace, &name, NEG_STATUS_ANNOTATION_KEY, None)
                    .await
            }
            StatusUpdate::Set(value) => {
                info!(service = %key, status = %value, "Updating NEG status annotation");
                self.annotator
                    .annotate(&namespace, &name, NEG_STATUS_ANNOTATION_KEY, Some(&value))
                    .await
            }
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod status_tests;
