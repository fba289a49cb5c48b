// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared helpers for the integration tests.
//!
//! The compute API is served by a `wiremock` server; cluster state lives in
//! reflector stores filled by hand.

#![allow(dead_code)]

use k8s_openapi::api::core::v1::Node;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use negsync::cloud::compute::ComputeClient;
use negsync::metrics::NoopMetrics;
use negsync::namer::Namer;
use serde_json::json;
use std::sync::Arc;
use wiremock::{MockServer, ResponseTemplate};

pub const PROJECT: &str = "p";
pub const REGION: &str = "r";
pub const CLUSTER_UID: &str = "uid1";

/// Compute client pointed at the mock server.
pub fn compute_client(server: &MockServer) -> Arc<ComputeClient> {
    Arc::new(
        ComputeClient::new(
            reqwest::Client::new(),
            &format!("{}/compute", server.uri()),
            PROJECT,
            REGION,
            None,
        )
        .unwrap(),
    )
}

pub fn namer() -> Namer {
    Namer::new(CLUSTER_UID)
}

pub fn metrics() -> Arc<NoopMetrics> {
    Arc::new(NoopMetrics)
}

/// A finished long-running operation.
pub fn done() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"status": "DONE"}))
}

/// A single-page list response.
pub fn items(items: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "items": items }))
}

pub fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": {"code": 404, "message": "not found"}
    }))
}

/// A ready, schedulable node in `zone`.
pub fn node(name: &str, zone: &str, ip: &str) -> Node {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "Node",
        "metadata": {
            "name": name,
            "labels": {"topology.kubernetes.io/zone": zone}
        },
        "status": {
            "conditions": [{"type": "Ready", "status": "True"}],
            "addresses": [{"type": "InternalIP", "address": ip}]
        }
    }))
    .unwrap()
}

pub fn node_store(nodes: Vec<Node>) -> Store<Node> {
    let (reader, mut writer) = reflector::store::<Node>();
    for node in nodes {
        writer.apply_watcher_event(&watcher::Event::Apply(node));
    }
    reader
}
