// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes object builders shared by unit tests.

use crate::constants::NEG_ANNOTATION_KEY;
use crate::events::EventPublisher;
use crate::labels::{
    ENDPOINT_SLICE_SERVICE_NAME, INGRESS_CLASS_ANNOTATION, NODE_ADDRESS_INTERNAL_IP,
    NODE_CONDITION_READY, TOPOLOGY_ZONE,
};
use crate::status::ServiceAnnotator;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, ObjectReference, Service,
    ServicePort, ServiceSpec,
};
use k8s_openapi::api::discovery::v1::{
    Endpoint, EndpointConditions, EndpointPort, EndpointSlice,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::runtime::events::EventType;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher;
use std::collections::BTreeMap;
use std::sync::Mutex;

pub(crate) fn create_service(namespace: &str, name: &str, ports: &[(i32, &str, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            ports: Some(
                ports
                    .iter()
                    .map(|(port, port_name, target)| ServicePort {
                        port: *port,
                        name: (!port_name.is_empty()).then(|| (*port_name).to_string()),
                        protocol: Some("TCP".to_string()),
                        target_port: Some(IntOrString::Int(*target)),
                        ..Default::default()
                    })
                    .collect(),
            ),
            selector: Some(BTreeMap::from([("app".to_string(), name.to_string())])),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn with_annotation(mut service: Service, key: &str, value: &str) -> Service {
    service
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    service
}

pub(crate) fn with_neg_annotation(service: Service, value: &str) -> Service {
    with_annotation(service, NEG_ANNOTATION_KEY, value)
}

/// A GCE ingress routing `paths` (service name, port number) plus an optional default backend.
pub(crate) fn create_ingress(
    namespace: &str,
    name: &str,
    class: Option<&str>,
    default_backend: Option<(&str, i32)>,
    paths: &[(&str, i32)],
) -> Ingress {
    let backend = |svc: &str, port: i32| IngressBackend {
        resource: None,
        service: Some(IngressServiceBackend {
            name: svc.to_string(),
            port: Some(ServiceBackendPort {
                name: None,
                number: Some(port),
            }),
        }),
    };
    Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: class.map(|c| {
                BTreeMap::from([(INGRESS_CLASS_ANNOTATION.to_string(), c.to_string())])
            }),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            default_backend: default_backend.map(|(svc, port)| backend(svc, port)),
            rules: Some(vec![IngressRule {
                host: None,
                http: Some(HTTPIngressRuleValue {
                    paths: paths
                        .iter()
                        .map(|(svc, port)| HTTPIngressPath {
                            backend: backend(svc, *port),
                            path: Some("/".to_string()),
                            path_type: "Prefix".to_string(),
                        })
                        .collect(),
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub(crate) fn create_node(name: &str, zone: &str, ip: &str, ready: bool) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                TOPOLOGY_ZONE.to_string(),
                zone.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(NodeSpec::default()),
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                address: ip.to_string(),
                type_: NODE_ADDRESS_INTERNAL_IP.to_string(),
            }]),
            conditions: Some(vec![NodeCondition {
                type_: NODE_CONDITION_READY.to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

/// An EndpointSlice of `service` exposing `port_name`/`port` on `endpoints` (ip, node, ready).
pub(crate) fn create_endpoint_slice(
    namespace: &str,
    service: &str,
    port_name: &str,
    port: i32,
    endpoints: &[(&str, &str, bool)],
) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(format!("{service}-abcde")),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                ENDPOINT_SLICE_SERVICE_NAME.to_string(),
                service.to_string(),
            )])),
            ..Default::default()
        },
        address_type: "IPv4".to_string(),
        endpoints: endpoints
            .iter()
            .map(|(ip, node, ready)| Endpoint {
                addresses: vec![(*ip).to_string()],
                node_name: Some((*node).to_string()),
                conditions: Some(EndpointConditions {
                    ready: Some(*ready),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
        ports: Some(vec![EndpointPort {
            name: Some(port_name.to_string()),
            port: Some(port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
    }
}

/// A reflector store pre-populated with `items`.
pub(crate) fn create_store<K>(items: Vec<K>) -> Store<K>
where
    K: kube::Resource + Clone + 'static,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone,
{
    let (reader, mut writer) = reflector::store::<K>();
    for item in items {
        writer.apply_watcher_event(&watcher::Event::Apply(item));
    }
    reader
}

/// Annotation patches captured by [`RecordingAnnotator`]: (namespace, name, key, value).
pub(crate) type AnnotationPatch = (String, String, String, Option<String>);

/// [`ServiceAnnotator`] that records every patch instead of sending it.
#[derive(Default)]
pub(crate) struct RecordingAnnotator {
    pub patches: Mutex<Vec<AnnotationPatch>>,
    pub fail: Mutex<bool>,
}

impl RecordingAnnotator {
    pub fn patches(&self) -> Vec<AnnotationPatch> {
        self.patches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceAnnotator for RecordingAnnotator {
    async fn annotate(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        value: Option<&str>,
    ) -> anyhow::Result<()> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("patch rejected");
        }
        self.patches.lock().unwrap().push((
            namespace.to_string(),
            name.to_string(),
            key.to_string(),
            value.map(str::to_string),
        ));
        Ok(())
    }
}

/// [`EventPublisher`] that keeps (object name, reason, note) of every event.
#[derive(Default)]
pub(crate) struct RecordingPublisher {
    pub events: Mutex<Vec<(String, String, String)>>,
}

impl RecordingPublisher {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push((
            resource_ref.name.clone().unwrap_or_default(),
            reason.to_string(),
            note.unwrap_or_default(),
        ));
    }
}
