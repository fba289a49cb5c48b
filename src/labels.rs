// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Well-known Kubernetes label and annotation keys read by the controller.
//!
//! These keys are owned by Kubernetes itself or by the ingress tooling; the
//! controller only reads them.

// ============================================================================
// Kubernetes Standard Labels
// ============================================================================

/// Topology label carrying the zone of a node
pub const TOPOLOGY_ZONE: &str = "topology.kubernetes.io/zone";

/// Label on an `EndpointSlice` naming the service it belongs to
pub const ENDPOINT_SLICE_SERVICE_NAME: &str = "kubernetes.io/service-name";

/// Label excluding a node from external load balancer backends
pub const EXCLUDE_FROM_EXTERNAL_LB: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

/// Legacy label excluding a node from load balancer backends
pub const EXCLUDE_BALANCER_LEGACY: &str = "alpha.service-controller.kubernetes.io/exclude-balancer";

// ============================================================================
// Ingress Class
// ============================================================================

/// Annotation selecting the ingress class
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

/// Ingress class for the global external L7 load balancer
pub const GCE_INGRESS_CLASS: &str = "gce";

/// Ingress class for the internal L7 load balancer
pub const GCE_L7ILB_INGRESS_CLASS: &str = "gce-internal";

/// Ingress class for the regional external L7 load balancer
pub const GCE_L7XLB_REGIONAL_INGRESS_CLASS: &str = "gce-regional-external";

// ============================================================================
// Service Spec Values
// ============================================================================

/// `spec.type` of a load balancer service
pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// `spec.externalTrafficPolicy` keeping traffic on the receiving node
pub const TRAFFIC_POLICY_LOCAL: &str = "Local";

/// `spec.ipFamilyPolicy` for single-stack services
pub const IP_FAMILY_POLICY_SINGLE_STACK: &str = "SingleStack";

/// IPv6 address family
pub const IP_FAMILY_IPV6: &str = "IPv6";

/// `spec.sessionAffinity` pinning clients by source IP
pub const SESSION_AFFINITY_CLIENT_IP: &str = "ClientIP";

// ============================================================================
// Node Status Values
// ============================================================================

/// Node condition type reporting readiness
pub const NODE_CONDITION_READY: &str = "Ready";

/// Node address type for the internal IP
pub const NODE_ADDRESS_INTERNAL_IP: &str = "InternalIP";
