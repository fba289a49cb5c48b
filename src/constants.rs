// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the negsync controller.
//!
//! This module contains the numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// Annotation Keys
// ============================================================================

/// Exposure annotation on a Service selecting ingress and standalone NEGs
pub const NEG_ANNOTATION_KEY: &str = "cloud.google.com/neg";

/// Status annotation written back on a Service with the per-zone NEG mapping
pub const NEG_STATUS_ANNOTATION_KEY: &str = "cloud.google.com/neg-status";

/// Annotation requesting an internal L4 load balancer
pub const L4_LB_TYPE_ANNOTATION_KEY: &str = "networking.gke.io/load-balancer-type";

/// Legacy annotation requesting an internal L4 load balancer
pub const L4_LB_TYPE_LEGACY_ANNOTATION_KEY: &str = "cloud.google.com/load-balancer-type";

/// Value of the load balancer type annotation for internal load balancers
pub const L4_LB_TYPE_INTERNAL: &str = "Internal";

/// Annotation opting a NetLB service into regional backend services
pub const RBS_ANNOTATION_KEY: &str = "cloud.google.com/l4-rbs";

/// Value of [`RBS_ANNOTATION_KEY`] that enables regional backend services
pub const RBS_ENABLED: &str = "enabled";

/// Annotation selecting a non-default network for a Service
pub const NETWORK_ANNOTATION_KEY: &str = "networking.gke.io/network";

// ============================================================================
// Finalizers
// ============================================================================

/// Finalizer the L4 controller places on ILB services it handles with NEG subsetting
pub const ILB_V2_FINALIZER: &str = "gke.networking.io/l4-ilb-v2";

// ============================================================================
// Naming
// ============================================================================

/// Prefix for NEGs owned by ingress and standalone exposure
pub const NEG_NAME_PREFIX: &str = "k8s1";

/// Prefix for L4 (VM-IP) NEGs and backend services
pub const L4_NAME_PREFIX: &str = "k8s2";

/// Maximum length of any remote resource name
pub const MAX_RESOURCE_NAME_LENGTH: usize = 63;

/// Number of cluster UID characters embedded in resource names
pub const CLUSTER_UID_NAME_LENGTH: usize = 8;

/// Number of hash characters appended to resource names
pub const NAME_HASH_LENGTH: usize = 8;

// ============================================================================
// Backend Service Constants
// ============================================================================

/// Connection draining timeout applied to TCP backend services
pub const DEFAULT_CONNECTION_DRAINING_TIMEOUT_SECS: i64 = 30;

/// Default connection tracking mode
pub const DEFAULT_TRACKING_MODE: &str = "PER_CONNECTION";

/// The only tracking mode supported with strong session affinity
pub const PER_SESSION_TRACKING_MODE: &str = "PER_SESSION";

/// Health state reported by the remote API for a healthy endpoint
pub const HEALTH_STATE_HEALTHY: &str = "HEALTHY";

// ============================================================================
// Controller Timing Constants
// ============================================================================

/// Period between garbage collection sweeps (also the initial grace delay)
pub const DEFAULT_GC_PERIOD_SECS: u64 = 120;

/// Period between unconditional syncer resyncs
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 600;

/// Maximum age of the last reconciliation pass before the controller is unhealthy
pub const STALENESS_BOUND_SECS: i64 = 3600;

/// Delay between polls while waiting for the reflector stores to sync
pub const CACHE_SYNC_POLL_INTERVAL_SECS: u64 = 5;

/// Base delay for per-key queue backoff
pub const QUEUE_BASE_DELAY_MILLIS: u64 = 5;

/// Maximum delay for per-key queue backoff (5 minutes)
pub const QUEUE_MAX_DELAY_SECS: u64 = 300;

/// Initial retry interval of a syncer after a failed sync
pub const SYNCER_RETRY_INITIAL_MILLIS: u64 = 1000;

/// Maximum retry interval of a syncer after repeated failed syncs
pub const SYNCER_RETRY_MAX_SECS: u64 = 300;

/// Maximum number of node endpoints placed in an L4 cluster-mode NEG
pub const MAX_L4_CLUSTER_ENDPOINTS: usize = 250;

// ============================================================================
// Process Constants
// ============================================================================

/// Component name used as the event reporter
pub const CONTROLLER_NAME: &str = "neg-controller";

/// Default bind address for the metrics and health endpoint
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8089";
