// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for NEG and backend service reconciliation.
//!
//! This module provides specialized error types for:
//! - Remote compute API operations (NEGs, backend services, health)
//! - Desired-state resolution (port conflicts, invalid exposure configuration)
//! - Service annotation parsing
//!
//! Orchestration code wraps these in `anyhow::Error` with context; the
//! helpers on [`CloudError`] let callers branch on the remote error taxonomy.

use thiserror::Error;

/// Errors returned by the remote compute API.
///
/// The controller only distinguishes three classes of remote failure: the
/// object does not exist, the object is referenced by another resource, and
/// everything else (including conflicts and fingerprint mismatches).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The requested object does not exist (HTTP 404)
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Resource kind (e.g. `backendService`, `networkEndpointGroup`)
        kind: String,
        /// Resource name
        name: String,
    },

    /// The object cannot be removed because another resource references it
    ///
    /// Returned for deletes of NEGs still attached to a backend service, or
    /// backend services still referenced by a URL map or forwarding rule.
    #[error("{kind} '{name}' is in use by another resource: {message}")]
    InUseBy {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Message returned by the remote API
        message: String,
    },

    /// Any other non-success response from the remote API
    #[error("compute API returned HTTP {code}: {message}")]
    Api {
        /// HTTP status code
        code: u16,
        /// Message returned by the remote API
        message: String,
    },

    /// The request never produced a response (connection, TLS, decoding)
    #[error("compute API transport error: {0}")]
    Transport(String),
}

impl CloudError {
    /// Returns `true` if the remote object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound { .. })
    }

    /// Returns `true` if the remote object is referenced by another resource.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        matches!(self, CloudError::InUseBy { .. })
    }
}

/// Errors produced while parsing service annotations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    /// The annotation value is not valid JSON for the expected shape
    #[error("failed to parse annotation {key}: {reason}")]
    Parse {
        /// Annotation key
        key: String,
        /// Parser error
        reason: String,
    },

    /// An exposed port key is not a valid port number
    #[error("annotation {key} exposes invalid port '{port}'")]
    InvalidPort {
        /// Annotation key
        key: String,
        /// The offending port key
        port: String,
    },
}

/// Errors produced while resolving the desired NEG configuration of a service.
///
/// All of these are configuration errors: the controller requeues the
/// service with backoff and publishes a warning event on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Two sources assigned divergent attributes to the same service port
    #[error("conflicting NEG configuration for {key}: {reason}")]
    Conflict {
        /// The colliding key (`namespace/name:port`)
        key: String,
        /// Which attribute diverged
        reason: String,
    },

    /// The exposure annotation names a port the service does not declare
    #[error("port {port} exposed by annotation is not declared on service {service}")]
    UndeclaredPort {
        /// Service key (`namespace/name`)
        service: String,
        /// The exposed port
        port: i32,
    },

    /// Custom NEG names were requested together with ingress exposure
    #[error(
        "configuration for negs in service {service} is invalid, custom neg name cannot be used with ingress enabled"
    )]
    CustomNameWithIngress {
        /// Service key (`namespace/name`)
        service: String,
    },

    /// A custom NEG name is not a valid remote resource name
    #[error("custom neg name '{name}' for service {service} is invalid")]
    InvalidCustomName {
        /// Service key (`namespace/name`)
        service: String,
        /// The rejected name
        name: String,
    },

    /// Single-stack IPv6 services are only supported as load balancers
    #[error("NEG is not supported for ipv6 only service {service}")]
    UnsupportedIpv6 {
        /// Service key (`namespace/name`)
        service: String,
    },

    /// The service carries an unparseable annotation
    #[error(transparent)]
    Annotation(#[from] AnnotationError),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
