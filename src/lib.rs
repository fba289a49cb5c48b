// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # negsync - Network Endpoint Group controller for Kubernetes
//!
//! negsync keeps cloud network endpoint groups (NEGs) and L4 backend services
//! in step with the Services, Ingresses, EndpointSlices and Nodes of a cluster.
//!
//! ## Overview
//!
//! For every Service the controller resolves the set of NEGs it needs
//! ([`resolver`]), publishes that set in the Service's NEG status annotation
//! ([`status`]), and runs one syncer per NEG ([`syncer`]) that keeps the NEG's
//! endpoints equal to the ready endpoints of the Service in every zone.
//! Remote resources left behind by removed Services are collected by [`gc`].
//!
//! ## Modules
//!
//! - [`controller`] - Queue workers and per-service reconciliation
//! - [`resolver`] - Desired NEG set of a Service
//! - [`syncer`] - Per-port NEG syncers and their manager
//! - [`backends`] - Backend service reconciler
//! - [`cloud`] - Compute API traits and the REST adapter
//! - [`watch`] - Reflector pump producing typed change events
//!
//! ## Example
//!
//! ```rust
//! use negsync::namer::Namer;
//!
//! let namer = Namer::new("cluster-uid");
//! let neg = namer.neg_name("default", "web", 80);
//! assert!(namer.name_belongs_to_cluster(&neg));
//! ```

pub mod annotations;
pub mod backends;
pub mod cloud;
pub mod config;
pub mod constants;
pub mod context;
pub mod controller;
pub mod errors;
pub mod events;
pub mod gc;
pub mod health;
pub mod labels;
pub mod metrics;
pub mod namer;
pub mod queue;
pub mod resolver;
pub mod server;
pub mod status;
pub mod syncer;
pub mod types;
pub mod watch;
pub mod zones;

#[cfg(test)]
pub(crate) mod fixtures;
