// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic names for remote NEGs and backend services.
//!
//! Every remote object this controller creates is named so that it can be
//! traced back to the owning cluster:
//!
//! - `k8s1-<uid8>-<namespace>-<name>-<port>-<hash8>` for L7 and standalone NEGs
//! - `k8s2-<uid8>-<namespace>-<name>-<hash8>` for L4 NEGs and backend services
//!
//! Namespace and service name are trimmed evenly so the result never exceeds
//! 63 characters. The hash is taken over the untrimmed fields so that trimmed
//! names remain unique.

use crate::constants::{
    CLUSTER_UID_NAME_LENGTH, L4_NAME_PREFIX, MAX_RESOURCE_NAME_LENGTH, NAME_HASH_LENGTH,
    NEG_NAME_PREFIX,
};
use sha2::{Digest, Sha256};

/// Generates and recognizes cluster-owned resource names.
#[derive(Clone, Debug)]
pub struct Namer {
    uid: String,
}

impl Namer {
    /// Create a namer for the given cluster UID.
    ///
    /// Only the first eight characters of the UID are embedded in names.
    #[must_use]
    pub fn new(cluster_uid: &str) -> Self {
        let uid: String = cluster_uid
            .to_ascii_lowercase()
            .chars()
            .take(CLUSTER_UID_NAME_LENGTH)
            .collect();
        Self { uid }
    }

    /// Cluster UID fragment embedded in names.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Name of the NEG for one service port.
    #[must_use]
    pub fn neg_name(&self, namespace: &str, name: &str, port: i32) -> String {
        let port = port.to_string();
        let prefix = format!("{NEG_NAME_PREFIX}-{}", self.uid);
        let hash = short_hash(&[&self.uid, namespace, name, &port]);

        // prefix-ns-name-port-hash: four separators
        let budget = MAX_RESOURCE_NAME_LENGTH - prefix.len() - hash.len() - 4;
        let trimmed = trim_fields_evenly(budget, &[namespace, name, &port]);
        format!(
            "{prefix}-{}-{}-{}-{hash}",
            trimmed[0], trimmed[1], trimmed[2]
        )
    }

    /// Name of the node-IP NEG (and its backend service) for an L4 service.
    #[must_use]
    pub fn l4_name(&self, namespace: &str, name: &str) -> String {
        let prefix = format!("{L4_NAME_PREFIX}-{}", self.uid);
        let hash = short_hash(&[&self.uid, namespace, name]);

        let budget = MAX_RESOURCE_NAME_LENGTH - prefix.len() - hash.len() - 3;
        let trimmed = trim_fields_evenly(budget, &[namespace, name]);
        format!("{prefix}-{}-{}-{hash}", trimmed[0], trimmed[1])
    }

    /// Returns `true` if the name was produced by this cluster's namer.
    #[must_use]
    pub fn name_belongs_to_cluster(&self, name: &str) -> bool {
        name.starts_with(&format!("{NEG_NAME_PREFIX}-{}-", self.uid))
            || self.is_l4_name(name)
    }

    /// Returns `true` if the name is one of this cluster's L4 names.
    #[must_use]
    pub fn is_l4_name(&self, name: &str) -> bool {
        name.starts_with(&format!("{L4_NAME_PREFIX}-{}-", self.uid))
    }
}

/// Returns `true` if the name is a valid remote resource name.
///
/// Names must match `[a-z]([-a-z0-9]*[a-z0-9])?` and be at most 63 characters.
#[must_use]
pub fn is_valid_resource_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_RESOURCE_NAME_LENGTH {
        return false;
    }
    if !bytes[0].is_ascii_lowercase() {
        return false;
    }
    if bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

fn short_hash(fields: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fields.join(";").as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..NAME_HASH_LENGTH].to_string()
}

/// Shorten the longest fields one character at a time until the total fits.
fn trim_fields_evenly(max_length: usize, fields: &[&str]) -> Vec<String> {
    let mut lengths: Vec<usize> = fields.iter().map(|f| f.len()).collect();
    while lengths.iter().sum::<usize>() > max_length {
        let Some((longest, _)) = lengths
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.cmp(b).then(ib.cmp(ia)))
        else {
            break;
        };
        lengths[longest] -= 1;
    }
    fields
        .iter()
        .zip(lengths)
        .map(|(f, len)| f.chars().take(len).collect())
        .collect()
}

#[cfg(test)]
#[path = "namer_tests.rs"]
mod namer_tests;
