// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for compute API records.

#[cfg(test)]
mod tests {
    use super::super::*;
    use serde_json::json;

    #[test]
    fn test_api_version_order() {
        assert!(ApiVersion::Alpha < ApiVersion::Beta);
        assert!(ApiVersion::Beta < ApiVersion::Ga);
        assert_eq!(ApiVersion::Ga.path_segment(), "v1");
        assert_eq!(ApiVersion::default(), ApiVersion::Ga);
    }

    #[test]
    fn test_scope_from_self_link() {
        assert_eq!(
            Scope::from_self_link(
                "https://compute.googleapis.com/compute/v1/projects/p/regions/us-central1/backendServices/bs"
            ),
            Scope::Regional
        );
        assert_eq!(
            Scope::from_self_link(
                "https://compute.googleapis.com/compute/v1/projects/p/global/backendServices/bs"
            ),
            Scope::Global
        );
    }

    /// Test that records use the compute API field names
    #[test]
    fn test_backend_service_wire_format() {
        let bs = BackendService {
            name: "k8s2-bs".to_string(),
            protocol: "TCP".to_string(),
            load_balancing_scheme: "INTERNAL".to_string(),
            session_affinity: "NONE".to_string(),
            connection_draining: Some(ConnectionDraining {
                draining_timeout_sec: 30,
            }),
            health_checks: vec!["hc".to_string()],
            ..Default::default()
        };

        let value = serde_json::to_value(&bs).unwrap();
        assert_eq!(value["loadBalancingScheme"], "INTERNAL");
        assert_eq!(value["connectionDraining"]["drainingTimeoutSec"], 30);
        assert!(value.get("fingerprint").is_none());
        assert!(value.get("scope").is_none());
    }

    #[test]
    fn test_backend_service_decodes_partial_response() {
        let bs: BackendService = serde_json::from_value(json!({
            "name": "bs",
            "fingerprint": "abc=",
            "backends": [{"group": "neg-link"}],
        }))
        .unwrap();

        assert_eq!(bs.fingerprint, "abc=");
        assert_eq!(bs.backends.len(), 1);
        assert_eq!(bs.draining_timeout_sec(), 0);
        assert_eq!(bs.scope, Scope::Global);
    }

    #[test]
    fn test_neg_endpoint_type_wire_format() {
        let neg: NetworkEndpointGroup = serde_json::from_value(json!({
            "name": "neg",
            "networkEndpointType": "GCE_VM_IP",
        }))
        .unwrap();
        assert_eq!(neg.network_endpoint_type, NetworkEndpointType::VmIp);
    }
}
