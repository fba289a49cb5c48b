// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `ingress.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::fixtures::{create_ingress, create_service};

    #[test]
    fn test_ingress_class_predicates() {
        let plain = create_ingress("default", "i", None, None, &[]);
        let gce = create_ingress("default", "i", Some("gce"), None, &[]);
        let ilb = create_ingress("default", "i", Some("gce-internal"), None, &[]);
        let regional = create_ingress("default", "i", Some("gce-regional-external"), None, &[]);
        let nginx = create_ingress("default", "i", Some("nginx"), None, &[]);

        assert!(is_gce_ingress(&plain, false));
        assert!(is_gce_ingress(&gce, false));
        assert!(is_gce_ingress(&ilb, false));
        assert!(!is_gce_ingress(&regional, false));
        assert!(is_gce_ingress(&regional, true));
        assert!(!is_gce_ingress(&nginx, true));

        assert!(is_l7_ilb_ingress(&ilb));
        assert!(!is_l7_ilb_ingress(&gce));
        assert!(is_l7_xlb_regional_ingress(&regional));
    }

    /// Test that an ingress class name without annotation belongs to another controller
    #[test]
    fn test_ingress_class_name_is_not_gce() {
        let mut ing = create_ingress("default", "i", None, None, &[]);
        ing.spec.as_mut().unwrap().ingress_class_name = Some("nginx".to_string());
        assert!(!is_gce_ingress(&ing, true));
    }

    #[test]
    fn test_ingress_backends_order_and_keys() {
        let ing = create_ingress(
            "shop",
            "i",
            None,
            Some(("fallback", 80)),
            &[("web", 80), ("api", 8080)],
        );

        let ids = ingress_backends(&ing);
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].name, "fallback");
        assert_eq!(ids[2].port, BackendPort::Number(8080));

        let keys: Vec<_> = ingress_service_keys(&ing).into_iter().collect();
        assert_eq!(keys, vec!["shop/api", "shop/fallback", "shop/web"]);
        assert!(has_default_backend(&ing));
    }

    #[test]
    fn test_ports_used_by_ingresses() {
        let svc = create_service("default", "web", &[(80, "http", 8080), (443, "https", 8443)]);
        let ingresses = vec![
            Arc::new(create_ingress("default", "a", None, None, &[("web", 80)])),
            Arc::new(create_ingress("default", "b", Some("nginx"), None, &[("web", 443)])),
            Arc::new(create_ingress("other", "c", None, None, &[("web", 443)])),
            Arc::new(create_ingress("default", "d", None, None, &[("web", 9999)])),
        ];

        let tuples = ports_used_by_ingresses(&ingresses, &svc, false);

        assert_eq!(
            tuples.into_iter().collect::<Vec<_>>(),
            vec![SvcPortTuple {
                port: 80,
                name: "http".to_string(),
                target_port: "8080".to_string(),
            }]
        );
    }

    #[test]
    fn test_named_backend_port() {
        let svc = create_service("default", "web", &[(80, "http", 8080)]);
        let mut ing = create_ingress("default", "a", None, None, &[("web", 80)]);
        let path = &mut ing.spec.as_mut().unwrap().rules.as_mut().unwrap()[0]
            .http
            .as_mut()
            .unwrap()
            .paths[0];
        path.backend.service.as_mut().unwrap().port = Some(
            k8s_openapi::api::networking::v1::ServiceBackendPort {
                name: Some("http".to_string()),
                number: None,
            },
        );

        let tuples = ports_used_by_ingresses(&[Arc::new(ing)], &svc, false);
        assert_eq!(tuples.len(), 1);
    }

    #[test]
    fn test_ingresses_for_service() {
        let svc = create_service("default", "web", &[(80, "", 8080)]);
        let ingresses = vec![
            Arc::new(create_ingress("default", "a", None, None, &[("web", 80)])),
            Arc::new(create_ingress("default", "b", None, None, &[("api", 80)])),
            Arc::new(create_ingress("other", "c", None, None, &[("web", 80)])),
        ];

        let found = ingresses_for_service(&ingresses, &svc, false);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name_any(), "a");
    }

    /// Test that an unset target port defaults to the port number
    #[test]
    fn test_port_tuple_defaults_target_port() {
        let port = ServicePort {
            port: 80,
            ..Default::default()
        };
        assert_eq!(port_tuple(&port).target_port, "80");

        let named = ServicePort {
            port: 80,
            target_port: Some(IntOrString::String("http".to_string())),
            ..Default::default()
        };
        assert_eq!(port_tuple(&named).target_port, "http");
    }
}
