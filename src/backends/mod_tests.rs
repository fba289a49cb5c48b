// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for the backend service reconciler.

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cloud::fake::{Call, FakeCloud};
    use crate::cloud::{Backend, HealthStatus};

    const UID: &str = "uid12345";

    fn backends(cloud: &Arc<FakeCloud>, connection_tracking: bool) -> Backends {
        Backends::new(cloud.clone(), Namer::new(UID), connection_tracking)
    }

    fn params(protocol: &str) -> L4BackendServiceParams {
        let namer = Namer::new(UID);
        L4BackendServiceParams {
            name: namer.l4_name("default", "ilb"),
            health_check_link: "projects/p/regions/r/healthChecks/hc".to_string(),
            protocol: protocol.to_string(),
            session_affinity: "None".to_string(),
            scheme: SCHEME_INTERNAL.to_string(),
            service_key: "default/ilb".to_string(),
            network: NetworkInfo {
                is_default: true,
                ..Default::default()
            },
            connection_tracking: None,
        }
    }

    fn sample() -> BackendService {
        BackendService {
            name: "bs".to_string(),
            description: "{}".to_string(),
            protocol: "TCP".to_string(),
            health_checks: vec!["hc-a".to_string(), "hc-b".to_string()],
            load_balancing_scheme: SCHEME_INTERNAL.to_string(),
            session_affinity: "NONE".to_string(),
            network: "net".to_string(),
            ..Default::default()
        }
    }

    /// Test that equality is reflexive and ignores backends and draining timeout
    #[test]
    fn test_backend_svc_equal_ignores_owned_fields() {
        let a = sample();
        assert!(backend_svc_equal(&a, &a, true));

        let mut b = a.clone();
        b.backends = vec![Backend {
            group: "neg".to_string(),
            balancing_mode: "CONNECTION".to_string(),
        }];
        b.connection_draining = Some(ConnectionDraining {
            draining_timeout_sec: 600,
        });
        b.health_checks.reverse();
        b.fingerprint = "other".to_string();
        assert!(backend_svc_equal(&a, &b, false));
    }

    #[test]
    fn test_backend_svc_equal_sensitive_fields() {
        let a = sample();
        let mutations: Vec<fn(&mut BackendService)> = vec![
            |b| b.protocol = "UDP".to_string(),
            |b| b.description = "changed".to_string(),
            |b| b.session_affinity = "CLIENT_IP".to_string(),
            |b| b.load_balancing_scheme = SCHEME_EXTERNAL.to_string(),
            |b| b.health_checks = vec!["hc-c".to_string()],
            |b| b.network = "other-net".to_string(),
        ];
        for mutate in mutations {
            let mut b = a.clone();
            mutate(&mut b);
            assert!(!backend_svc_equal(&a, &b, false), "expected {b:?} to differ");
        }
    }

    #[test]
    fn test_connection_tracking_compared_only_when_enabled() {
        let a = sample();
        let mut b = a.clone();
        b.connection_tracking_policy = Some(ConnectionTrackingPolicy {
            tracking_mode: "PER_SESSION".to_string(),
            enable_strong_affinity: true,
            idle_timeout_sec: 600,
        });

        assert!(backend_svc_equal(&a, &b, false));
        assert!(!backend_svc_equal(&a, &b, true));
    }

    /// Test that a missing backend service is created and re-fetched
    #[tokio::test]
    async fn test_ensure_creates_and_refetches() {
        let cloud = Arc::new(FakeCloud::new());
        let p = params("TCP");

        let bs = backends(&cloud, false)
            .ensure_l4_backend_service(&p)
            .await
            .unwrap();

        assert!(!bs.fingerprint.is_empty(), "re-fetch must return the fingerprint");
        assert_eq!(bs.scope, Scope::Regional);
        assert_eq!(bs.draining_timeout_sec(), 30);
        assert_eq!(bs.session_affinity, "NONE");
        assert_eq!(
            cloud.calls(),
            vec![
                Call::GetBackendService(p.name.clone(), ApiVersion::Ga),
                Call::CreateBackendService(p.name.clone()),
                Call::GetBackendService(p.name.clone(), ApiVersion::Ga),
            ]
        );
    }

    /// Test that a draining-timeout-only difference performs no update
    #[tokio::test]
    async fn test_ensure_skips_update_for_draining_timeout() {
        let cloud = Arc::new(FakeCloud::new());
        let p = params("TCP");
        let b = backends(&cloud, false);
        b.ensure_l4_backend_service(&p).await.unwrap();

        let mut tuned = cloud.backend_service(&p.name, Scope::Regional).unwrap();
        tuned.connection_draining = Some(ConnectionDraining {
            draining_timeout_sec: 120,
        });
        cloud.insert_backend_service(tuned, Scope::Regional);
        cloud.clear_calls();

        let bs = b.ensure_l4_backend_service(&p).await.unwrap();

        assert_eq!(bs.draining_timeout_sec(), 120);
        assert_eq!(
            cloud.count(|c| matches!(c, Call::UpdateBackendService(_))),
            0
        );
    }

    /// Test that an update carries fingerprint and backends and keeps a TCP override
    #[tokio::test]
    async fn test_ensure_update_preserves_remote_fields() {
        let cloud = Arc::new(FakeCloud::new());
        let b = backends(&cloud, false);
        let mut p = params("TCP");
        b.ensure_l4_backend_service(&p).await.unwrap();

        let mut existing = cloud.backend_service(&p.name, Scope::Regional).unwrap();
        existing.backends = vec![Backend {
            group: "zones/a/networkEndpointGroups/neg".to_string(),
            balancing_mode: "CONNECTION".to_string(),
        }];
        existing.connection_draining = Some(ConnectionDraining {
            draining_timeout_sec: 90,
        });
        cloud.insert_backend_service(existing, Scope::Regional);

        p.session_affinity = "ClientIP".to_string();
        let bs = b.ensure_l4_backend_service(&p).await.unwrap();

        assert_eq!(bs.session_affinity, "CLIENT_IP");
        assert_eq!(bs.backends.len(), 1, "backends must survive the update");
        assert_eq!(bs.draining_timeout_sec(), 90);
        assert_eq!(
            cloud.count(|c| matches!(c, Call::UpdateBackendService(_))),
            1
        );
    }

    /// Test that switching to UDP resets the draining timeout
    #[tokio::test]
    async fn test_ensure_udp_resets_draining() {
        let cloud = Arc::new(FakeCloud::new());
        let b = backends(&cloud, false);
        let mut existing = b.expected_l4_backend_service(&params("TCP"));
        existing.connection_draining = Some(ConnectionDraining {
            draining_timeout_sec: 90,
        });
        cloud.insert_backend_service(existing, Scope::Regional);

        let bs = b.ensure_l4_backend_service(&params("UDP")).await.unwrap();

        assert_eq!(bs.protocol, "UDP");
        assert_eq!(bs.draining_timeout_sec(), 0);
    }

    /// Test that a concurrent writer surfaces as an ordinary error
    #[tokio::test]
    async fn test_ensure_fingerprint_conflict_is_error() {
        let cloud = Arc::new(FakeCloud::new());
        let b = backends(&cloud, false);
        let p = params("TCP");
        b.ensure_l4_backend_service(&p).await.unwrap();

        let mut changed = cloud.backend_service(&p.name, Scope::Regional).unwrap();
        changed.protocol = "UDP".to_string();
        cloud.insert_backend_service(changed, Scope::Regional);
        cloud.fail(
            "update_backend_service",
            CloudError::Api {
                code: 412,
                message: "fingerprint mismatch".to_string(),
            },
        );

        let err = b.ensure_l4_backend_service(&p).await.unwrap_err();
        assert!(!err.is_not_found() && !err.is_in_use());
    }

    #[tokio::test]
    async fn test_ensure_uses_non_default_network() {
        let cloud = Arc::new(FakeCloud::new());
        let mut p = params("TCP");
        p.network = NetworkInfo {
            is_default: false,
            network_url: "projects/p/global/networks/blue".to_string(),
            subnetwork_url: "projects/p/regions/r/subnetworks/blue".to_string(),
        };

        let bs = backends(&cloud, false)
            .ensure_l4_backend_service(&p)
            .await
            .unwrap();

        assert_eq!(bs.network, "projects/p/global/networks/blue");
    }

    /// Test that get re-fetches at the lower version the description requires
    #[tokio::test]
    async fn test_get_refetches_at_lower_version() {
        let cloud = Arc::new(FakeCloud::new());
        let mut bs = sample();
        bs.description =
            Description::new("default/web", "80", &[features::FEATURE_STRONG_SESSION_AFFINITY])
                .to_json();
        cloud.insert_backend_service(bs, Scope::Global);

        backends(&cloud, false)
            .get("bs", ApiVersion::Ga, Scope::Global)
            .await
            .unwrap();

        assert_eq!(
            cloud.calls(),
            vec![
                Call::GetBackendService("bs".to_string(), ApiVersion::Ga),
                Call::GetBackendService("bs".to_string(), ApiVersion::Beta),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_without_features_reads_once() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert_backend_service(sample(), Scope::Global);

        backends(&cloud, false)
            .get("bs", ApiVersion::Beta, Scope::Global)
            .await
            .unwrap();

        assert_eq!(cloud.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_ignores_not_found_and_in_use() {
        let cloud = Arc::new(FakeCloud::new());
        let b = backends(&cloud, false);

        b.delete("missing", ApiVersion::Ga, Scope::Global)
            .await
            .unwrap();

        cloud.insert_backend_service(sample(), Scope::Global);
        cloud.mark_in_use("bs");
        b.delete("bs", ApiVersion::Ga, Scope::Global).await.unwrap();
        assert!(cloud.backend_service("bs", Scope::Global).is_some());
    }

    #[tokio::test]
    async fn test_delete_propagates_other_errors() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.fail(
            "delete_backend_service",
            CloudError::Api {
                code: 500,
                message: "backend error".to_string(),
            },
        );

        let err = backends(&cloud, false)
            .delete("bs", ApiVersion::Ga, Scope::Global)
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::Api { code: 500, .. }));
    }

    fn with_groups(cloud: &FakeCloud, groups: &[&str]) {
        let mut bs = sample();
        bs.backends = groups
            .iter()
            .map(|g| Backend {
                group: (*g).to_string(),
                balancing_mode: String::new(),
            })
            .collect();
        cloud.insert_backend_service(bs, Scope::Global);
    }

    fn status(state: &str) -> HealthStatus {
        HealthStatus {
            health_state: state.to_string(),
            ip_address: "10.0.0.1".to_string(),
        }
    }

    /// Test that health short-circuits on the first healthy group
    #[tokio::test]
    async fn test_health_short_circuits() {
        let cloud = Arc::new(FakeCloud::new());
        with_groups(&cloud, &["g1", "g2", "g3"]);
        cloud.set_health("g1", vec![status("HEALTHY"), status("UNHEALTHY")]);
        cloud.set_health("g2", vec![status("UNHEALTHY")]);
        cloud.set_health("g3", vec![status("UNHEALTHY")]);

        let state = backends(&cloud, false)
            .health("bs", ApiVersion::Ga, Scope::Global)
            .await
            .unwrap();

        assert_eq!(state, HealthState::Healthy);
        assert_eq!(cloud.count(|c| matches!(c, Call::GetHealth(_))), 1);
    }

    #[tokio::test]
    async fn test_health_unknown_without_status() {
        let cloud = Arc::new(FakeCloud::new());
        with_groups(&cloud, &[]);
        let b = backends(&cloud, false);
        assert_eq!(
            b.health("bs", ApiVersion::Ga, Scope::Global).await.unwrap(),
            HealthState::Unknown
        );

        with_groups(&cloud, &["g1"]);
        assert_eq!(
            b.health("bs", ApiVersion::Ga, Scope::Global).await.unwrap(),
            HealthState::Unknown
        );
    }

    #[tokio::test]
    async fn test_health_unhealthy_and_errors() {
        let cloud = Arc::new(FakeCloud::new());
        with_groups(&cloud, &["g1", "g2"]);
        cloud.set_health("g2", vec![status("UNHEALTHY")]);
        let b = backends(&cloud, false);

        assert_eq!(
            b.health("bs", ApiVersion::Ga, Scope::Global).await.unwrap(),
            HealthState::Unhealthy
        );

        cloud.fail(
            "get_backend_service_health",
            CloudError::Transport("timeout".to_string()),
        );
        assert!(b.health("bs", ApiVersion::Ga, Scope::Global).await.is_err());
    }

    /// Test that the last reported state is returned when nothing is healthy
    #[tokio::test]
    async fn test_health_returns_last_reported_state() {
        let cloud = Arc::new(FakeCloud::new());
        with_groups(&cloud, &["g1", "g2"]);
        cloud.set_health("g1", vec![status("UNHEALTHY")]);
        cloud.set_health("g2", vec![status("DRAINING")]);
        let b = backends(&cloud, false);

        assert_eq!(
            b.health("bs", ApiVersion::Ga, Scope::Global).await.unwrap(),
            HealthState::Draining
        );

        cloud.set_health("g2", vec![status("UNKNOWN")]);
        assert_eq!(
            b.health("bs", ApiVersion::Ga, Scope::Global).await.unwrap(),
            HealthState::Unknown
        );
    }

    #[tokio::test]
    async fn test_list_filters_cluster_owned() {
        let cloud = Arc::new(FakeCloud::new());
        let namer = Namer::new(UID);
        let ours = namer.l4_name("default", "ilb");
        cloud.insert_backend_service(
            BackendService {
                name: ours.clone(),
                ..Default::default()
            },
            Scope::Regional,
        );
        cloud.insert_backend_service(
            BackendService {
                name: "someone-elses".to_string(),
                ..Default::default()
            },
            Scope::Regional,
        );

        let list = backends(&cloud, false)
            .list(ApiVersion::Ga, Scope::Regional)
            .await
            .unwrap();

        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, ours);
        assert_eq!(list[0].scope, Scope::Regional);
    }

    #[tokio::test]
    async fn test_create_l7_backend_service() {
        let cloud = Arc::new(FakeCloud::new());
        let sp = ServicePort {
            namespace: "default".to_string(),
            name: "web".to_string(),
            port: SvcPortTuple {
                port: 80,
                name: String::new(),
                target_port: "8080".to_string(),
            },
            node_port: 30080,
            protocol: "HTTP".to_string(),
            neg_enabled: true,
            l7_ilb_enabled: true,
            l7_xlb_regional_enabled: false,
        };

        let bs = backends(&cloud, false)
            .create(&sp, "k8s1-bs", "hc")
            .await
            .unwrap();

        assert_eq!(bs.load_balancing_scheme, SCHEME_INTERNAL_MANAGED);
        assert_eq!(bs.scope, Scope::Regional);
        assert!(bs.description.contains("L7ILB"));
        assert!(!bs.fingerprint.is_empty());
    }

    #[tokio::test]
    async fn test_update_uses_self_link_scope() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.insert_backend_service(sample(), Scope::Regional);
        let b = backends(&cloud, false);

        let mut bs = b.get("bs", ApiVersion::Ga, Scope::Regional).await.unwrap();
        bs.protocol = "UDP".to_string();
        b.update(&bs).await.unwrap();

        assert_eq!(
            cloud.backend_service("bs", Scope::Regional).unwrap().protocol,
            "UDP"
        );
    }
}
