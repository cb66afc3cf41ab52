#[cfg(test)]
mod manual_network_tests {
    use std::collections::{BTreeSet, HashSet};
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::thread;

    use fleetnet::config::NetworkSpec;
    use fleetnet::error::NetworkError;
    use fleetnet::ip::{
        Requester, Reservation, ReservationState, ReservationStore, ReservationType, StoreResult,
        TransientStore,
    };
    use fleetnet::network::{DefaultRole, Network, NetworkSettings};

    /// Store whose snapshots omit one committed address, as if another
    /// director had just taken it between the scan and the commit
    #[derive(Debug)]
    struct StaleSnapshotStore {
        inner: TransientStore,
        hidden: Ipv4Addr,
    }

    impl ReservationStore for StaleSnapshotStore {
        fn try_commit(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
            self.inner.try_commit(network, address, requester)
        }

        fn release(&self, network: &str, address: Ipv4Addr) -> StoreResult<()> {
            self.inner.release(network, address)
        }

        fn release_owned(&self, network: &str, address: Ipv4Addr, requester: &Requester) -> StoreResult<()> {
            self.inner.release_owned(network, address, requester)
        }

        fn is_reserved(&self, network: &str, address: Ipv4Addr) -> StoreResult<bool> {
            self.inner.is_reserved(network, address)
        }

        fn owner(&self, network: &str, address: Ipv4Addr) -> StoreResult<Option<Requester>> {
            self.inner.owner(network, address)
        }

        fn reserved_addresses(&self, network: &str) -> StoreResult<BTreeSet<Ipv4Addr>> {
            let mut addresses = self.inner.reserved_addresses(network)?;
            addresses.remove(&self.hidden);
            Ok(addresses)
        }
    }

    fn stale_snapshot_store(taken: u8) -> Arc<StaleSnapshotStore> {
        let inner = TransientStore::new();
        inner.try_commit("a", ip(taken), &Requester::new("other/0")).unwrap();
        Arc::new(StaleSnapshotStore {
            inner,
            hidden: ip(taken),
        })
    }

    /// Network "a" as a legacy deployment declares it, with .3 reserved
    fn legacy_network(range: &str, static_ips: &[&str], store: Arc<dyn ReservationStore>) -> Network {
        let yaml = format!(
            r#"
name: a
subnets:
  - range: {}
    gateway: 192.168.1.1
    dns: [192.168.1.1, 192.168.1.2]
    reserved: [192.168.1.3]
    static: [{}]
    cloud_properties: {{}}
"#,
            range,
            static_ips.join(", ")
        );
        let spec: NetworkSpec = serde_yaml::from_str(&yaml).unwrap();
        Network::parse(&spec, store, &[]).unwrap()
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(192, 168, 1, last)
    }

    fn instance(index: u32) -> Requester {
        Requester::new(format!("foo-job/{}", index))
    }

    #[test]
    fn test_reserve_static_ip_in_range() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.5"], Arc::new(TransientStore::new()));

        let mut reservation = Reservation::new_static(instance(0), "a", ip(5));
        network.reserve(&mut reservation).unwrap();

        assert!(reservation.is_reserved());
        assert_eq!(reservation.ip(), Some(ip(5)));
    }

    #[test]
    fn test_reserve_dynamic_skips_gateway() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.5"], Arc::new(TransientStore::new()));

        let mut fixed = Reservation::new_static(instance(0), "a", ip(5));
        network.reserve(&mut fixed).unwrap();

        let mut reservation = Reservation::new_dynamic(instance(1), "a");
        network.reserve(&mut reservation).unwrap();

        assert!(reservation.is_reserved());
        assert_eq!(reservation.ip(), Some(ip(2)));
    }

    #[test]
    fn test_reserved_range_is_not_available() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.5"], Arc::new(TransientStore::new()));

        let mut reservation = Reservation::new_static(instance(0), "a", ip(3));
        let result = network.reserve(&mut reservation);

        assert!(matches!(
            result,
            Err(NetworkError::NetworkReservationAlreadyInUse { address, .. }) if address == ip(3)
        ));
        assert!(!reservation.is_reserved());
        assert!(matches!(reservation.state(), ReservationState::Failed(_)));
    }

    #[test]
    fn test_static_ip_from_wrong_pool() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.10"], Arc::new(TransientStore::new()));

        let mut reservation = Reservation::new_static(instance(0), "a", ip(11));
        assert!(matches!(
            network.reserve(&mut reservation),
            Err(NetworkError::NetworkReservationWrongType { .. })
        ));
    }

    #[test]
    fn test_out_of_capacity_then_release_reuses_address() {
        let network = legacy_network("192.168.1.0/30", &[], Arc::new(TransientStore::new()));

        let mut first = Reservation::new_dynamic(instance(0), "a");
        network.reserve(&mut first).unwrap();
        assert_eq!(first.ip(), Some(ip(2)));

        let mut second = Reservation::new_dynamic(instance(1), "a");
        assert!(matches!(
            network.reserve(&mut second),
            Err(NetworkError::NetworkReservationNotEnoughCapacity { .. })
        ));

        network.release(&mut first).unwrap();
        assert_eq!(first.state(), &ReservationState::Released);

        let mut third = Reservation::new_dynamic(instance(1), "a");
        network.reserve(&mut third).unwrap();
        assert_eq!(third.ip(), Some(ip(2)));
    }

    #[test]
    fn test_released_static_ip_can_be_reserved_again() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.5"], Arc::new(TransientStore::new()));

        let mut first = Reservation::new_static(instance(0), "a", ip(5));
        network.reserve(&mut first).unwrap();

        let mut blocked = Reservation::new_static(instance(1), "a", ip(5));
        assert!(matches!(
            network.reserve(&mut blocked),
            Err(NetworkError::NetworkReservationAlreadyInUse { .. })
        ));

        network.release(&mut first).unwrap();

        let mut second = Reservation::new_static(instance(1), "a", ip(5));
        network.reserve(&mut second).unwrap();
        assert_eq!(second.ip(), Some(ip(5)));
    }

    #[test]
    fn test_any_request_gets_dynamic_address() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.2"], Arc::new(TransientStore::new()));

        let mut reservation = Reservation::new(instance(0), "a", ReservationType::Any);
        network.reserve(&mut reservation).unwrap();

        // .2 is static and .3 reserved, so the first dynamic address is .4
        assert_eq!(reservation.ip(), Some(ip(4)));
    }

    #[test]
    fn test_any_request_is_wrong_type_on_vip_network() {
        let spec: NetworkSpec = serde_yaml::from_str("name: public\ntype: vip").unwrap();
        let network = Network::parse(&spec, Arc::new(TransientStore::new()), &[]).unwrap();

        let mut reservation = Reservation::new(instance(0), "public", ReservationType::Any);
        assert!(matches!(
            network.reserve(&mut reservation),
            Err(NetworkError::NetworkReservationWrongType { .. })
        ));
        assert!(matches!(reservation.state(), ReservationState::Failed(_)));
    }

    #[test]
    fn test_dynamic_reservation_skips_address_lost_to_another_commit() {
        let store = stale_snapshot_store(2);
        let network = legacy_network("192.168.1.0/24", &[], store.clone());

        let mut reservation = Reservation::new_dynamic(instance(0), "a");
        network.reserve(&mut reservation).unwrap();

        // .2 is lost on commit and .3 is reserved
        assert_eq!(reservation.ip(), Some(ip(4)));
        assert_eq!(store.inner.owner("a", ip(2)).unwrap(), Some(Requester::new("other/0")));
    }

    #[test]
    fn test_lost_last_address_means_no_capacity() {
        let store = stale_snapshot_store(2);
        let network = legacy_network("192.168.1.0/30", &[], store.clone());

        let mut reservation = Reservation::new_dynamic(instance(0), "a");
        assert!(matches!(
            network.reserve(&mut reservation),
            Err(NetworkError::NetworkReservationNotEnoughCapacity { .. })
        ));
        assert_eq!(store.inner.len(), 1);
    }

    #[test]
    fn test_release_without_ip_fails() {
        let network = legacy_network("192.168.1.0/30", &[], Arc::new(TransientStore::new()));

        let mut reservation = Reservation::new_dynamic(instance(0), "a");
        let error = network.release(&mut reservation).unwrap_err();

        assert!(matches!(error, NetworkError::NetworkReservationNotReserved { .. }));
        assert!(error.to_string().contains("without an IP"));
    }

    #[test]
    fn test_network_settings_from_subnet() {
        let network = legacy_network("192.168.1.0/24", &["192.168.1.2"], Arc::new(TransientStore::new()));
        let mut reservation = Reservation::new_static(instance(0), "a", ip(2));
        network.reserve(&mut reservation).unwrap();

        let settings = network.network_settings(&reservation, &[]).unwrap();
        assert_eq!(
            serde_json::to_value(&settings).unwrap(),
            serde_json::json!({
                "ip": "192.168.1.2",
                "netmask": "255.255.255.0",
                "cloud_properties": {},
                "gateway": "192.168.1.1",
                "dns": ["192.168.1.1", "192.168.1.2"],
                "default": []
            })
        );

        let with_defaults = network.network_settings(&reservation, &DefaultRole::ALL).unwrap();
        assert_eq!(
            serde_json::to_value(&with_defaults).unwrap()["default"],
            serde_json::json!(["dns", "gateway"])
        );
        assert_eq!(
            network.network_settings(&reservation, &DefaultRole::ALL).unwrap(),
            with_defaults
        );
        assert!(matches!(with_defaults, NetworkSettings::Manual(_)));
    }

    #[test]
    fn test_network_settings_without_ip_fails() {
        let network = legacy_network("192.168.1.0/24", &[], Arc::new(TransientStore::new()));

        let reservation = Reservation::new_dynamic(instance(0), "a");
        let error = network.network_settings(&reservation, &DefaultRole::ALL).unwrap_err();
        assert!(error.to_string().contains("without an IP"));
    }

    #[test]
    fn test_overlapping_subnets_are_rejected() {
        let spec: NetworkSpec = serde_yaml::from_str(
            r#"
name: a
subnets:
  - range: 192.168.1.0/24
    gateway: 192.168.1.1
  - range: 192.168.1.0/28
"#,
        )
        .unwrap();

        let result = Network::parse(&spec, Arc::new(TransientStore::new()), &[]);
        assert!(matches!(result, Err(NetworkError::OverlappingRange { .. })));
    }

    fn zoned_network() -> Network {
        let spec: NetworkSpec = serde_yaml::from_str(
            r#"
name: a
subnets:
  - {range: 10.1.0.0/24, gateway: 10.1.0.1, availability_zone: zone_1}
  - {range: 10.2.0.0/24, gateway: 10.2.0.1, availability_zone: zone_2}
  - {range: 10.3.0.0/24, gateway: 10.3.0.1}
  - {range: 10.4.0.0/24, gateway: 10.4.0.1, availability_zone: zone_1}
"#,
        )
        .unwrap();
        Network::parse(&spec, Arc::new(TransientStore::new()), &[]).unwrap()
    }

    fn zones(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn test_availability_zones_in_declared_order() {
        assert_eq!(zoned_network().availability_zones(), zones(&["zone_1", "zone_2"]));
    }

    #[test]
    fn test_validate_has_job_accepts_covered_zones() {
        let network = zoned_network();

        assert!(network.validate_has_job(&[], "foo-job").is_ok());
        assert!(network.validate_has_job(&zones(&["zone_1"]), "foo-job").is_ok());
        assert!(network.validate_has_job(&zones(&["zone_2"]), "foo-job").is_ok());
        assert!(network.validate_has_job(&zones(&["zone_1", "zone_2"]), "foo-job").is_ok());
    }

    #[test]
    fn test_validate_has_job_names_missing_zones() {
        let error = zoned_network()
            .validate_has_job(&zones(&["zone_1", "zone_3", "zone_2", "zone_4"]), "foo-job")
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Job 'foo-job' refers to an availability zone(s) '[\"zone_3\", \"zone_4\"]' but 'a' has no matching subnet(s)."
        );
    }

    #[test]
    fn test_dynamic_reservation_honors_zone() {
        let network = zoned_network();

        let mut reservation = Reservation::new_dynamic(instance(0), "a").with_availability_zone("zone_2");
        network.reserve(&mut reservation).unwrap();
        assert_eq!(reservation.ip(), Some(Ipv4Addr::new(10, 2, 0, 2)));
    }

    #[test]
    fn test_concurrent_dynamic_reservations_are_unique() {
        let store = Arc::new(TransientStore::new());
        let network = legacy_network("192.168.1.0/26", &[], store.clone());
        // .0 and .63 are boundaries, .1 the gateway and .3 reserved
        let capacity = 64 - 4;

        let addresses: Vec<Ipv4Addr> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|worker| {
                    let network = &network;
                    scope.spawn(move || {
                        let mut won = Vec::new();
                        for slot in 0..10 {
                            let requester = Requester::new(format!("worker-{}/{}", worker, slot));
                            let mut reservation = Reservation::new_dynamic(requester, "a");
                            if network.reserve(&mut reservation).is_ok() {
                                won.extend(reservation.ip());
                            }
                        }
                        won
                    })
                })
                .collect();
            handles.into_iter().flat_map(|handle| handle.join().unwrap()).collect()
        });

        let unique: HashSet<_> = addresses.iter().collect();
        assert_eq!(unique.len(), addresses.len());
        assert_eq!(addresses.len(), capacity);
        assert_eq!(store.len(), capacity);
    }
}
