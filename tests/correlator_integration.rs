//! Correlator seed scenarios and merge laws, end to end through the
//! device store and classifier.

use std::net::Ipv4Addr;

use nscan::engine::DeviceStore;
use nscan::models::{DiscoverySource, Observation, Protocol, ServiceInfo, UsageCategory};
use nscan::network::parse_ipv6;

fn obs(source: DiscoverySource) -> Observation {
    Observation::new(source)
}

#[test]
fn arp_then_ndp_merge_on_mac() {
    let mut store = DeviceStore::new();

    let mut arp = obs(DiscoverySource::Arp);
    arp.mac = Some("AA:BB:CC:DD:EE:01".to_string());
    arp.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 10));
    store.on_observation(&arp);

    let mut ndp = obs(DiscoverySource::Ndp);
    ndp.mac = Some("AA:BB:CC:DD:EE:01".to_string());
    ndp.ipv6.push(parse_ipv6("fe80::1").unwrap());
    store.on_observation(&ndp);

    let devices = store.get_devices();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.ipv4, Some(Ipv4Addr::new(192, 168, 1, 10)));
    assert_eq!(device.ipv6.len(), 1);
    assert!(device.discovered_via.contains("arp"));
    assert!(device.discovered_via.contains("ndp"));
}

#[test]
fn ipv4_record_relinked_when_mac_arrives() {
    let mut store = DeviceStore::new();

    let mut first = obs(DiscoverySource::Mdns);
    first.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 20));
    first.hostname = Some("host-a".to_string());
    store.on_observation(&first);

    let mut second = obs(DiscoverySource::Arp);
    second.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 20));
    second.mac = Some("11:22:33:44:55:66".to_string());
    store.on_observation(&second);

    assert_eq!(store.get_devices().len(), 1);
    let device = store.get_by_mac("11:22:33:44:55:66").unwrap();
    assert_eq!(device.hostname.as_deref(), Some("host-a"));

    // From now on, IPv6 observations carrying the same MAC land on this
    // record instead of creating a new one.
    let mut third = obs(DiscoverySource::Capture);
    third.mac = Some("11:22:33:44:55:66".to_string());
    third.ipv6.push(parse_ipv6("fe80::20").unwrap());
    store.on_observation(&third);

    assert_eq!(store.get_devices().len(), 1);
    assert!(store.get_by_ip("fe80::20").is_some());
}

#[test]
fn windows_host_classified_from_scan_block() {
    let mut store = DeviceStore::new();

    let mut scan = obs(DiscoverySource::PortScan);
    scan.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 30));
    scan.hostname = Some("DESKTOP-ABC".to_string());
    scan.workgroup = Some("WORKGROUP".to_string());
    scan.os_hint = Some("cpe:/o:microsoft:windows_10".to_string());
    scan.ports = vec![445, 3389];
    scan.services
        .push(ServiceInfo::open(445, Protocol::Tcp, "microsoft-ds", ""));
    scan.services
        .push(ServiceInfo::open(3389, Protocol::Tcp, "ms-wbt-server", ""));
    store.on_observation(&scan);

    let device = store.get_by_ip("192.168.1.30").unwrap();
    assert_eq!(device.hostname.as_deref(), Some("DESKTOP-ABC"));
    assert_eq!(device.workgroup.as_deref(), Some("WORKGROUP"));
    assert_eq!(device.os.as_deref(), Some("Windows"));
    assert!(device.os_version.as_deref().unwrap_or("").contains("10"));
    assert_eq!(device.usage, Some(UsageCategory::Workstation));
}

#[test]
fn mdns_printer_classified() {
    let mut store = DeviceStore::new();

    let mut mdns = obs(DiscoverySource::Mdns);
    mdns.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 50));
    mdns.hostname = Some("printer".to_string());
    mdns.fqdn = Some("printer.local".to_string());
    mdns.service_tags.push("_ipp._tcp".to_string());
    store.on_observation(&mdns);

    let device = store.get_by_ip("192.168.1.50").unwrap();
    assert_eq!(device.usage, Some(UsageCategory::Printer));
    assert_eq!(device.usage.unwrap().as_str(), "Printer/Scanner");
}

#[test]
fn hostname_disagreement_keeps_first() {
    let mut store = DeviceStore::new();

    let mut first = obs(DiscoverySource::NetBios);
    first.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 1));
    first.hostname = Some("router".to_string());
    store.on_observation(&first);

    let mut second = obs(DiscoverySource::Mdns);
    second.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 1));
    second.hostname = Some("gateway".to_string());
    second.timestamp = first.timestamp + chrono::Duration::seconds(10);
    store.on_observation(&second);

    let device = store.get_by_ip("192.168.1.1").unwrap();
    assert_eq!(device.hostname.as_deref(), Some("router"));
    assert_eq!(device.last_seen, second.timestamp);
    assert!(device.sources.contains(&DiscoverySource::NetBios));
    assert!(device.sources.contains(&DiscoverySource::Mdns));
}

#[test]
fn manufacturer_enriched_from_oui_and_confidence_counts_it() {
    let mut store = DeviceStore::new();

    let mut arp = obs(DiscoverySource::Arp);
    arp.mac = Some("00:1A:11:AA:BB:CC".to_string());
    arp.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 60));
    store.on_observation(&arp);

    let device = store.get_by_mac("00:1A:11:AA:BB:CC").unwrap();
    // 00:1A:11 is a Google block in the embedded OUI table.
    let manufacturer = device.manufacturer.as_deref().unwrap_or("");
    assert!(
        manufacturer.to_lowercase().contains("google"),
        "unexpected manufacturer: {manufacturer}"
    );
    // MAC (20) + IPv4 (15) + manufacturer (10) at minimum.
    assert!(device.confidence >= 45);
}

#[test]
fn zone_stripped_addresses_merge() {
    let mut store = DeviceStore::new();

    let mut a = obs(DiscoverySource::Ndp);
    a.mac = Some("AA:BB:CC:DD:EE:31".to_string());
    a.ipv6.push(nscan::models::Ipv6Info {
        addr: "fe80::1%eth0".to_string(),
        kind: nscan::models::Ipv6Kind::LinkLocal,
        scope: None,
    });
    store.on_observation(&a);

    let mut b = obs(DiscoverySource::Capture);
    b.ipv6.push(parse_ipv6("fe80::1").unwrap());
    store.on_observation(&b);

    let devices = store.get_devices();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].ipv6.len(), 1);
    assert_eq!(devices[0].ipv6[0].addr, "fe80::1");
}

#[test]
fn merge_monotonicity_collections_only_grow() {
    let mut store = DeviceStore::new();

    let mut base = obs(DiscoverySource::PortScan);
    base.ipv4 = Some(Ipv4Addr::new(10, 0, 0, 9));
    base.ports = vec![22, 80];
    base.hostname = Some("web-01".to_string());
    store.on_observation(&base);
    let before = store.get_by_ip("10.0.0.9").unwrap().clone();

    let mut extra = obs(DiscoverySource::Capture);
    extra.ipv4 = Some(Ipv4Addr::new(10, 0, 0, 9));
    extra.ports = vec![443];
    store.on_observation(&extra);
    let after = store.get_by_ip("10.0.0.9").unwrap();

    assert_eq!(after.hostname, before.hostname);
    assert!(after.ports.is_superset(&before.ports));
    assert!(after.sources.is_superset(&before.sources));
    assert!(after.last_seen >= before.last_seen);
    assert_eq!(after.first_seen, before.first_seen);
}

#[test]
fn order_independence_up_to_timestamps() {
    let mut a = obs(DiscoverySource::Arp);
    a.mac = Some("AA:BB:CC:DD:EE:77".to_string());
    a.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 77));

    let mut b = obs(DiscoverySource::PortScan);
    b.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 77));
    b.hostname = Some("host-77".to_string());
    b.ports = vec![22];
    b.services
        .push(ServiceInfo::open(22, Protocol::Tcp, "ssh", "OpenSSH 9.6"));

    let mut c = obs(DiscoverySource::Mdns);
    c.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 77));
    c.service_tags.push("_ssh._tcp".to_string());

    let orders: Vec<Vec<&Observation>> = vec![
        vec![&a, &b, &c],
        vec![&c, &b, &a],
        vec![&b, &a, &c],
    ];

    let mut snapshots = Vec::new();
    for order in orders {
        let mut store = DeviceStore::new();
        for o in order {
            store.on_observation(o);
        }
        let devices = store.get_devices();
        assert_eq!(devices.len(), 1);
        snapshots.push(devices.into_iter().next().unwrap());
    }

    let reference = &snapshots[0];
    for other in &snapshots[1..] {
        assert_eq!(other.mac, reference.mac);
        assert_eq!(other.ipv4, reference.ipv4);
        assert_eq!(other.hostname, reference.hostname);
        assert_eq!(other.ports, reference.ports);
        assert_eq!(other.services, reference.services);
        assert_eq!(other.service_tags, reference.service_tags);
        assert_eq!(other.sources, reference.sources);
        assert_eq!(other.usage, reference.usage);
        assert_eq!(other.confidence, reference.confidence);
    }
}

#[test]
fn os_classification_is_order_independent() {
    // A weak hostname-based hint and an authoritative scanner OS string
    // must classify the same regardless of arrival order.
    let mut weak = obs(DiscoverySource::Mdns);
    weak.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 88));
    weak.hostname = Some("ubuntu-box".to_string());

    let mut strong = obs(DiscoverySource::PortScan);
    strong.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 88));
    strong.os_hint = Some("Microsoft Windows 10 1903".to_string());

    let mut weak_first = DeviceStore::new();
    weak_first.on_observation(&weak);
    weak_first.on_observation(&strong);

    let mut strong_first = DeviceStore::new();
    strong_first.on_observation(&strong);
    strong_first.on_observation(&weak);

    let a = &weak_first.get_devices()[0];
    let b = &strong_first.get_devices()[0];
    assert_eq!(a.os.as_deref(), Some("Windows"));
    assert_eq!(b.os.as_deref(), Some("Windows"));
    assert_eq!(a.os_version, b.os_version);
    assert_eq!(a.confidence, b.confidence);
}

#[test]
fn one_record_per_identifier_across_many_observations() {
    let mut store = DeviceStore::new();

    for i in 0..20u8 {
        let mut o = obs(if i % 2 == 0 {
            DiscoverySource::Arp
        } else {
            DiscoverySource::Capture
        });
        o.mac = Some(format!("AA:BB:CC:DD:EE:{:02X}", i % 5));
        o.ipv4 = Some(Ipv4Addr::new(192, 168, 2, i % 5));
        store.on_observation(&o);
    }

    assert_eq!(store.get_devices().len(), 5);
}

#[test]
fn clear_resets_everything() {
    let mut store = DeviceStore::new();
    let mut o = obs(DiscoverySource::Arp);
    o.ipv4 = Some(Ipv4Addr::new(192, 168, 1, 200));
    store.on_observation(&o);
    assert!(!store.is_empty());

    store.clear();
    assert!(store.is_empty());
    assert!(store.get_by_ip("192.168.1.200").is_none());
}
