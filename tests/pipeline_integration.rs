//! Parser-to-correlator pipeline: raw tool output in, classified device
//! records out.

use std::net::Ipv4Addr;

use nscan::engine::DeviceStore;
use nscan::models::UsageCategory;
use nscan::parse::{SnifferParser, parse_arp_table, parse_ndp_table, parse_scan_report};

#[test]
fn neighbour_tables_and_scan_report_converge_on_one_record() {
    let mut store = DeviceStore::new();

    for obs in parse_arp_table("192.168.1.30 dev eth0 lladdr 11:22:33:44:55:66 REACHABLE\n") {
        store.on_observation(&obs);
    }
    for obs in parse_ndp_table(
        "fe80::1122:33ff:fe44:5566 dev eth0 lladdr 11:22:33:44:55:66 router STALE\n",
    ) {
        store.on_observation(&obs);
    }

    let report = "\
Nmap scan report for 192.168.1.30
Host is up (0.0021s latency).
PORT     STATE SERVICE       VERSION
445/tcp  open  microsoft-ds  Windows 10 microsoft-ds
3389/tcp open  ms-wbt-server Microsoft Terminal Services
MAC Address: 11:22:33:44:55:66 (Micro-Star Intl)
OS details: Microsoft Windows 10 1903
| nbstat: NetBIOS name: DESKTOP-ABC, NetBIOS user: <unknown>, NetBIOS MAC: 11:22:33:44:55:66
|   Workgroup: WORKGROUP\\x00
";
    for obs in parse_scan_report(report) {
        store.on_observation(&obs);
    }

    let devices = store.get_devices();
    assert_eq!(devices.len(), 1);
    let device = &devices[0];
    assert_eq!(device.mac.as_deref(), Some("11:22:33:44:55:66"));
    assert_eq!(device.ipv4, Some(Ipv4Addr::new(192, 168, 1, 30)));
    assert_eq!(device.ipv6.len(), 1);
    assert!(device.is_dual_stack());
    assert_eq!(device.hostname.as_deref(), Some("DESKTOP-ABC"));
    assert_eq!(device.workgroup.as_deref(), Some("WORKGROUP"));
    assert_eq!(device.os.as_deref(), Some("Windows"));
    assert_eq!(device.usage, Some(UsageCategory::Workstation));
    assert!(device.ports.contains(&445) && device.ports.contains(&3389));
    assert!(device.confidence >= 80);
}

#[test]
fn sniffer_stream_feeds_store_with_enriched_frames() {
    let mut store = DeviceStore::new();
    let mut parser = SnifferParser::new();

    // DHCP request announces the hostname; the later TCP frame from the
    // same MAC arrives pre-enriched from the side index.
    let chunks = [
        "12:00:00.1 aa:bb:cc:dd:ee:01 > ff:ff:ff:ff:ff:ff, ethertype IPv4 (0x0800), length 342: 0.0.0.0.68 > 255.255.255.255.67: BOOTP/DHCP, Request from aa:bb:cc:dd:ee:01, length 300\n",
        "\t    Hostname Option 12, length 9: \"my-laptop\"\n",
        "12:00:05.0 aa:bb:cc:dd:ee:01 > 11:22:33:44:55:66, ethertype IPv4 (0x0800), length 98: 192.168.1.50.49000 > 192.168.1.1.443: Flags [S]\n",
    ];

    for chunk in chunks {
        for obs in parser.push(chunk) {
            store.on_observation(&obs);
        }
    }

    let device = store.get_by_mac("AA:BB:CC:DD:EE:01").unwrap();
    assert_eq!(device.hostname.as_deref(), Some("my-laptop"));
    assert_eq!(device.ipv4, Some(Ipv4Addr::new(192, 168, 1, 50)));

    // The frame's destination pair created the gateway record too.
    assert!(store.get_by_ip("192.168.1.1").is_some());
}

#[test]
fn parsers_are_total_over_garbage() {
    assert!(parse_arp_table("garbage\n\u{0}\u{1}\n").is_empty());
    assert!(parse_ndp_table("garbage\n").is_empty());
    assert!(parse_scan_report("garbage\n").is_empty());
    let mut parser = SnifferParser::new();
    assert!(parser.push("garbage without newline").is_empty());
    assert!(parser.push("\n").is_empty());
}
