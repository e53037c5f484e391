//! Precedence and end-to-end classification of built policies.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;

use hfence_core::directive::Action;
use hfence_core::filter::{Layer, FLAG_IS_LOOPBACK, IPPROTO_TCP, IPPROTO_UDP};
use hfence_firewall::resolve::app_id_from_path;
use hfence_firewall::{FirewallBuilder, MemoryEngine, Packet, StaticResolver};

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn example() -> FirewallBuilder {
    FirewallBuilder::new()
        .block()
        .all()
        .allow()
        .localhost()
        .domain_name_system()
        .local_area_network()
        .application(["/usr/bin/app"])
}

#[test]
fn example_weights_increase_with_declaration_order() {
    let policy = example()
        .compile(&StaticResolver::new().with_app("/usr/bin/app"))
        .unwrap();
    let d = policy.directives();
    assert_eq!(d.len(), 5);

    assert_eq!(d[0].weight.weight, 0);
    assert_eq!(d[1].weight.weight, 1);
    assert_eq!(d[2].weight.deny_weight, Some(2));
    assert_eq!(d[2].weight.weight, 3);
    assert_eq!(d[3].weight.weight, 4);
    assert_eq!(d[4].weight.weight, 5);

    let counts: Vec<_> = d.iter().map(|d| d.filters.len()).collect();
    assert_eq!(counts, vec![4, 4, 6, 12, 4]);
}

#[test]
fn later_directives_strictly_outrank_earlier_ones() {
    let policy = FirewallBuilder::new()
        .allow()
        .tcp_port([443])
        .ikev2()
        .domain_name_system()
        .block()
        .peer_name(["tracker.example.com"])
        .ip_address([ip("203.0.113.9")])
        .allow()
        .network_interface([3])
        .compile(&StaticResolver::new())
        .unwrap();

    let mut prev_max: Option<u8> = None;
    for d in policy.directives() {
        let min = d.filters.iter().map(|f| f.weight).min().unwrap();
        let max = d.filters.iter().map(|f| f.weight).max().unwrap();
        if let Some(p) = prev_max {
            assert!(min > p, "{} at {min} does not outrank {p}", d.kind);
        }
        prev_max = Some(max);
    }
}

#[test]
fn explicit_weight_is_kept_and_implicit_moves_past_it() {
    let policy = FirewallBuilder::new()
        .block()
        .weight(100)
        .all()
        .implicit_weight()
        .allow()
        .localhost()
        .compile(&StaticResolver::new())
        .unwrap();
    let d = policy.directives();
    assert_eq!(d[0].weight.weight, 100);
    assert_eq!(d[1].weight.weight, 101);
}

#[test]
fn dns_deny_is_always_below_allow() {
    let cases = [
        FirewallBuilder::new().allow().domain_name_system(),
        FirewallBuilder::new().allow().weight(40).domain_name_system(),
        FirewallBuilder::new().allow().weight_pair(10, 30).domain_name_system(),
        FirewallBuilder::new()
            .allow()
            .domain_name_system_via([ip("9.9.9.9"), ip("2620:fe::fe")]),
    ];
    for b in cases {
        let policy = b.compile(&StaticResolver::new()).unwrap();
        let deny = policy
            .filters()
            .filter(|f| f.action == Action::Block)
            .map(|f| f.weight)
            .max()
            .unwrap();
        let allow = policy
            .filters()
            .filter(|f| f.action == Action::Allow)
            .map(|f| f.weight)
            .min()
            .unwrap();
        assert!(deny < allow, "deny {deny} must be below allow {allow}");
    }
}

#[test]
fn kill_switch_classifies_traffic() {
    let engine = MemoryEngine::new();
    let resolver = StaticResolver::new().with_app("/usr/bin/app");
    let _policy = FirewallBuilder::new()
        .block()
        .all()
        .allow()
        .localhost()
        .domain_name_system_via([ip("9.9.9.9")])
        .local_area_network()
        .application(["/usr/bin/app"])
        .build(&engine, &resolver)
        .unwrap();

    let web = Packet::outbound(ip("93.184.216.34"), 443, IPPROTO_TCP);
    assert_eq!(engine.classify(&web), Some(Action::Block));

    let loopback =
        Packet::outbound(ip("127.0.0.1"), 8080, IPPROTO_TCP).with_flags(FLAG_IS_LOOPBACK);
    assert_eq!(engine.classify(&loopback), Some(Action::Allow));

    let dns_ok = Packet::outbound(ip("9.9.9.9"), 53, IPPROTO_UDP);
    assert_eq!(engine.classify(&dns_ok), Some(Action::Allow));

    let dns_leak = Packet::outbound(ip("8.8.8.8"), 53, IPPROTO_UDP);
    assert_eq!(engine.classify(&dns_leak), Some(Action::Block));

    let dns_leak_v6 = Packet::outbound(ip("2001:4860:4860::8888"), 53, IPPROTO_TCP);
    assert_eq!(engine.classify(&dns_leak_v6), Some(Action::Block));

    let printer =
        Packet::outbound(ip("192.168.1.20"), 631, IPPROTO_TCP).on_layer(Layer::AcceptV4);
    assert_eq!(engine.classify(&printer), Some(Action::Allow));

    let app = Packet::outbound(ip("93.184.216.34"), 443, IPPROTO_TCP)
        .with_app(app_id_from_path("/usr/bin/app".as_ref()));
    assert_eq!(engine.classify(&app), Some(Action::Allow));

    let app_v6 = Packet::outbound(ip("2001:db8::10"), 443, IPPROTO_TCP)
        .with_app(app_id_from_path("/usr/bin/app".as_ref()));
    assert_eq!(engine.classify(&app_v6), Some(Action::Allow));

    let other_v6 = Packet::outbound(ip("2001:db8::10"), 443, IPPROTO_TCP);
    assert_eq!(engine.classify(&other_v6), Some(Action::Block));
}

#[test]
fn blocked_peer_name_overrides_allowed_port() {
    let engine = MemoryEngine::new();
    let _policy = FirewallBuilder::new()
        .allow()
        .remote_subnet(["0.0.0.0/0".parse().unwrap()])
        .block()
        .peer_name(["Tracker.Example.com"])
        .build(&engine, &StaticResolver::new())
        .unwrap();

    let tracked = Packet::outbound(ip("198.51.100.1"), 443, IPPROTO_TCP)
        .with_peer_name("tracker.example.com");
    assert_eq!(engine.classify(&tracked), Some(Action::Block));

    let plain = Packet::outbound(ip("198.51.100.1"), 443, IPPROTO_TCP);
    assert_eq!(engine.classify(&plain), Some(Action::Allow));
}

#[test]
fn filters_carry_display_names() {
    let policy = FirewallBuilder::new()
        .block()
        .all()
        .compile(&StaticResolver::new())
        .unwrap();
    let names: Vec<_> = policy.filters().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "Block all (IPv4 outbound)",
            "Block all (IPv4 inbound)",
            "Block all (IPv6 outbound)",
            "Block all (IPv6 inbound)",
        ]
    );
}
