//! Filter and namespace model.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;

use hfence_core::directive::{Action, IpScope};
use hfence_core::filter::{AppId, CompiledFilter, Condition, Field, Layer, MatchOp, Value};
use hfence_core::namespace::{Namespace, ProviderKey, SublayerKey};

#[test]
fn scope_selects_layers() {
    let v4: Vec<_> = Layer::in_scope(IpScope::V4).collect();
    let v6: Vec<_> = Layer::in_scope(IpScope::V6).collect();
    let both: Vec<_> = Layer::in_scope(IpScope::Both).collect();
    assert_eq!(v4, Layer::V4.to_vec());
    assert_eq!(v6, Layer::V6.to_vec());
    assert_eq!(both, Layer::ALL.to_vec());
    assert!(!both.contains(&Layer::EstablishedV4));
}

#[test]
fn family_layers_follow_the_address() {
    let v4: IpAddr = "10.0.0.1".parse().unwrap();
    let v6: IpAddr = "fe80::1".parse().unwrap();
    assert_eq!(Layer::for_family(&v4), Layer::V4);
    assert_eq!(Layer::for_family(&v6), Layer::V6);
    assert!(IpScope::V4.admits(&v4));
    assert!(!IpScope::V4.admits(&v6));
    assert!(IpScope::Both.admits(&v6));
}

#[test]
fn prefix_condition_uses_in_prefix() {
    let c = Condition::in_prefix(Field::RemoteAddress, "172.16.0.0/12".parse().unwrap());
    assert_eq!(c.op, MatchOp::InPrefix);
    assert_eq!(Condition::flags(1).field, Field::Flags);
}

#[test]
fn compiled_filter_serializes_for_plans() {
    let f = CompiledFilter {
        layer: Layer::ConnectV4,
        action: Action::Allow,
        weight: 3,
        conditions: vec![
            Condition::eq(Field::RemotePort, Value::U16(53)),
            Condition::eq(Field::RemoteAddress, Value::Addr("10.255.0.1".parse().unwrap())),
        ],
        name: "Permit DNS (IPv4 outbound)".into(),
    };
    let json = serde_json::to_value(&f).unwrap();
    assert_eq!(json["layer"], "ConnectV4");
    assert_eq!(json["action"], "allow");
    assert_eq!(json["weight"], 3);
    assert_eq!(json["conditions"][0]["value"], 53);
    assert_eq!(json["conditions"][1]["value"], "10.255.0.1");
}

#[test]
fn app_id_debug_hides_the_blob() {
    let id = AppId::new(vec![0x2f, 0x00, 0x00, 0x00]);
    assert_eq!(format!("{id:?}"), "AppId(4 bytes)");
    assert_eq!(id.as_bytes().len(), 4);
}

#[test]
fn namespaces_are_fresh() {
    let a = Namespace {
        provider: ProviderKey::generate(),
        sublayer: SublayerKey::generate(),
    };
    let b = Namespace {
        provider: ProviderKey::generate(),
        sublayer: SublayerKey::generate(),
    };
    assert_ne!(a, b);
    let shown = a.to_string();
    assert!(shown.contains(&a.provider.0.to_string()));
    assert!(shown.contains('/'));
}
