//! Expansion helpers: one directive shape -> primitive filters.

use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::{IpNetwork, Ipv4Network};

use hfence_core::directive::{Action, IpScope};
use hfence_core::error::{HFenceError, Result};
use hfence_core::filter::{
    AppId, CompiledFilter, Condition, Field, Layer, Value, DNS_PORT, FLAG_IS_LOOPBACK,
    IPPROTO_IPIP, IPPROTO_TCP, IPPROTO_UDP,
};

/// RFC1918, multicast, link-local and limited broadcast.
const LAN_RANGES: [(Ipv4Addr, u8); 6] = [
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

/// VPN private range permitted as a local subnet for IKEv2.
const IKEV2_LOCAL_RANGE: (Ipv4Addr, u8) = (Ipv4Addr::new(10, 0, 0, 0), 8);

/// Resolver used when DNS is allowed without explicit servers.
pub const DEFAULT_RESOLVER: Ipv4Addr = Ipv4Addr::new(10, 255, 0, 1);

fn verb(action: Action) -> &'static str {
    match action {
        Action::Allow => "Permit",
        Action::Block => "Block",
    }
}

fn filter(
    layer: Layer,
    action: Action,
    weight: u8,
    conditions: Vec<Condition>,
    what: &str,
) -> CompiledFilter {
    CompiledFilter {
        layer,
        action,
        weight,
        conditions,
        name: format!("{} {what} ({layer})", verb(action)),
    }
}

fn v4_net((addr, prefix): (Ipv4Addr, u8)) -> Result<IpNetwork> {
    Ipv4Network::new(addr, prefix)
        .map(IpNetwork::V4)
        .map_err(|e| HFenceError::InvalidPolicy(format!("bad built-in range {addr}/{prefix}: {e}")))
}

fn dns_conditions() -> Vec<Condition> {
    vec![
        Condition::eq(Field::RemotePort, Value::U16(DNS_PORT)),
        Condition::eq(Field::Protocol, Value::U8(IPPROTO_UDP)),
        Condition::eq(Field::Protocol, Value::U8(IPPROTO_TCP)),
    ]
}

pub fn block_all(scope: IpScope, weight: u8) -> Vec<CompiledFilter> {
    Layer::in_scope(scope)
        .map(|l| filter(l, Action::Block, weight, vec![], "all"))
        .collect()
}

pub fn permit_loopback(scope: IpScope, weight: u8) -> Vec<CompiledFilter> {
    Layer::in_scope(scope)
        .map(|l| {
            filter(
                l,
                Action::Allow,
                weight,
                vec![Condition::flags(FLAG_IS_LOOPBACK)],
                "on loopback",
            )
        })
        .collect()
}

pub fn permit_lan(weight: u8) -> Result<Vec<CompiledFilter>> {
    let mut out = Vec::with_capacity(LAN_RANGES.len() * Layer::V4.len());
    for range in LAN_RANGES {
        out.extend(subnet(Action::Allow, Field::RemoteAddress, weight, v4_net(range)?));
    }
    Ok(out)
}

/// Deny filters for every in-scope layer, then allow filters for the
/// families present among `resolvers`.
pub fn permit_dns(
    scope: IpScope,
    deny_weight: u8,
    allow_weight: u8,
    resolvers: &[IpAddr],
) -> Result<Vec<CompiledFilter>> {
    if deny_weight >= allow_weight {
        return Err(HFenceError::InvalidPolicy(format!(
            "dns allow weight ({allow_weight}) must be greater than deny weight ({deny_weight})"
        )));
    }

    let resolvers: Vec<IpAddr> = if resolvers.is_empty() {
        if !scope.includes_v4() {
            return Err(HFenceError::InvalidPolicy(
                "dns under an ipv6-only scope needs an explicit ipv6 resolver".into(),
            ));
        }
        vec![IpAddr::V4(DEFAULT_RESOLVER)]
    } else {
        resolvers.to_vec()
    };

    let mut out: Vec<CompiledFilter> = Layer::in_scope(scope)
        .map(|l| filter(l, Action::Block, deny_weight, dns_conditions(), "DNS"))
        .collect();

    for layers in [Layer::V4, Layer::V6] {
        let servers: Vec<&IpAddr> = resolvers
            .iter()
            .filter(|a| Layer::for_family(a) == layers)
            .collect();
        if servers.is_empty() {
            continue;
        }
        for layer in layers {
            let mut conditions = dns_conditions();
            conditions.extend(
                servers
                    .iter()
                    .map(|a| Condition::eq(Field::RemoteAddress, Value::Addr(**a))),
            );
            out.push(filter(layer, Action::Allow, allow_weight, conditions, "DNS"));
        }
    }
    Ok(out)
}

pub fn application(action: Action, scope: IpScope, weight: u8, id: &AppId) -> Vec<CompiledFilter> {
    Layer::in_scope(scope)
        .map(|l| {
            filter(
                l,
                action,
                weight,
                vec![Condition::eq(Field::AppId, Value::Blob(id.clone()))],
                "application",
            )
        })
        .collect()
}

/// Server-name match, outbound IPv4 connect layer only.
pub fn peer_name(action: Action, weight: u8, name: &str) -> CompiledFilter {
    filter(
        Layer::ConnectV4,
        action,
        weight,
        vec![Condition::eq(
            Field::PeerName,
            Value::Text(name.to_ascii_lowercase()),
        )],
        &format!("peer name {name}"),
    )
}

/// One filter per address per layer of its family.
pub fn addresses(action: Action, weight: u8, addrs: &[IpAddr]) -> Vec<CompiledFilter> {
    addrs
        .iter()
        .flat_map(|a| {
            Layer::for_family(a).into_iter().map(move |l| {
                filter(
                    l,
                    action,
                    weight,
                    vec![Condition::eq(Field::RemoteAddress, Value::Addr(*a))],
                    &format!("address {a}"),
                )
            })
        })
        .collect()
}

pub fn permit_ikev2(weight: u8) -> Result<Vec<CompiledFilter>> {
    let mut out = subnet(
        Action::Allow,
        Field::LocalAddress,
        weight,
        v4_net(IKEV2_LOCAL_RANGE)?,
    );
    out.extend(Layer::V4.into_iter().map(|l| {
        filter(
            l,
            Action::Allow,
            weight,
            vec![Condition::eq(Field::Protocol, Value::U8(IPPROTO_IPIP))],
            "IP-in-IP",
        )
    }));
    Ok(out)
}

pub fn permit_port(protocol: u8, port: u16, weight: u8) -> Vec<CompiledFilter> {
    let label = if protocol == IPPROTO_TCP { "TCP" } else { "UDP" };
    Layer::PORT_V4
        .into_iter()
        .map(|l| {
            filter(
                l,
                Action::Allow,
                weight,
                vec![
                    Condition::eq(Field::Protocol, Value::U8(protocol)),
                    Condition::eq(Field::RemotePort, Value::U16(port)),
                ],
                &format!("{label} port {port}"),
            )
        })
        .collect()
}

/// Prefix match on `field` across the layers of the network's family.
pub fn subnet(action: Action, field: Field, weight: u8, net: IpNetwork) -> Vec<CompiledFilter> {
    let side = if field == Field::LocalAddress {
        "local"
    } else {
        "remote"
    };
    Layer::for_family(&net.ip())
        .into_iter()
        .map(|l| {
            filter(
                l,
                action,
                weight,
                vec![Condition::in_prefix(field, net)],
                &format!("{side} subnet {net}"),
            )
        })
        .collect()
}

pub fn permit_interface(scope: IpScope, weight: u8, index: u64) -> Vec<CompiledFilter> {
    Layer::in_scope(scope)
        .map(|l| {
            filter(
                l,
                Action::Allow,
                weight,
                vec![Condition::eq(Field::LocalInterface, Value::U64(index))],
                &format!("interface {index}"),
            )
        })
        .collect()
}
