//! Directive model: one typed policy statement.
//!
//! A [`Directive`] is created from the builder's current [`Context`] (action,
//! scope, weight hint) plus a [`DirectiveKind`]. Combinations the compiler has
//! no mapping for are rejected here, at construction time.

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use ipnetwork::IpNetwork;
use serde::Serialize;

use crate::error::{HFenceError, Result};

/// What a matching filter does with the traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Block => "block",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-version scope of a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IpScope {
    V4,
    V6,
    Both,
}

impl IpScope {
    pub fn includes_v4(self) -> bool {
        matches!(self, IpScope::V4 | IpScope::Both)
    }

    pub fn includes_v6(self) -> bool {
        matches!(self, IpScope::V6 | IpScope::Both)
    }

    /// Whether an address of this family may appear under the scope.
    pub fn admits(self, addr: &IpAddr) -> bool {
        match addr {
            IpAddr::V4(_) => self.includes_v4(),
            IpAddr::V6(_) => self.includes_v6(),
        }
    }
}

/// Priority requested for a directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightHint {
    /// Derived from declaration order.
    #[default]
    Implicit,
    /// Fixed weight. For DNS this is the allow weight; deny gets `w - 1`.
    Fixed(u8),
    /// Explicit deny/allow pair; only meaningful for DNS.
    Pair { deny: u8, allow: u8 },
}

/// Ambient builder state snapshotted into every directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub action: Action,
    pub scope: IpScope,
    pub weight: WeightHint,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            action: Action::Block,
            scope: IpScope::Both,
            weight: WeightHint::Implicit,
        }
    }
}

impl Context {
    pub fn with_action(self, action: Action) -> Self {
        Self { action, ..self }
    }

    pub fn with_scope(self, scope: IpScope) -> Self {
        Self { scope, ..self }
    }

    pub fn with_weight(self, weight: WeightHint) -> Self {
        Self { weight, ..self }
    }
}

/// Closed set of things a directive can target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectiveKind {
    AllTraffic,
    Loopback,
    LocalAreaNetwork,
    /// Resolvers that stay reachable; empty means the default resolver.
    DomainNameSystem { resolvers: Vec<IpAddr> },
    ApplicationPath(PathBuf),
    /// TLS server name, matched on the outbound connect layer only.
    PeerName(String),
    /// Host resolved to its address set during compilation.
    HostName(String),
    IpAddressSet(Vec<IpAddr>),
    IkeV2,
    TcpPort(u16),
    UdpPort(u16),
    LocalSubnet(IpNetwork),
    RemoteSubnet(IpNetwork),
    NetworkInterface(u64),
}

impl DirectiveKind {
    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::AllTraffic => "all-traffic",
            DirectiveKind::Loopback => "loopback",
            DirectiveKind::LocalAreaNetwork => "local-area-network",
            DirectiveKind::DomainNameSystem { .. } => "domain-name-system",
            DirectiveKind::ApplicationPath(_) => "application-path",
            DirectiveKind::PeerName(_) => "peer-name",
            DirectiveKind::HostName(_) => "host-name",
            DirectiveKind::IpAddressSet(_) => "ip-address-set",
            DirectiveKind::IkeV2 => "ikev2",
            DirectiveKind::TcpPort(_) => "tcp-port",
            DirectiveKind::UdpPort(_) => "udp-port",
            DirectiveKind::LocalSubnet(_) => "local-subnet",
            DirectiveKind::RemoteSubnet(_) => "remote-subnet",
            DirectiveKind::NetworkInterface(_) => "network-interface",
        }
    }

    /// Kinds that only have IPv4 classification layers.
    pub fn is_ipv4_only(&self) -> bool {
        matches!(
            self,
            DirectiveKind::LocalAreaNetwork
                | DirectiveKind::IkeV2
                | DirectiveKind::TcpPort(_)
                | DirectiveKind::UdpPort(_)
                | DirectiveKind::PeerName(_)
        )
    }

    /// Whether the rule compiler has a mapping for `(self, action)`.
    pub fn supports(&self, action: Action) -> bool {
        use Action::*;
        use DirectiveKind::*;
        match (self, action) {
            (AllTraffic, Block) => true,
            (AllTraffic, Allow) => false,
            (Loopback, Allow) => true,
            (Loopback, Block) => false,
            (LocalAreaNetwork, Allow) => true,
            (LocalAreaNetwork, Block) => false,
            (DomainNameSystem { .. }, Allow) => true,
            (DomainNameSystem { .. }, Block) => false,
            (ApplicationPath(_), Allow | Block) => true,
            (PeerName(_), Allow | Block) => true,
            (HostName(_), Allow | Block) => true,
            (IpAddressSet(_), Allow | Block) => true,
            (IkeV2, Allow) => true,
            (IkeV2, Block) => false,
            (TcpPort(_), Allow) => true,
            (TcpPort(_), Block) => false,
            (UdpPort(_), Allow) => true,
            (UdpPort(_), Block) => false,
            (LocalSubnet(_), Allow | Block) => true,
            (RemoteSubnet(_), Allow | Block) => true,
            (NetworkInterface(_), Allow) => true,
            (NetworkInterface(_), Block) => false,
        }
    }
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub action: Action,
    pub scope: IpScope,
    pub kind: DirectiveKind,
    pub weight: WeightHint,
}

impl Directive {
    /// Snapshot `ctx` into a new directive of `kind`.
    ///
    /// `call` names the builder call for error reporting.
    pub fn new(call: &'static str, ctx: Context, kind: DirectiveKind) -> Result<Self> {
        if !kind.supports(ctx.action) {
            return Err(HFenceError::UnsupportedDirective {
                kind: kind.name(),
                action: ctx.action.as_str(),
                reason: "no compiler mapping for this action",
            });
        }
        if kind.is_ipv4_only() && !ctx.scope.includes_v4() {
            return Err(HFenceError::UnsupportedDirective {
                kind: kind.name(),
                action: ctx.action.as_str(),
                reason: "ipv4-only directive under an ipv6-only scope",
            });
        }

        match &kind {
            DirectiveKind::IpAddressSet(addrs) => {
                if addrs.is_empty() {
                    return Err(HFenceError::invalid_argument(call, "empty address set"));
                }
                if let Some(a) = addrs.iter().find(|a| !ctx.scope.admits(a)) {
                    return Err(HFenceError::invalid_argument(
                        call,
                        format!("address {a} is outside the {:?} scope", ctx.scope),
                    ));
                }
            }
            DirectiveKind::DomainNameSystem { resolvers } => {
                if let Some(a) = resolvers.iter().find(|a| !ctx.scope.admits(a)) {
                    return Err(HFenceError::invalid_argument(
                        call,
                        format!("resolver {a} is outside the {:?} scope", ctx.scope),
                    ));
                }
            }
            DirectiveKind::LocalSubnet(net) | DirectiveKind::RemoteSubnet(net) => {
                if !ctx.scope.admits(&net.ip()) {
                    return Err(HFenceError::invalid_argument(
                        call,
                        format!("subnet {net} is outside the {:?} scope", ctx.scope),
                    ));
                }
            }
            DirectiveKind::TcpPort(0) | DirectiveKind::UdpPort(0) => {
                return Err(HFenceError::invalid_argument(call, "port 0"));
            }
            DirectiveKind::ApplicationPath(p) if p.as_os_str().is_empty() => {
                return Err(HFenceError::invalid_argument(call, "empty path"));
            }
            DirectiveKind::PeerName(n) | DirectiveKind::HostName(n) => validate_host(call, n)?,
            _ => {}
        }

        Ok(Self {
            action: ctx.action,
            scope: ctx.scope,
            kind,
            weight: ctx.weight,
        })
    }
}

fn validate_host(call: &'static str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(HFenceError::invalid_argument(call, "empty host name"));
    }
    if name.len() > 253 {
        return Err(HFenceError::invalid_argument(call, "host name longer than 253 bytes"));
    }
    if name
        .chars()
        .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_'))
    {
        return Err(HFenceError::invalid_argument(
            call,
            format!("invalid host name: {name}"),
        ));
    }
    Ok(())
}
