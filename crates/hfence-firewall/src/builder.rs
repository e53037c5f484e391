//! Fluent policy accumulator.
//!
//! The order of declaration matters: each later directive has more weight.
//! By default every directive applies to both IPv4 and IPv6 and the ambient
//! action is `block`.
//!
//! ```no_run
//! use hfence_firewall::{FirewallBuilder, MemoryEngine, SystemResolver};
//!
//! let engine = MemoryEngine::new();
//! let policy = FirewallBuilder::new()
//!     .block()
//!     .all()
//!     .allow()
//!     .localhost()
//!     .domain_name_system()
//!     .local_area_network()
//!     .application(["/usr/sbin/openvpn"])
//!     .build(&engine, &SystemResolver)?;
//! # Ok::<(), hfence_core::HFenceError>(())
//! ```
//!
//! Directive calls validate their input immediately. The first invalid call
//! poisons the builder; later calls are ignored and `build` reports that
//! first error before touching the engine.

use std::net::IpAddr;
use std::path::Path;

use ipnetwork::IpNetwork;

use hfence_core::directive::{Action, Context, Directive, DirectiveKind, IpScope, WeightHint};
use hfence_core::error::{HFenceError, Result};

use crate::compiler::{self, CompiledPolicy};
use crate::engine::Engine;
use crate::install::{self, InstallOptions, InstalledPolicy};
use crate::resolve::Resolver;

#[derive(Debug, Default)]
pub struct FirewallBuilder {
    ctx: Context,
    program: Vec<Directive>,
    error: Option<HFenceError>,
}

impl FirewallBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything following will be blocked.
    pub fn block(self) -> Self {
        self.with_ctx(|c| c.with_action(Action::Block))
    }

    /// Everything following will be allowed.
    pub fn allow(self) -> Self {
        self.with_ctx(|c| c.with_action(Action::Allow))
    }

    /// Everything following applies to IPv4 only.
    pub fn for_ipv4(self) -> Self {
        self.with_ctx(|c| c.with_scope(IpScope::V4))
    }

    /// Everything following applies to IPv6 only.
    pub fn for_ipv6(self) -> Self {
        self.with_ctx(|c| c.with_scope(IpScope::V6))
    }

    /// Everything following applies to both IP versions.
    pub fn for_all_versions(self) -> Self {
        self.with_ctx(|c| c.with_scope(IpScope::Both))
    }

    /// Everything following gets this explicit weight.
    pub fn weight(self, weight: u8) -> Self {
        self.with_ctx(|c| c.with_weight(WeightHint::Fixed(weight)))
    }

    /// Explicit deny/allow weights for the following DNS directives.
    pub fn weight_pair(self, deny: u8, allow: u8) -> Self {
        self.with_ctx(|c| c.with_weight(WeightHint::Pair { deny, allow }))
    }

    /// Back to declaration-order weights.
    pub fn implicit_weight(self) -> Self {
        self.with_ctx(|c| c.with_weight(WeightHint::Implicit))
    }

    /// All traffic.
    pub fn all(self) -> Self {
        self.push("all", DirectiveKind::AllTraffic)
    }

    /// Connections to the current computer.
    pub fn localhost(self) -> Self {
        self.push("localhost", DirectiveKind::Loopback)
    }

    /// LAN ranges (IPv4).
    pub fn local_area_network(self) -> Self {
        self.push("local_area_network", DirectiveKind::LocalAreaNetwork)
    }

    /// DNS, reachable only through the default resolver.
    pub fn domain_name_system(self) -> Self {
        self.push(
            "domain_name_system",
            DirectiveKind::DomainNameSystem { resolvers: Vec::new() },
        )
    }

    /// DNS, reachable only through `resolvers`. Unspecified addresses are
    /// skipped; if none remain the default resolver applies.
    pub fn domain_name_system_via(self, resolvers: impl IntoIterator<Item = IpAddr>) -> Self {
        let resolvers = resolvers
            .into_iter()
            .filter(|a| !a.is_unspecified())
            .collect();
        self.push(
            "domain_name_system_via",
            DirectiveKind::DomainNameSystem { resolvers },
        )
    }

    /// Traffic of specific applications, one directive per path.
    pub fn application<P: AsRef<Path>>(self, paths: impl IntoIterator<Item = P>) -> Self {
        self.push_each("application", paths, |p| {
            DirectiveKind::ApplicationPath(p.as_ref().to_path_buf())
        })
    }

    /// Traffic by TLS server name.
    pub fn peer_name<S: AsRef<str>>(self, names: impl IntoIterator<Item = S>) -> Self {
        self.push_each("peer_name", names, |n| {
            DirectiveKind::PeerName(n.as_ref().to_string())
        })
    }

    /// Traffic to the addresses a host name resolves to at build time.
    pub fn host<S: AsRef<str>>(self, names: impl IntoIterator<Item = S>) -> Self {
        self.push_each("host", names, |n| DirectiveKind::HostName(n.as_ref().to_string()))
    }

    /// Traffic to specific remote addresses, as one directive.
    pub fn ip_address(self, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.push(
            "ip_address",
            DirectiveKind::IpAddressSet(addrs.into_iter().collect()),
        )
    }

    /// IKEv2 (VPN private range plus IP-in-IP).
    pub fn ikev2(self) -> Self {
        self.push("ikev2", DirectiveKind::IkeV2)
    }

    pub fn tcp_port(self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.push_each("tcp_port", ports, DirectiveKind::TcpPort)
    }

    pub fn udp_port(self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.push_each("udp_port", ports, DirectiveKind::UdpPort)
    }

    pub fn local_subnet(self, nets: impl IntoIterator<Item = IpNetwork>) -> Self {
        self.push_each("local_subnet", nets, DirectiveKind::LocalSubnet)
    }

    pub fn remote_subnet(self, nets: impl IntoIterator<Item = IpNetwork>) -> Self {
        self.push_each("remote_subnet", nets, DirectiveKind::RemoteSubnet)
    }

    /// Traffic on specific network interfaces (index/LUID).
    pub fn network_interface(self, indexes: impl IntoIterator<Item = u64>) -> Self {
        self.push_each("network_interface", indexes, DirectiveKind::NetworkInterface)
    }

    /// Directives accumulated so far.
    pub fn program(&self) -> &[Directive] {
        &self.program
    }

    /// Freeze the program and compile it without touching an engine.
    pub fn compile(self, resolver: &dyn Resolver) -> Result<CompiledPolicy> {
        if let Some(e) = self.error {
            return Err(e);
        }
        compiler::compile(&self.program, resolver)
    }

    /// Compile and install atomically with default install options.
    pub fn build(self, engine: &dyn Engine, resolver: &dyn Resolver) -> Result<InstalledPolicy> {
        self.build_with(engine, resolver, &InstallOptions::default())
    }

    pub fn build_with(
        self,
        engine: &dyn Engine,
        resolver: &dyn Resolver,
        options: &InstallOptions,
    ) -> Result<InstalledPolicy> {
        let policy = self.compile(resolver)?;
        install::install(engine, options, &policy)
    }

    fn with_ctx(mut self, f: impl FnOnce(Context) -> Context) -> Self {
        self.ctx = f(self.ctx);
        self
    }

    fn push(mut self, call: &'static str, kind: DirectiveKind) -> Self {
        if self.error.is_some() {
            return self;
        }
        match Directive::new(call, self.ctx, kind) {
            Ok(d) => self.program.push(d),
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn push_each<T>(
        mut self,
        call: &'static str,
        items: impl IntoIterator<Item = T>,
        kind: impl Fn(T) -> DirectiveKind,
    ) -> Self {
        let mut any = false;
        for item in items {
            any = true;
            self = self.push(call, kind(item));
        }
        if !any && self.error.is_none() {
            self.error = Some(HFenceError::invalid_argument(call, "no values given"));
        }
        self
    }
}
