//! Rule compiler: `(Directive, weight) -> CompiledFilter[]`.
//!
//! Dispatch is an exhaustive match over `(DirectiveKind, Action)`; every
//! combination without a mapping is listed and rejected with
//! `UnsupportedDirective`. Lookups (application identity, host addresses)
//! happen here, before the installer opens a session.

pub mod rules;

use hfence_core::directive::{Action, Directive, DirectiveKind};
use hfence_core::error::{HFenceError, Result};
use hfence_core::filter::{CompiledFilter, Field, IPPROTO_TCP, IPPROTO_UDP};

use crate::resolve::Resolver;
use crate::weight::{self, Assigned};

/// Filters produced by one directive.
#[derive(Debug, Clone)]
pub struct CompiledDirective {
    pub kind: &'static str,
    pub action: Action,
    pub weight: Assigned,
    pub filters: Vec<CompiledFilter>,
}

/// A fully compiled, weight-closed program. Nothing is recalculated after this.
#[derive(Debug, Clone, Default)]
pub struct CompiledPolicy {
    directives: Vec<CompiledDirective>,
}

impl CompiledPolicy {
    pub fn directives(&self) -> &[CompiledDirective] {
        &self.directives
    }

    /// All filters in installation order.
    pub fn filters(&self) -> impl Iterator<Item = &CompiledFilter> {
        self.directives.iter().flat_map(|d| d.filters.iter())
    }

    pub fn filter_count(&self) -> usize {
        self.directives.iter().map(|d| d.filters.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.filter_count() == 0
    }
}

/// Assign weights to `program` and expand every directive.
pub fn compile(program: &[Directive], resolver: &dyn Resolver) -> Result<CompiledPolicy> {
    let weights = weight::assign(program)?;

    let mut directives = Vec::with_capacity(program.len());
    for (d, w) in program.iter().zip(weights) {
        let filters = expand(d, w, resolver)?;
        tracing::trace!(
            kind = d.kind.name(),
            action = %d.action,
            weight = w.weight,
            filters = filters.len(),
            "directive expanded"
        );
        directives.push(CompiledDirective {
            kind: d.kind.name(),
            action: d.action,
            weight: w,
            filters,
        });
    }

    let policy = CompiledPolicy { directives };
    tracing::debug!(
        directives = program.len(),
        filters = policy.filter_count(),
        "policy compiled"
    );
    Ok(policy)
}

fn unsupported(d: &Directive) -> HFenceError {
    HFenceError::UnsupportedDirective {
        kind: d.kind.name(),
        action: d.action.as_str(),
        reason: "no compiler mapping for this action",
    }
}

/// Expand one directive at its assigned weight.
pub fn expand(d: &Directive, w: Assigned, resolver: &dyn Resolver) -> Result<Vec<CompiledFilter>> {
    use Action::{Allow, Block};
    use DirectiveKind as K;

    let filters = match (&d.kind, d.action) {
        (K::AllTraffic, Block) => rules::block_all(d.scope, w.weight),
        (K::Loopback, Allow) => rules::permit_loopback(d.scope, w.weight),
        (K::LocalAreaNetwork, Allow) => rules::permit_lan(w.weight)?,
        (K::DomainNameSystem { resolvers }, Allow) => {
            let deny = w.deny_weight.ok_or_else(|| {
                HFenceError::InvalidPolicy("dns directive without a deny weight".into())
            })?;
            rules::permit_dns(d.scope, deny, w.weight, resolvers)?
        }
        (K::ApplicationPath(path), action) => {
            let id = resolver.app_id(path)?;
            rules::application(action, d.scope, w.weight, &id)
        }
        (K::PeerName(name), action) => vec![rules::peer_name(action, w.weight, name)],
        (K::HostName(host), action) => {
            let addrs: Vec<_> = resolver
                .host_addrs(host)?
                .into_iter()
                .filter(|a| d.scope.admits(a))
                .collect();
            if addrs.is_empty() {
                return Err(HFenceError::ResolutionFailed {
                    target: host.clone(),
                    reason: format!("no addresses within the {:?} scope", d.scope),
                });
            }
            rules::addresses(action, w.weight, &addrs)
        }
        (K::IpAddressSet(addrs), action) => rules::addresses(action, w.weight, addrs),
        (K::IkeV2, Allow) => rules::permit_ikev2(w.weight)?,
        (K::TcpPort(port), Allow) => rules::permit_port(IPPROTO_TCP, *port, w.weight),
        (K::UdpPort(port), Allow) => rules::permit_port(IPPROTO_UDP, *port, w.weight),
        (K::LocalSubnet(net), action) => {
            rules::subnet(action, Field::LocalAddress, w.weight, *net)
        }
        (K::RemoteSubnet(net), action) => {
            rules::subnet(action, Field::RemoteAddress, w.weight, *net)
        }
        (K::NetworkInterface(index), Allow) => {
            rules::permit_interface(d.scope, w.weight, *index)
        }

        (K::AllTraffic, Allow)
        | (K::Loopback, Block)
        | (K::LocalAreaNetwork, Block)
        | (K::DomainNameSystem { .. }, Block)
        | (K::IkeV2, Block)
        | (K::TcpPort(_), Block)
        | (K::UdpPort(_), Block)
        | (K::NetworkInterface(_), Block) => return Err(unsupported(d)),
    };

    Ok(filters)
}
