//! Primitive filter model handed to the classification engine.
//!
//! Condition semantics follow the engine: conditions on the same field are
//! OR-ed, conditions on different fields are AND-ed. A filter with no
//! conditions matches every packet on its layer.

use std::fmt;
use std::net::IpAddr;

use bytes::Bytes;
use ipnetwork::IpNetwork;
use serde::{Serialize, Serializer};

use crate::directive::{Action, IpScope};

/// IANA protocol numbers used by the compiler.
pub const IPPROTO_IPIP: u8 = 4;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Engine flag set on loopback traffic.
pub const FLAG_IS_LOOPBACK: u32 = 0x0000_0001;

/// Well-known DNS port.
pub const DNS_PORT: u16 = 53;

/// Traffic-classification point × protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Layer {
    ConnectV4,
    AcceptV4,
    ConnectV6,
    AcceptV6,
    EstablishedV4,
}

impl Layer {
    /// Connect + accept layers for both versions, outbound first.
    pub const ALL: [Layer; 4] = [
        Layer::ConnectV4,
        Layer::AcceptV4,
        Layer::ConnectV6,
        Layer::AcceptV6,
    ];
    pub const V4: [Layer; 2] = [Layer::ConnectV4, Layer::AcceptV4];
    pub const V6: [Layer; 2] = [Layer::ConnectV6, Layer::AcceptV6];
    /// Layers used for port rules.
    pub const PORT_V4: [Layer; 2] = [Layer::AcceptV4, Layer::EstablishedV4];

    pub fn label(self) -> &'static str {
        match self {
            Layer::ConnectV4 => "IPv4 outbound",
            Layer::AcceptV4 => "IPv4 inbound",
            Layer::ConnectV6 => "IPv6 outbound",
            Layer::AcceptV6 => "IPv6 inbound",
            Layer::EstablishedV4 => "IPv4 established",
        }
    }

    pub fn is_v4(self) -> bool {
        matches!(self, Layer::ConnectV4 | Layer::AcceptV4 | Layer::EstablishedV4)
    }

    /// The connect+accept layers admitted by `scope`.
    pub fn in_scope(scope: IpScope) -> impl Iterator<Item = Layer> {
        Layer::ALL.into_iter().filter(move |l| {
            if l.is_v4() {
                scope.includes_v4()
            } else {
                scope.includes_v6()
            }
        })
    }

    /// The connect+accept layers for the family of `addr`.
    pub fn for_family(addr: &IpAddr) -> [Layer; 2] {
        match addr {
            IpAddr::V4(_) => Layer::V4,
            IpAddr::V6(_) => Layer::V6,
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Packet field a condition inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Field {
    RemotePort,
    Protocol,
    RemoteAddress,
    LocalAddress,
    Flags,
    AppId,
    PeerName,
    LocalInterface,
}

/// Match operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchOp {
    Equal,
    /// Every bit of the value is set in the field.
    FlagsAllSet,
    /// Address falls inside the prefix.
    InPrefix,
}

/// Opaque application identity produced by the resolver.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AppId(Bytes);

impl AppId {
    pub fn new(blob: impl Into<Bytes>) -> Self {
        Self(blob.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppId({} bytes)", self.0.len())
    }
}

impl Serialize for AppId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

/// Condition value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Addr(IpAddr),
    Prefix(IpNetwork),
    Blob(AppId),
    Text(String),
}

/// One `(field, operator, value)` triple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Condition {
    pub field: Field,
    pub op: MatchOp,
    pub value: Value,
}

impl Condition {
    pub fn eq(field: Field, value: Value) -> Self {
        Self {
            field,
            op: MatchOp::Equal,
            value,
        }
    }

    pub fn in_prefix(field: Field, net: IpNetwork) -> Self {
        Self {
            field,
            op: MatchOp::InPrefix,
            value: Value::Prefix(net),
        }
    }

    pub fn flags(flags: u32) -> Self {
        Self {
            field: Field::Flags,
            op: MatchOp::FlagsAllSet,
            value: Value::U32(flags),
        }
    }
}

/// One primitive rule ready for installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledFilter {
    pub layer: Layer,
    pub action: Action,
    pub weight: u8,
    pub conditions: Vec<Condition>,
    /// Display name passed to the engine.
    pub name: String,
}
