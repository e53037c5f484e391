//! In-memory classification engine.
//!
//! Stages writes per session while a transaction is open, applies them in
//! one step on commit and discards them on abort. Closing (or dropping) a
//! session removes everything it registered. Also counts engine calls,
//! injects faults, and classifies synthetic packets so policies can be
//! checked end to end without an OS engine.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard};

use hfence_core::directive::Action;
use hfence_core::filter::{AppId, CompiledFilter, Condition, Field, Layer, MatchOp, Value};
use hfence_core::namespace::{FilterId, Namespace, ProviderKey, SublayerKey};

use super::{Engine, EngineError, EngineResult, Session};

pub const E_INTERNAL: u32 = 0x8032_0001;
pub const E_PROVIDER_NOT_FOUND: u32 = 0x8032_0005;
pub const E_SUBLAYER_NOT_FOUND: u32 = 0x8032_0007;
pub const E_TXN_IN_PROGRESS: u32 = 0x8032_000B;
pub const E_NO_TXN_IN_PROGRESS: u32 = 0x8032_000D;
pub const E_SESSION_CLOSED: u32 = 0x8032_0017;
pub const E_INJECTED: u32 = 0x8032_00FF;

/// A filter as the engine stores it.
#[derive(Debug, Clone)]
pub struct StoredFilter {
    pub id: FilterId,
    pub namespace: Namespace,
    pub filter: CompiledFilter,
    seq: u64,
}

#[derive(Default)]
struct Store {
    next_session: u64,
    next_filter: u64,
    next_seq: u64,
    calls: u64,
    add_filter_calls: u64,
    fail_add_filter_at: Option<u64>,
    fail_commit: bool,
    // provider -> owning session
    providers: HashMap<ProviderKey, u64>,
    sublayers: HashMap<SublayerKey, ProviderKey>,
    filters: BTreeMap<FilterId, StoredFilter>,
    open_sessions: HashSet<u64>,
}

impl Store {
    fn apply(&mut self, session: u64, op: Staged) {
        match op {
            Staged::Provider(key) => {
                self.providers.insert(key, session);
            }
            Staged::Sublayer(key, provider) => {
                self.sublayers.insert(key, provider);
            }
            Staged::Filter(f) => {
                self.filters.insert(f.id, f);
            }
        }
    }

    fn purge_session(&mut self, session: u64) {
        self.open_sessions.remove(&session);
        let gone: HashSet<ProviderKey> = self
            .providers
            .iter()
            .filter(|(_, owner)| **owner == session)
            .map(|(k, _)| *k)
            .collect();
        self.providers.retain(|k, _| !gone.contains(k));
        self.sublayers.retain(|_, p| !gone.contains(p));
        self.filters
            .retain(|_, f| !gone.contains(&f.namespace.provider));
    }
}

enum Staged {
    Provider(ProviderKey),
    Sublayer(SublayerKey, ProviderKey),
    Filter(StoredFilter),
}

fn lock(store: &Mutex<Store>) -> EngineResult<MutexGuard<'_, Store>> {
    // Poisoned state means a logic bug; surface it instead of panicking.
    store
        .lock()
        .map_err(|_| EngineError::new(E_INTERNAL, "engine state poisoned"))
}

/// Shared handle to one in-memory engine instance.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    store: Arc<Mutex<Store>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the `k`-th add-filter call (1-based, engine-wide).
    pub fn fail_add_filter_on(&self, k: u64) {
        if let Ok(mut s) = self.store.lock() {
            s.fail_add_filter_at = Some(k);
        }
    }

    /// Fail every subsequent commit.
    pub fn fail_commits(&self) {
        if let Ok(mut s) = self.store.lock() {
            s.fail_commit = true;
        }
    }

    /// Total engine calls issued so far, including session opens.
    pub fn calls(&self) -> u64 {
        self.store.lock().map(|s| s.calls).unwrap_or_default()
    }

    pub fn open_sessions(&self) -> usize {
        self.store
            .lock()
            .map(|s| s.open_sessions.len())
            .unwrap_or_default()
    }

    pub fn provider_count(&self) -> usize {
        self.store.lock().map(|s| s.providers.len()).unwrap_or_default()
    }

    pub fn sublayer_count(&self) -> usize {
        self.store.lock().map(|s| s.sublayers.len()).unwrap_or_default()
    }

    pub fn filter_count(&self) -> usize {
        self.store.lock().map(|s| s.filters.len()).unwrap_or_default()
    }

    /// Committed filters registered under `namespace`, in id order.
    pub fn filters_in(&self, namespace: &Namespace) -> Vec<StoredFilter> {
        self.store
            .lock()
            .map(|s| {
                s.filters
                    .values()
                    .filter(|f| f.namespace == *namespace)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Verdict of the committed rule set for `packet`, if any filter matches.
    pub fn classify(&self, packet: &Packet) -> Option<Action> {
        let s = self.store.lock().ok()?;
        let verdict = s
            .filters
            .values()
            .filter(|f| f.filter.layer == packet.layer && matches(&f.filter, packet))
            .max_by_key(|f| (f.filter.weight, f.seq))
            .map(|f| f.filter.action);
        verdict
    }
}

impl Engine for MemoryEngine {
    fn open_session(&self, name: &str, _description: &str) -> EngineResult<Box<dyn Session>> {
        let mut s = lock(&self.store)?;
        s.calls += 1;
        s.next_session += 1;
        let id = s.next_session;
        s.open_sessions.insert(id);
        tracing::trace!(session = id, name, "memory engine session opened");

        Ok(Box::new(MemorySession {
            id,
            store: Arc::clone(&self.store),
            staged: None,
            closed: false,
        }))
    }
}

struct MemorySession {
    id: u64,
    store: Arc<Mutex<Store>>,
    staged: Option<Vec<Staged>>,
    closed: bool,
}

impl MemorySession {
    fn enter<'a>(&self, store: &'a Mutex<Store>) -> EngineResult<MutexGuard<'a, Store>> {
        if self.closed {
            return Err(EngineError::new(E_SESSION_CLOSED, "session is closed"));
        }
        let mut s = lock(store)?;
        s.calls += 1;
        Ok(s)
    }

    fn write(&mut self, store: &mut Store, op: Staged) {
        match self.staged.as_mut() {
            Some(staged) => staged.push(op),
            None => store.apply(self.id, op),
        }
    }

    fn provider_known(&self, store: &Store, key: ProviderKey) -> bool {
        store.providers.contains_key(&key)
            || self.staged.iter().flatten().any(|op| {
                matches!(op, Staged::Provider(k) if *k == key)
            })
    }

    fn sublayer_known(&self, store: &Store, ns: &Namespace) -> bool {
        store.sublayers.get(&ns.sublayer) == Some(&ns.provider)
            || self.staged.iter().flatten().any(|op| {
                matches!(op, Staged::Sublayer(k, p) if *k == ns.sublayer && *p == ns.provider)
            })
    }
}

impl Session for MemorySession {
    fn begin_transaction(&mut self) -> EngineResult<()> {
        let store = Arc::clone(&self.store);
        let _s = self.enter(&store)?;
        if self.staged.is_some() {
            return Err(EngineError::new(E_TXN_IN_PROGRESS, "transaction already in progress"));
        }
        self.staged = Some(Vec::new());
        Ok(())
    }

    fn commit_transaction(&mut self) -> EngineResult<()> {
        let store = Arc::clone(&self.store);
        let mut s = self.enter(&store)?;
        let staged = self
            .staged
            .take()
            .ok_or_else(|| EngineError::new(E_NO_TXN_IN_PROGRESS, "no transaction in progress"))?;
        if s.fail_commit {
            return Err(EngineError::new(E_INJECTED, "injected commit failure"));
        }
        for op in staged {
            s.apply(self.id, op);
        }
        Ok(())
    }

    fn abort_transaction(&mut self) -> EngineResult<()> {
        let store = Arc::clone(&self.store);
        let _s = self.enter(&store)?;
        self.staged
            .take()
            .map(drop)
            .ok_or_else(|| EngineError::new(E_NO_TXN_IN_PROGRESS, "no transaction in progress"))
    }

    fn add_provider(&mut self, _name: &str, _description: &str) -> EngineResult<ProviderKey> {
        let store = Arc::clone(&self.store);
        let mut s = self.enter(&store)?;
        let key = ProviderKey::generate();
        self.write(&mut s, Staged::Provider(key));
        Ok(key)
    }

    fn add_sublayer(
        &mut self,
        provider: ProviderKey,
        _name: &str,
        _description: &str,
    ) -> EngineResult<SublayerKey> {
        let store = Arc::clone(&self.store);
        let mut s = self.enter(&store)?;
        if !self.provider_known(&s, provider) {
            return Err(EngineError::new(E_PROVIDER_NOT_FOUND, "provider not found"));
        }
        let key = SublayerKey::generate();
        self.write(&mut s, Staged::Sublayer(key, provider));
        Ok(key)
    }

    fn add_filter(
        &mut self,
        namespace: &Namespace,
        filter: &CompiledFilter,
    ) -> EngineResult<FilterId> {
        let store = Arc::clone(&self.store);
        let mut s = self.enter(&store)?;
        s.add_filter_calls += 1;
        if s.fail_add_filter_at == Some(s.add_filter_calls) {
            return Err(EngineError::new(E_INJECTED, "injected add-filter failure"));
        }
        if !self.sublayer_known(&s, namespace) {
            return Err(EngineError::new(E_SUBLAYER_NOT_FOUND, "sublayer not found"));
        }

        s.next_filter += 1;
        s.next_seq += 1;
        let stored = StoredFilter {
            id: FilterId(s.next_filter),
            namespace: *namespace,
            filter: filter.clone(),
            seq: s.next_seq,
        };
        let id = stored.id;
        self.write(&mut s, Staged::Filter(stored));
        Ok(id)
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Ok(());
        }
        let mut s = lock(&self.store)?;
        s.calls += 1;
        self.closed = true;
        self.staged = None;
        s.purge_session(self.id);
        tracing::trace!(session = self.id, "memory engine session closed");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        // Dynamic session: the owner going away removes its rules.
        if let Err(e) = self.close() {
            tracing::warn!(session = self.id, error = %e, "memory engine session close failed");
        }
    }
}

/// Synthetic packet presented to [`MemoryEngine::classify`].
#[derive(Debug, Clone)]
pub struct Packet {
    pub layer: Layer,
    pub remote: IpAddr,
    pub local: IpAddr,
    pub remote_port: u16,
    pub protocol: u8,
    pub flags: u32,
    pub app_id: Option<AppId>,
    pub peer_name: Option<String>,
    pub interface: u64,
}

impl Packet {
    /// Outbound connect-layer packet to `remote:remote_port`.
    pub fn outbound(remote: IpAddr, remote_port: u16, protocol: u8) -> Self {
        let (layer, local) = match remote {
            IpAddr::V4(_) => (Layer::ConnectV4, IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            IpAddr::V6(_) => (Layer::ConnectV6, IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        };
        Self {
            layer,
            remote,
            local,
            remote_port,
            protocol,
            flags: 0,
            app_id: None,
            peer_name: None,
            interface: 0,
        }
    }

    pub fn on_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_local(mut self, local: IpAddr) -> Self {
        self.local = local;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_app(mut self, app_id: AppId) -> Self {
        self.app_id = Some(app_id);
        self
    }

    pub fn with_peer_name(mut self, name: &str) -> Self {
        self.peer_name = Some(name.to_string());
        self
    }

    pub fn with_interface(mut self, interface: u64) -> Self {
        self.interface = interface;
        self
    }
}

/// Same-field conditions are OR-ed, different fields AND-ed.
fn matches(filter: &CompiledFilter, packet: &Packet) -> bool {
    let fields: BTreeSet<Field> = filter.conditions.iter().map(|c| c.field).collect();
    fields.into_iter().all(|field| {
        filter
            .conditions
            .iter()
            .filter(|c| c.field == field)
            .any(|c| condition_matches(c, packet))
    })
}

fn condition_matches(c: &Condition, p: &Packet) -> bool {
    match (c.field, c.op, &c.value) {
        (Field::RemotePort, MatchOp::Equal, Value::U16(v)) => p.remote_port == *v,
        (Field::Protocol, MatchOp::Equal, Value::U8(v)) => p.protocol == *v,
        (Field::RemoteAddress, MatchOp::Equal, Value::Addr(a)) => p.remote == *a,
        (Field::RemoteAddress, MatchOp::InPrefix, Value::Prefix(n)) => n.contains(p.remote),
        (Field::LocalAddress, MatchOp::Equal, Value::Addr(a)) => p.local == *a,
        (Field::LocalAddress, MatchOp::InPrefix, Value::Prefix(n)) => n.contains(p.local),
        (Field::Flags, MatchOp::FlagsAllSet, Value::U32(v)) => p.flags & *v == *v,
        (Field::AppId, MatchOp::Equal, Value::Blob(id)) => p.app_id.as_ref() == Some(id),
        (Field::PeerName, MatchOp::Equal, Value::Text(t)) => p
            .peer_name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(t)),
        (Field::LocalInterface, MatchOp::Equal, Value::U64(i)) => p.interface == *i,
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn filter(weight: u8, action: Action, conditions: Vec<Condition>) -> CompiledFilter {
        CompiledFilter {
            layer: Layer::ConnectV4,
            action,
            weight,
            conditions,
            name: "test".into(),
        }
    }

    fn namespace(session: &mut dyn Session) -> Namespace {
        let provider = session.add_provider("p", "p").unwrap();
        let sublayer = session.add_sublayer(provider, "s", "s").unwrap();
        Namespace { provider, sublayer }
    }

    #[test]
    fn staged_writes_are_invisible_until_commit() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        session.begin_transaction().unwrap();
        let ns = namespace(session.as_mut());
        session
            .add_filter(&ns, &filter(1, Action::Block, vec![]))
            .unwrap();
        assert_eq!(engine.filter_count(), 0);
        assert_eq!(engine.provider_count(), 0);

        session.commit_transaction().unwrap();
        assert_eq!(engine.filters_in(&ns).len(), 1);
        assert_eq!(engine.provider_count(), 1);
    }

    #[test]
    fn abort_discards_everything() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        session.begin_transaction().unwrap();
        let ns = namespace(session.as_mut());
        session
            .add_filter(&ns, &filter(1, Action::Block, vec![]))
            .unwrap();
        session.abort_transaction().unwrap();
        assert!(engine.filters_in(&ns).is_empty());
        assert_eq!(engine.sublayer_count(), 0);
    }

    #[test]
    fn dropping_session_cascades() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        let ns = namespace(session.as_mut());
        session
            .add_filter(&ns, &filter(1, Action::Block, vec![]))
            .unwrap();
        assert_eq!(engine.filter_count(), 1);
        drop(session);
        assert_eq!(engine.filter_count(), 0);
        assert_eq!(engine.open_sessions(), 0);
    }

    #[test]
    fn filter_under_unknown_sublayer_fails() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        let ns = Namespace {
            provider: ProviderKey::generate(),
            sublayer: SublayerKey::generate(),
        };
        let err = session
            .add_filter(&ns, &filter(1, Action::Block, vec![]))
            .unwrap_err();
        assert_eq!(err.code, E_SUBLAYER_NOT_FOUND);
    }

    #[test]
    fn highest_weight_wins_and_ties_go_to_latest() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        let ns = namespace(session.as_mut());
        let dns = vec![Condition::eq(Field::RemotePort, Value::U16(53))];
        session
            .add_filter(&ns, &filter(5, Action::Block, vec![]))
            .unwrap();
        session
            .add_filter(&ns, &filter(3, Action::Allow, dns.clone()))
            .unwrap();
        let to_dns = Packet::outbound("1.1.1.1".parse().unwrap(), 53, 17);
        assert_eq!(engine.classify(&to_dns), Some(Action::Block));

        session
            .add_filter(&ns, &filter(5, Action::Allow, dns))
            .unwrap();
        assert_eq!(engine.classify(&to_dns), Some(Action::Allow));

        let other = Packet::outbound("1.1.1.1".parse().unwrap(), 443, 6);
        assert_eq!(engine.classify(&other), Some(Action::Block));
    }

    #[test]
    fn same_field_conditions_are_alternatives() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        let ns = namespace(session.as_mut());
        let conds = vec![
            Condition::eq(Field::Protocol, Value::U8(17)),
            Condition::eq(Field::Protocol, Value::U8(6)),
            Condition::eq(Field::RemotePort, Value::U16(53)),
        ];
        session
            .add_filter(&ns, &filter(1, Action::Block, conds))
            .unwrap();
        let tcp = Packet::outbound("9.9.9.9".parse().unwrap(), 53, 6);
        let icmp = Packet::outbound("9.9.9.9".parse().unwrap(), 53, 1);
        assert_eq!(engine.classify(&tcp), Some(Action::Block));
        assert_eq!(engine.classify(&icmp), None);
    }

    #[test]
    fn closed_session_rejects_writes_and_closes_idempotently() {
        let engine = MemoryEngine::new();
        let mut session = engine.open_session("t", "t").unwrap();
        session.close().unwrap();
        session.close().unwrap();
        let err = session.begin_transaction().unwrap_err();
        assert_eq!(err.code, E_SESSION_CLOSED);
    }
}
