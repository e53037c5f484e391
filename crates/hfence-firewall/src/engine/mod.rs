//! Capability Provider boundary: the packet-classification engine.
//!
//! Implemented once per target OS. The compiler and weight logic never see
//! these types; only the installer talks to a [`Session`].
//!
//! Engine contract: within one layer the highest-weight matching filter
//! wins, ties break by most recently added. Sessions are dynamic: closing or
//! dropping one deletes every provider, sublayer and filter it registered.

pub mod memory;

use thiserror::Error;

use hfence_core::filter::CompiledFilter;
use hfence_core::namespace::{FilterId, Namespace, ProviderKey, SublayerKey};

pub use memory::{MemoryEngine, Packet, StoredFilter};

/// Raw engine failure; code and message are preserved up to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code:#010x})")]
pub struct EngineError {
    pub code: u32,
    pub message: String,
}

impl EngineError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Opens sessions against the engine.
pub trait Engine: Send + Sync {
    fn open_session(&self, name: &str, description: &str) -> EngineResult<Box<dyn Session>>;
}

/// One live engine connection. All writes are scoped to it.
pub trait Session: Send {
    fn begin_transaction(&mut self) -> EngineResult<()>;
    fn commit_transaction(&mut self) -> EngineResult<()>;
    fn abort_transaction(&mut self) -> EngineResult<()>;

    /// Register a freshly generated provider identity.
    fn add_provider(&mut self, name: &str, description: &str) -> EngineResult<ProviderKey>;

    /// Register a sublayer under `provider`.
    fn add_sublayer(
        &mut self,
        provider: ProviderKey,
        name: &str,
        description: &str,
    ) -> EngineResult<SublayerKey>;

    fn add_filter(&mut self, namespace: &Namespace, filter: &CompiledFilter)
        -> EngineResult<FilterId>;

    /// Close the session, cascading to everything it registered.
    /// Closing an already closed session is a no-op.
    fn close(&mut self) -> EngineResult<()>;
}
