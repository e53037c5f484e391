//! Identifiers grouping everything one installation registers.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

/// Provider identity, freshly generated per install.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ProviderKey(pub Uuid);

/// Sublayer identity under a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SublayerKey(pub Uuid);

impl ProviderKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl SublayerKey {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Engine-assigned filter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FilterId(pub u64);

/// `{provider, sublayer}` pair. Deleting it deletes every filter under it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Namespace {
    pub provider: ProviderKey,
    pub sublayer: SublayerKey,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider.0, self.sublayer.0)
    }
}
