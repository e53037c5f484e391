//! Top-level facade crate for hfence.
//!
//! Re-exports the policy model and the firewall library so a VPN service can
//! depend on a single crate. The common entry points are lifted to the root:
//!
//! ```
//! use hfence::{FirewallBuilder, MemoryEngine, StaticResolver};
//!
//! let engine = MemoryEngine::new();
//! let policy = FirewallBuilder::new()
//!     .block()
//!     .all()
//!     .allow()
//!     .localhost()
//!     .build(&engine, &StaticResolver::new())?;
//! assert_eq!(policy.filter_ids().len(), 8);
//! # Ok::<(), hfence::HFenceError>(())
//! ```

pub mod core {
    pub use hfence_core::*;
}

pub mod firewall {
    pub use hfence_firewall::*;
}

pub use hfence_core::{ErrorCode, HFenceError, Result};
pub use hfence_firewall::{
    FirewallBuilder, InstallOptions, InstalledPolicy, KillSwitch, MemoryEngine, StaticResolver,
    SystemResolver,
};
