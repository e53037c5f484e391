//! hfence firewall library entry.
//!
//! Turns an ordered kill-switch policy into weighted packet-classification
//! filters and installs them as one atomic unit:
//! builder -> weight assignment -> rule compiler -> transactional installer.
//! The engine itself sits behind the [`engine::Engine`] trait; an in-memory
//! implementation is included for tests and dry runs.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod builder;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod install;
pub mod killswitch;
pub mod resolve;
pub mod weight;

pub use builder::FirewallBuilder;
pub use compiler::{CompiledDirective, CompiledPolicy};
pub use engine::{Engine, EngineError, MemoryEngine, Packet, Session};
pub use install::{install, InstallOptions, InstalledPolicy};
pub use killswitch::{KillSwitch, NoRoutes, RouteManager};
pub use resolve::{Resolver, StaticResolver, SystemResolver};
