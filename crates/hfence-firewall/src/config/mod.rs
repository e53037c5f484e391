//! Kill-switch settings loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use hfence_core::error::{HFenceError, Result};

pub use schema::{FirewallSettings, HFenceConfig, SessionSection};

pub fn load_from_file(path: impl AsRef<Path>) -> Result<HFenceConfig> {
    let path = path.as_ref();
    let s = fs::read_to_string(path)
        .map_err(|e| HFenceError::Config(format!("read {} failed: {e}", path.display())))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<HFenceConfig> {
    let cfg: HFenceConfig =
        serde_yaml::from_str(s).map_err(|e| HFenceError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
