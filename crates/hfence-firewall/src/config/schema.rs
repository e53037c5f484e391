use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use hfence_core::error::{HFenceError, Result};

use crate::install::InstallOptions;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HFenceConfig {
    pub version: u32,

    #[serde(default)]
    pub firewall: FirewallSettings,

    #[serde(default)]
    pub session: SessionSection,
}

impl HFenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(HFenceError::UnsupportedVersion);
        }
        self.firewall.validate()?;
        self.session.validate()?;
        Ok(())
    }
}

/// What the kill switch should let through.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FirewallSettings {
    #[serde(default)]
    pub enable_kill_switch: bool,

    #[serde(default = "default_true")]
    pub allow_lan: bool,

    #[serde(default)]
    pub primary_dns: String,

    #[serde(default)]
    pub secondary_dns: String,

    /// Interface index/LUID of the VPN adapter.
    #[serde(default)]
    pub tunnel_interface: Option<u64>,

    #[serde(default = "default_true")]
    pub allow_ikev2: bool,

    /// Applications always permitted (VPN client, helpers).
    #[serde(default)]
    pub trusted_apps: Vec<PathBuf>,
}

impl Default for FirewallSettings {
    fn default() -> Self {
        Self {
            enable_kill_switch: false,
            allow_lan: true,
            primary_dns: String::new(),
            secondary_dns: String::new(),
            tunnel_interface: None,
            allow_ikev2: true,
            trusted_apps: Vec::new(),
        }
    }
}

impl FirewallSettings {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("firewall.primary_dns", &self.primary_dns),
            ("firewall.secondary_dns", &self.secondary_dns),
        ] {
            let value = value.trim();
            if !value.is_empty() && value.parse::<IpAddr>().is_err() {
                return Err(HFenceError::Config(format!(
                    "{field} must be an IP address, got {value:?}"
                )));
            }
        }
        if self.trusted_apps.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(HFenceError::Config(
                "firewall.trusted_apps entries must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Configured resolvers, primary first. Blank entries are skipped.
    pub fn dns_servers(&self) -> Vec<IpAddr> {
        [&self.primary_dns, &self.secondary_dns]
            .into_iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    #[serde(default = "default_session_name")]
    pub name: String,

    #[serde(default = "default_session_description")]
    pub description: String,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            name: default_session_name(),
            description: default_session_description(),
        }
    }
}

impl SessionSection {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(HFenceError::Config("session.name must not be empty".into()));
        }
        Ok(())
    }

    pub fn install_options(&self) -> InstallOptions {
        InstallOptions {
            session_name: self.name.clone(),
            session_description: self.description.clone(),
            ..InstallOptions::default()
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_session_name() -> String {
    "hfence".into()
}
fn default_session_description() -> String {
    "hfence dynamic session".into()
}
