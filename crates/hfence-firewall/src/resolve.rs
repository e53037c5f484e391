//! External lookups needed during compilation.
//!
//! Application paths resolve to an opaque [`AppId`] blob and host names to
//! their address sets. Both happen before any engine call, so a failure here
//! aborts the build with nothing installed.

use std::collections::HashMap;
use std::fs;
use std::net::{IpAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use hfence_core::error::{HFenceError, Result};
use hfence_core::filter::AppId;

/// Lookup capability used by the rule compiler.
pub trait Resolver: Send + Sync {
    /// Resolve an executable path to its application identity.
    fn app_id(&self, path: &Path) -> Result<AppId>;
    /// Resolve a host name to its addresses.
    fn host_addrs(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Resolver backed by the local filesystem and system DNS.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn app_id(&self, path: &Path) -> Result<AppId> {
        let failed = |reason: String| HFenceError::ResolutionFailed {
            target: path.display().to_string(),
            reason,
        };

        let canonical = fs::canonicalize(path).map_err(|e| failed(e.to_string()))?;
        let meta = fs::metadata(&canonical).map_err(|e| failed(e.to_string()))?;
        if !meta.is_file() {
            return Err(failed("not a regular file".into()));
        }
        Ok(app_id_from_path(&canonical))
    }

    fn host_addrs(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = (host, 0u16)
            .to_socket_addrs()
            .map_err(|e| HFenceError::ResolutionFailed {
                target: host.to_string(),
                reason: e.to_string(),
            })?;

        let mut out: Vec<IpAddr> = Vec::new();
        for a in addrs {
            if !out.contains(&a.ip()) {
                out.push(a.ip());
            }
        }
        if out.is_empty() {
            return Err(HFenceError::ResolutionFailed {
                target: host.to_string(),
                reason: "no addresses".into(),
            });
        }
        Ok(out)
    }
}

/// Identity blob: lowercased path as NUL-terminated UTF-16LE.
pub fn app_id_from_path(path: &Path) -> AppId {
    let lowered = path.to_string_lossy().to_lowercase();
    let mut blob = Vec::with_capacity((lowered.len() + 1) * 2);
    for unit in lowered.encode_utf16().chain(std::iter::once(0)) {
        blob.extend_from_slice(&unit.to_le_bytes());
    }
    AppId::new(blob)
}

/// Fixed lookup table, for tests and dry runs.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    apps: HashMap<PathBuf, AppId>,
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let id = app_id_from_path(&path);
        self.apps.insert(path, id);
        self
    }

    pub fn with_host(mut self, host: &str, addrs: impl IntoIterator<Item = IpAddr>) -> Self {
        self.hosts
            .insert(host.to_ascii_lowercase(), addrs.into_iter().collect());
        self
    }
}

impl Resolver for StaticResolver {
    fn app_id(&self, path: &Path) -> Result<AppId> {
        self.apps
            .get(path)
            .cloned()
            .ok_or_else(|| HFenceError::ResolutionFailed {
                target: path.display().to_string(),
                reason: "file does not exist".into(),
            })
    }

    fn host_addrs(&self, host: &str) -> Result<Vec<IpAddr>> {
        match self.hosts.get(&host.to_ascii_lowercase()) {
            Some(addrs) if !addrs.is_empty() => Ok(addrs.clone()),
            _ => Err(HFenceError::ResolutionFailed {
                target: host.to_string(),
                reason: "unknown host".into(),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use hfence_core::ErrorCode;

    #[test]
    fn app_id_is_case_insensitive_utf16() {
        let a = app_id_from_path(Path::new("/Opt/VPN/OpenVPN"));
        let b = app_id_from_path(Path::new("/opt/vpn/openvpn"));
        assert_eq!(a, b);
        // 16 chars + NUL, two bytes each
        assert_eq!(a.as_bytes().len(), 34);
        assert_eq!(&a.as_bytes()[32..], &[0, 0]);
    }

    #[test]
    fn system_resolver_rejects_missing_file() {
        let err = SystemResolver
            .app_id(Path::new("/does/not/exist"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResolutionFailed);
    }

    #[test]
    fn system_resolver_rejects_directories() {
        let err = SystemResolver.app_id(&std::env::temp_dir()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResolutionFailed);
    }

    #[test]
    fn static_resolver_lookups() {
        let r = StaticResolver::new()
            .with_app("/usr/bin/app")
            .with_host("VPN.example.com", ["10.8.0.1".parse().unwrap()]);
        assert!(r.app_id(Path::new("/usr/bin/app")).is_ok());
        assert_eq!(r.host_addrs("vpn.example.com").unwrap().len(), 1);
        assert_eq!(
            r.host_addrs("other.example.com").unwrap_err().code(),
            ErrorCode::ResolutionFailed
        );
    }
}
