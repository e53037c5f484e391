//! Kill-switch orchestrator.
//!
//! Owns at most one installed policy. A settings change is always
//! "tear down the old policy, install a new one"; rule sets are never
//! patched in place. The new policy is compiled (paths and hosts resolved)
//! while the old one is still live, so only the engine swap runs unprotected.
//! Split-route moves are best effort: a route failure is logged and never
//! undoes the firewall.

use std::io;
use std::net::IpAddr;
use std::sync::Arc;

use hfence_core::error::Result;

use crate::builder::FirewallBuilder;
use crate::config::FirewallSettings;
use crate::engine::Engine;
use crate::install::{self, InstallOptions, InstalledPolicy};
use crate::resolve::Resolver;

/// OS route-table collaborator for split tunneling.
pub trait RouteManager: Send + Sync {
    fn add_split_routes(&self, vpn_ip: IpAddr) -> io::Result<()>;
    fn remove_split_routes(&self, vpn_ip: IpAddr) -> io::Result<()>;
}

/// Route manager for setups without split tunneling.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRoutes;

impl RouteManager for NoRoutes {
    fn add_split_routes(&self, _vpn_ip: IpAddr) -> io::Result<()> {
        Ok(())
    }

    fn remove_split_routes(&self, _vpn_ip: IpAddr) -> io::Result<()> {
        Ok(())
    }
}

pub struct KillSwitch {
    engine: Arc<dyn Engine>,
    resolver: Arc<dyn Resolver>,
    routes: Arc<dyn RouteManager>,
    options: InstallOptions,
    active: Option<InstalledPolicy>,
    settings: Option<FirewallSettings>,
    vpn_ip: Option<IpAddr>,
}

impl KillSwitch {
    pub fn new(
        engine: Arc<dyn Engine>,
        resolver: Arc<dyn Resolver>,
        routes: Arc<dyn RouteManager>,
    ) -> Self {
        Self {
            engine,
            resolver,
            routes,
            options: InstallOptions::default(),
            active: None,
            settings: None,
            vpn_ip: None,
        }
    }

    pub fn with_options(mut self, options: InstallOptions) -> Self {
        self.options = options;
        self
    }

    /// True while a policy is installed.
    pub fn is_enabled(&self) -> bool {
        self.active.as_ref().is_some_and(InstalledPolicy::is_active)
    }

    /// The installed policy, if any.
    pub fn active(&self) -> Option<&InstalledPolicy> {
        self.active.as_ref()
    }

    /// Bring the firewall in line with `settings` for the given tunnel address.
    ///
    /// If the new policy fails to compile, the current policy and routes stay
    /// as they are. Any later failure leaves no policy active and no split
    /// routes installed.
    pub fn apply(&mut self, settings: &FirewallSettings, vpn_ip: Option<IpAddr>) -> Result<()> {
        let unchanged = self.settings.as_ref() == Some(settings) && self.vpn_ip == vpn_ip;
        if self.is_enabled() && unchanged {
            tracing::debug!("firewall settings unchanged");
            return Ok(());
        }

        if !settings.enable_kill_switch {
            tracing::info!("kill switch disabled");
            self.move_routes(None);
            return self.teardown_active();
        }

        let policy = match policy_for(settings).compile(self.resolver.as_ref()) {
            Ok(policy) => policy,
            Err(e) => {
                tracing::warn!(error = %e, "new policy rejected; keeping the current one");
                return Err(e);
            }
        };

        let installed = self
            .teardown_active()
            .and_then(|()| install::install(self.engine.as_ref(), &self.options, &policy));
        let installed = match installed {
            Ok(installed) => installed,
            Err(e) => {
                self.move_routes(None);
                return Err(e);
            }
        };
        tracing::info!(
            namespace = %installed.namespace(),
            filters = installed.filter_ids().len(),
            vpn_ip = ?vpn_ip,
            "kill switch enabled"
        );
        self.active = Some(installed);
        self.settings = Some(settings.clone());
        self.move_routes(vpn_ip);
        Ok(())
    }

    /// Remove the policy and split routes. Safe to call repeatedly.
    pub fn stop(&mut self) -> Result<()> {
        self.move_routes(None);
        self.teardown_active()
    }

    fn teardown_active(&mut self) -> Result<()> {
        self.settings = None;
        match self.active.take() {
            Some(mut policy) => policy.teardown(),
            None => Ok(()),
        }
    }

    fn move_routes(&mut self, to: Option<IpAddr>) {
        if self.vpn_ip == to {
            return;
        }
        if let Some(old) = self.vpn_ip.take() {
            if let Err(e) = self.routes.remove_split_routes(old) {
                tracing::warn!(vpn_ip = %old, error = %e, "failed to remove split routes");
            }
        }
        if let Some(new) = to {
            if let Err(e) = self.routes.add_split_routes(new) {
                tracing::warn!(vpn_ip = %new, error = %e, "failed to add split routes");
            }
        }
        self.vpn_ip = to;
    }
}

/// Policy derived from kill-switch settings, lowest precedence first.
pub fn policy_for(settings: &FirewallSettings) -> FirewallBuilder {
    let mut b = FirewallBuilder::new().block().all().allow().localhost();
    if let Some(index) = settings.tunnel_interface {
        b = b.network_interface([index]);
    }
    if settings.allow_ikev2 {
        b = b.ikev2();
    }
    let dns = settings.dns_servers();
    b = if dns.is_empty() {
        b.domain_name_system()
    } else {
        b.domain_name_system_via(dns)
    };
    if settings.allow_lan {
        b = b.local_area_network();
    }
    if !settings.trusted_apps.is_empty() {
        b = b.application(&settings.trusted_apps);
    }
    b
}
