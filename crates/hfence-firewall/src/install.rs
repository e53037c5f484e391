//! Transactional installer.
//!
//! One install = one dynamic session, one fresh `{provider, sublayer}`
//! namespace, one transaction. The namespace is registered inside the
//! transaction, so an abort leaves no provider, sublayer or filter behind.
//! Nothing is retried: on any engine failure the transaction is aborted, the
//! session closed and the engine's code/message returned as
//! [`HFenceError::Install`].

use hfence_core::error::{HFenceError, Result};
use hfence_core::namespace::{FilterId, Namespace};

use crate::compiler::CompiledPolicy;
use crate::engine::{Engine, EngineError, Session};

/// Display names passed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub session_name: String,
    pub session_description: String,
    pub provider_name: String,
    pub sublayer_name: String,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            session_name: "hfence".into(),
            session_description: "hfence dynamic session".into(),
            provider_name: "hfence provider".into(),
            sublayer_name: "hfence filters".into(),
        }
    }
}

fn install_error(op: &'static str, e: EngineError) -> HFenceError {
    HFenceError::Install {
        op,
        code: e.code,
        message: e.message,
    }
}

/// Install `policy` atomically and return the live handle.
pub fn install(
    engine: &dyn Engine,
    options: &InstallOptions,
    policy: &CompiledPolicy,
) -> Result<InstalledPolicy> {
    let mut session = engine
        .open_session(&options.session_name, &options.session_description)
        .map_err(|e| install_error("open_session", e))?;

    if let Err(e) = session.begin_transaction() {
        close_quietly(session.as_mut());
        return Err(install_error("begin_transaction", e));
    }

    match populate(session.as_mut(), options, policy) {
        Ok((namespace, filter_ids)) => {
            tracing::info!(
                %namespace,
                filters = filter_ids.len(),
                "firewall policy committed"
            );
            Ok(InstalledPolicy {
                session: Some(session),
                namespace,
                filter_ids,
            })
        }
        Err(err) => {
            tracing::warn!(error = %err, "firewall install failed; aborting transaction");
            if let Err(e) = session.abort_transaction() {
                // Commit failures already ended the transaction engine-side.
                tracing::debug!(error = %e, "abort after failed install");
            }
            close_quietly(session.as_mut());
            Err(err)
        }
    }
}

/// Register the namespace, add every filter, commit.
fn populate(
    session: &mut dyn Session,
    options: &InstallOptions,
    policy: &CompiledPolicy,
) -> Result<(Namespace, Vec<FilterId>)> {
    let provider = session
        .add_provider(&options.provider_name, &options.session_description)
        .map_err(|e| install_error("add_provider", e))?;
    let sublayer = session
        .add_sublayer(provider, &options.sublayer_name, &options.session_description)
        .map_err(|e| install_error("add_sublayer", e))?;
    let namespace = Namespace { provider, sublayer };
    tracing::debug!(%namespace, "namespace registered");

    let mut filter_ids = Vec::with_capacity(policy.filter_count());
    for filter in policy.filters() {
        let id = session
            .add_filter(&namespace, filter)
            .map_err(|e| install_error("add_filter", e))?;
        tracing::trace!(id = id.0, name = %filter.name, weight = filter.weight, "filter added");
        filter_ids.push(id);
    }

    session
        .commit_transaction()
        .map_err(|e| install_error("commit_transaction", e))?;
    Ok((namespace, filter_ids))
}

fn close_quietly(session: &mut dyn Session) {
    if let Err(e) = session.close() {
        tracing::warn!(error = %e, "failed to close engine session");
    }
}

/// A committed rule set. Dropping it tears the namespace down.
pub struct InstalledPolicy {
    session: Option<Box<dyn Session>>,
    namespace: Namespace,
    filter_ids: Vec<FilterId>,
}

impl std::fmt::Debug for InstalledPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledPolicy")
            .field("namespace", &self.namespace)
            .field("filters", &self.filter_ids.len())
            .field("active", &self.is_active())
            .finish()
    }
}

impl InstalledPolicy {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Engine ids of the installed filters, in installation order.
    pub fn filter_ids(&self) -> &[FilterId] {
        &self.filter_ids
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Close the session, cascading to the namespace and every filter in it.
    /// Safe to call repeatedly.
    pub fn teardown(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session
            .close()
            .map_err(|e| install_error("close_session", e))?;
        tracing::info!(namespace = %self.namespace, "firewall policy removed");
        Ok(())
    }
}

impl Drop for InstalledPolicy {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::warn!(error = %e, "teardown on drop failed");
        }
    }
}
