//! hfence-plan: dry-run a kill-switch settings file.
//!
//! Loads the settings, builds the derived policy against the in-memory
//! engine and prints the compiled filters as JSON.

use std::process::ExitCode;

use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use hfence_core::directive::Action;
use hfence_core::filter::CompiledFilter;
use hfence_firewall::{config, killswitch, MemoryEngine, SystemResolver};

#[derive(Serialize)]
struct PlanEntry<'a> {
    directive: &'static str,
    action: Action,
    weight: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    deny_weight: Option<u8>,
    filters: &'a [CompiledFilter],
}

fn run(path: &str) -> hfence_core::Result<String> {
    let cfg = config::load_from_file(path)?;
    if !cfg.firewall.enable_kill_switch {
        tracing::warn!("enable_kill_switch is false; planning the policy anyway");
    }

    let policy = killswitch::policy_for(&cfg.firewall).compile(&SystemResolver)?;
    let engine = MemoryEngine::new();
    let installed =
        hfence_firewall::install(&engine, &cfg.session.install_options(), &policy)?;
    tracing::info!(
        namespace = %installed.namespace(),
        directives = policy.directives().len(),
        filters = installed.filter_ids().len(),
        "dry run installed"
    );

    let plan: Vec<PlanEntry<'_>> = policy
        .directives()
        .iter()
        .map(|d| PlanEntry {
            directive: d.kind,
            action: d.action,
            weight: d.weight.weight,
            deny_weight: d.weight.deny_weight,
            filters: &d.filters,
        })
        .collect();
    serde_json::to_string_pretty(&plan)
        .map_err(|e| hfence_core::HFenceError::Config(format!("serialize plan failed: {e}")))
}

fn main() -> ExitCode {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: hfence-plan <settings.yaml>");
        return ExitCode::from(2);
    };

    match run(&path) {
        Ok(json) => {
            println!("{json}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(code = e.code().as_str(), error = %e, "planning failed");
            eprintln!("hfence-plan: {e}");
            ExitCode::FAILURE
        }
    }
}
