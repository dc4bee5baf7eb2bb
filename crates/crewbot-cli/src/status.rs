//! `crewbot status` — show configuration and provider status.

use anyhow::Result;
use colored::Colorize;

use crewbot_core::config::{get_config_path, load_config};
use crewbot_core::utils::expand_home;
use crewbot_providers::registry::PROVIDERS;

pub fn run() -> Result<()> {
    let config = load_config(None);
    let config_path = get_config_path();
    let workspace = expand_home(&config.agents.defaults.workspace);

    println!("{}", "Crewbot status".bold());
    println!();
    println!(
        "  Config:    {} {}",
        config_path.display(),
        if config_path.exists() { "✅" } else { "(not created yet)" }
    );
    println!(
        "  Workspace: {} {}",
        workspace.display(),
        if workspace.exists() { "✅" } else { "(not created yet)" }
    );
    println!("  Leader:    {}", config.agents.leader);
    println!("  Model:     {}", config.agents.defaults.model);
    println!();

    println!("{}", "Providers".bold());
    let providers_map = config.providers.to_map();
    let mut any = false;
    for spec in PROVIDERS {
        if let Some(provider) = providers_map.get(spec.name) {
            if provider.is_configured() {
                println!("  {:<12} ✅ configured", spec.display_name);
                any = true;
            }
        }
    }
    if !any {
        println!("  (none configured — run `crewbot onboard`)");
    }
    println!();

    println!("{}", "Routing".bold());
    println!(
        "  enabled: {}   sticky window: {}   llm fallback: {} ({}ms)",
        config.routing.enabled,
        config.routing.sticky.context_window,
        config.routing.llm_classifier.model,
        config.routing.llm_classifier.timeout_ms
    );
    for tier in ["simple", "medium", "complex", "reasoning", "coding"] {
        if let Some(t) = config.routing.tiers.get(tier) {
            println!("  {:<10} {}", tier, t.model);
        }
    }
    println!();

    println!("{}", "Memory".bold());
    println!(
        "  enabled: {}   db: {}   background every {}s",
        config.memory.enabled, config.memory.db_path, config.memory.background.interval_seconds
    );

    Ok(())
}
