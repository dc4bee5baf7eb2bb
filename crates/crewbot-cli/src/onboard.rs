//! `crewbot onboard` — initialize configuration and workspace layout.

use anyhow::{Context, Result};
use colored::Colorize;

use crewbot_core::config::{get_config_path, load_config, save_config};
use crewbot_core::utils::expand_home;

pub fn run() -> Result<()> {
    println!("{}", "Setting up Crewbot…".bold());

    // Config file (defaults merged with anything already present).
    let config = load_config(None);
    let config_path = get_config_path();
    let existed = config_path.exists();
    save_config(&config, None).context("failed to write config")?;
    println!(
        "  {} {}",
        if existed { "Kept" } else { "Created" },
        config_path.display()
    );

    // Workspace layout.
    let workspace = expand_home(&config.agents.defaults.workspace);
    for dir in ["", "memory", "room_sessions", "broker_queue", "analytics", "documents", "bots"] {
        let path = if dir.is_empty() {
            workspace.clone()
        } else {
            workspace.join(dir)
        };
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }
    println!("  Workspace ready at {}", workspace.display());

    println!();
    println!("Next steps:");
    println!("  1. Add an API key:   crewbot configure providers.openrouter.apiKey sk-or-…");
    println!("  2. Say hello:        crewbot agent -m \"hello\"");
    println!("  3. Run the service:  crewbot gateway");
    Ok(())
}
