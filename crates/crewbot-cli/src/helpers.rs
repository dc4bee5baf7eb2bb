//! Shared CLI plumbing: runtime wiring and output helpers.

use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use colored::Colorize;

use crewbot_agent::tools::config_tool::SharedConfig;
use crewbot_agent::AgentLoop;
use crewbot_broker::RoomBrokerManager;
use crewbot_core::bus::queue::MessageBus;
use crewbot_core::config::{get_config_path, Config};
use crewbot_core::room::RoomManager;
use crewbot_core::session::RoomSessionManager;
use crewbot_core::utils::expand_home;
use crewbot_memory::{
    ActivityTracker, BackgroundProcessor, HashingEmbedder, MemoryStore, PatternExtractor,
};
use crewbot_providers::http_provider::create_provider;
use crewbot_providers::traits::LlmProvider;

/// Everything a command needs to run the service.
pub struct Runtime {
    pub bus: Arc<MessageBus>,
    pub agent: Arc<AgentLoop>,
    pub brokers: Arc<RoomBrokerManager>,
    pub background: Option<Arc<BackgroundProcessor>>,
}

/// Wire the full runtime from configuration.
pub fn build_runtime(config: &Config) -> Result<Runtime> {
    let workspace = expand_home(&config.agents.defaults.workspace);
    std::fs::create_dir_all(&workspace)
        .with_context(|| format!("failed to create workspace: {}", workspace.display()))?;

    let bus = Arc::new(MessageBus::new(100));
    let sessions = Arc::new(
        RoomSessionManager::new(Some(workspace.join("room_sessions")))
            .context("failed to create session manager")?,
    );
    let rooms = Arc::new(
        RoomManager::new(&config.agents.leader)
            .with_shared_store(&workspace)
            .context("failed to open room shared store")?,
    );

    // Provider: absent when nothing is configured — the agent loop's
    // onboarding gate handles that case.
    let provider: Option<Arc<dyn LlmProvider>> = if config.providers.any_configured() {
        let providers_map = config.providers.to_map();
        match create_provider(&config.agents.defaults.model, &providers_map) {
            Ok(p) => Some(Arc::new(p)),
            Err(e) => {
                tracing::warn!(error = %e, "no provider for configured model");
                None
            }
        }
    } else {
        None
    };

    // Memory stack.
    let (memory, activity, background) = if config.memory.enabled {
        let store = Arc::new(
            MemoryStore::open(&config.memory, &workspace).context("failed to open memory store")?,
        );
        let activity = Arc::new(ActivityTracker::new(
            config.memory.background.quiet_threshold_seconds,
        ));
        let background = if config.memory.background.enabled {
            Some(Arc::new(BackgroundProcessor::new(
                store.clone(),
                activity.clone(),
                Arc::new(PatternExtractor::new()),
                Arc::new(HashingEmbedder::new()),
                config.memory.background.interval_seconds,
                config.memory.extraction.batch_size,
                config.memory.summary.staleness_threshold,
                config.memory.summary.max_refresh_batch,
                config.memory.learning.relevance_decay_rate,
            )))
        } else {
            None
        };
        (Some(store), Some(activity), background)
    } else {
        (None, None, None)
    };

    let shared_config: SharedConfig = Arc::new(RwLock::new(config.clone()));

    let agent = Arc::new(AgentLoop::new(
        config,
        shared_config,
        get_config_path(),
        bus.clone(),
        provider,
        sessions,
        rooms,
        memory,
        activity,
    ));

    let brokers = Arc::new(RoomBrokerManager::new(
        workspace.join("broker_queue"),
        agent.clone(),
    ));

    Ok(Runtime {
        bus,
        agent,
        brokers,
        background,
    })
}

/// Print the startup banner.
pub fn print_banner() {
    println!("  {}", "🤖 Crewbot — a crew of bots in rooms".bold());
}

/// Print an agent response.
pub fn print_response(response: &str) {
    println!();
    println!("{}", response);
    println!();
}

/// Print an error in red to stderr.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {err:#}", "error:".red().bold());
}
