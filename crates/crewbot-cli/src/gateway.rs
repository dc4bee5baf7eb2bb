//! Gateway command — the long-lived service.
//!
//! Startup sequence:
//! 1. Load config and wire the runtime (bus, agent, brokers, memory)
//! 2. Start the background processor
//! 3. Start the inbound pump: bus → broker manager (route by room)
//! 4. Start the channel manager (outbound dispatch)
//! 5. Wait for Ctrl+C, then drain everything cooperatively

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use crewbot_channels::ChannelManager;
use crewbot_core::bus::types::SenderRole;
use crewbot_core::config::load_config;
use crewbot_core::room::GENERAL_ROOM;

use crate::helpers::{self, print_banner};

/// Run the gateway until interrupted.
pub async fn run() -> Result<()> {
    println!();
    print_banner();
    println!("  Mode: Gateway");
    println!();

    let config = load_config(None);
    let runtime = helpers::build_runtime(&config)?;

    // Background processor.
    if let Some(background) = &runtime.background {
        background.start().await;
    }

    // Inbound pump: every bus message gets a room (defaulting to
    // general) and enters its room broker.
    let bus = runtime.bus.clone();
    let brokers = runtime.brokers.clone();
    let pump = tokio::spawn(async move {
        info!("inbound pump started");
        while let Some(mut msg) = bus.consume_inbound().await {
            if msg.room_id.is_none() {
                msg.set_room(GENERAL_ROOM);
            }
            msg.apply_defaults(SenderRole::User);
            match brokers.route_message(msg).await {
                Ok(true) => {}
                Ok(false) => warn!("room queue overflowed, message dropped"),
                Err(e) => error!(error = %e, "failed to route inbound message"),
            }
        }
        info!("inbound pump stopped");
    });

    // Channel manager. Concrete transports register themselves here;
    // with none enabled, the CLI/REPL path is still fully functional.
    let channel_manager = Arc::new(ChannelManager::new(runtime.bus.clone()));
    let channels = channel_manager.clone();
    let channels_task = tokio::spawn(async move {
        if let Err(e) = channels.start_all().await {
            error!(error = %e, "channel manager failed");
        }
    });

    info!("gateway running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down…");

    channel_manager.stop_all().await;
    runtime.brokers.stop_all().await;
    if let Some(background) = &runtime.background {
        background.stop().await;
    }
    pump.abort();
    channels_task.abort();

    info!("gateway stopped");
    Ok(())
}
