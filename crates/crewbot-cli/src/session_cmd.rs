//! `crewbot session` — inspect and maintain room sessions.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crewbot_core::config::load_config;
use crewbot_core::ids::room_to_session_id;
use crewbot_core::session::compactor::total_tokens;
use crewbot_core::session::{RoomSessionManager, SessionCompactor};
use crewbot_core::utils::expand_home;

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Show all sessions with sizes and token estimates
    Status,
    /// Compact a room's session now
    Compact {
        /// Room id
        #[arg(default_value = "general")]
        room: String,
    },
    /// Clear a room's conversation
    Reset {
        /// Room id
        #[arg(default_value = "general")]
        room: String,
    },
}

pub fn dispatch(action: SessionCommands) -> Result<()> {
    let config = load_config(None);
    let workspace = expand_home(&config.agents.defaults.workspace);
    let sessions = RoomSessionManager::new(Some(workspace.join("room_sessions")))
        .context("failed to open session manager")?;

    match action {
        SessionCommands::Status => {
            let summaries = sessions.list_sessions();
            if summaries.is_empty() {
                println!("No sessions yet.");
                return Ok(());
            }
            println!("{}", "Sessions".bold());
            for summary in summaries {
                let session = sessions.get_or_create(&summary.key);
                println!(
                    "  {:<30} {:>4} messages  ~{:>6} tokens  updated {}",
                    summary.key,
                    session.messages.len(),
                    total_tokens(&session.messages),
                    summary.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
            Ok(())
        }

        SessionCommands::Compact { room } => {
            let key = room_to_session_id(&room);
            anyhow::ensure!(!key.is_empty(), "invalid room id");

            let mut session = sessions.get_or_create(&key);
            let before = session.messages.len();
            if before == 0 {
                println!("Session '{key}' is empty, nothing to compact.");
                return Ok(());
            }

            let compactor = SessionCompactor::new(config.memory.session_compaction.clone());
            let result = compactor.compact(&mut session, None);
            sessions.replace(session);

            println!(
                "🧹 Compacted '{key}': {} → {} messages ({} → {} tokens, {})",
                result.original_count,
                result.compacted_count,
                result.tokens_before,
                result.tokens_after,
                result.mode
            );
            Ok(())
        }

        SessionCommands::Reset { room } => {
            let key = room_to_session_id(&room);
            anyhow::ensure!(!key.is_empty(), "invalid room id");
            sessions.clear(&key);
            println!("🆕 Cleared session '{key}'.");
            Ok(())
        }
    }
}
