//! `crewbot memory` — inspect and maintain the memory store.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use crewbot_core::config::load_config;
use crewbot_core::utils::expand_home;
use crewbot_memory::{HashingEmbedder, MemoryRetrieval, MemoryStore};

#[derive(Subcommand)]
pub enum MemoryCommands {
    /// Create the memory database and tables
    Init,
    /// Show table counts and pending extractions
    Status,
    /// Semantic search over remembered events
    Search {
        /// The query text
        query: String,
        /// Maximum results
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// List known entities
    Entities {
        /// Filter by entity type (person, organization, location, concept, tool)
        #[arg(short = 't', long)]
        entity_type: Option<String>,
    },
    /// Show one entity with its facts and relationships
    Entity {
        /// Entity name
        name: String,
    },
    /// Delete an entity by name
    Forget {
        /// Entity name
        name: String,
    },
    /// Check database health and vacuum
    Doctor,
}

pub fn dispatch(action: MemoryCommands) -> Result<()> {
    let config = load_config(None);
    let workspace = expand_home(&config.agents.defaults.workspace);
    let store = MemoryStore::open(&config.memory, &workspace).context("failed to open memory store")?;

    match action {
        MemoryCommands::Init => {
            // Opening created the tables already.
            println!("✅ Memory database ready at {}", store.db_path().display());
            Ok(())
        }

        MemoryCommands::Status => {
            let stats = store.get_stats()?;
            println!("{}", "Memory status".bold());
            for table in ["events", "entities", "edges", "facts", "summary_nodes", "learnings"] {
                println!("  {:<16} {}", table, stats.get(table).unwrap_or(&0));
            }
            println!(
                "  {:<16} {}",
                "pending",
                stats.get("pending_extractions").unwrap_or(&0)
            );
            Ok(())
        }

        MemoryCommands::Search { query, limit } => {
            let embedder = HashingEmbedder::new();
            let retrieval = MemoryRetrieval::new(&store, &embedder);
            let hits = retrieval.search(&query, None, limit, 0.05)?;

            if hits.is_empty() {
                println!("No matches for '{query}'.");
                return Ok(());
            }
            for hit in hits {
                println!(
                    "[{:.2}] {} {}",
                    hit.similarity,
                    hit.event.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
                    crewbot_core::utils::truncate_string(&hit.event.content, 120)
                );
            }
            Ok(())
        }

        MemoryCommands::Entities { entity_type } => {
            let entities = match entity_type {
                Some(kind) => store.get_entities_by_type(&kind, 100)?,
                None => store.get_all_entities(100)?,
            };
            if entities.is_empty() {
                println!("No entities yet.");
                return Ok(());
            }
            for entity in entities {
                println!(
                    "{:<30} {:<14} {} event(s)",
                    entity.name.bold(),
                    entity.entity_type,
                    entity.event_count
                );
            }
            Ok(())
        }

        MemoryCommands::Entity { name } => {
            let embedder = HashingEmbedder::new();
            let retrieval = MemoryRetrieval::new(&store, &embedder);
            let result = retrieval.recall(&name, 5)?;
            print!("{}", result.render(&name));
            Ok(())
        }

        MemoryCommands::Forget { name } => {
            match store.find_entity_by_name(&name)? {
                Some(entity) => {
                    store.delete_entity(&entity.id)?;
                    println!("🗑 Forgot '{}'", entity.name);
                }
                None => println!("No entity named '{name}'."),
            }
            Ok(())
        }

        MemoryCommands::Doctor => {
            let stats = store.get_stats()?;
            let total: i64 = stats.values().sum();
            store.vacuum()?;
            println!("✅ Database healthy: {} total rows, vacuumed.", total);
            Ok(())
        }
    }
}
