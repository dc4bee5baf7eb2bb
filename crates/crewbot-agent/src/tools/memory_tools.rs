//! Memory tools — the LLM-facing surface over the memory store:
//! `search_memory`, `get_entity`, `get_relationships`, `recall`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crewbot_memory::{Embedder, MemoryRetrieval, MemoryStore};

use super::base::{optional_i64, optional_string, require_string, Tool};

/// Shared state for all memory tools.
pub struct MemoryToolset {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
}

impl MemoryToolset {
    pub fn new(store: Arc<MemoryStore>, embedder: Arc<dyn Embedder>) -> Arc<Self> {
        Arc::new(MemoryToolset { store, embedder })
    }

    fn retrieval(&self) -> MemoryRetrieval<'_> {
        MemoryRetrieval::new(&self.store, self.embedder.as_ref())
    }
}

// ─────────────────────────────────────────────
// search_memory
// ─────────────────────────────────────────────

/// Semantic search over remembered events.
pub struct SearchMemoryTool {
    toolset: Arc<MemoryToolset>,
}

impl SearchMemoryTool {
    pub fn new(toolset: Arc<MemoryToolset>) -> Self {
        Self { toolset }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search long-term memory for past events related to a query. \
         Returns matching events with similarity scores."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "session_key": {
                    "type": "string",
                    "description": "Optional session to restrict the search to"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum results (default 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let query = require_string(&params, "query")?;
        let session_key = optional_string(&params, "session_key");
        let limit = optional_i64(&params, "limit").unwrap_or(5).clamp(1, 20) as usize;

        let hits = self
            .toolset
            .retrieval()
            .search(&query, session_key.as_deref(), limit, 0.1)?;

        if hits.is_empty() {
            return Ok(format!("No memories found for '{query}'."));
        }

        let mut out = format!("Found {} memor{} for '{query}':\n", hits.len(),
            if hits.len() == 1 { "y" } else { "ies" });
        for hit in hits {
            out.push_str(&format!(
                "- [{:.2}] ({}) {}\n",
                hit.similarity,
                hit.event.timestamp.format("%Y-%m-%d"),
                crewbot_core::utils::truncate_string(&hit.event.content, 150)
            ));
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// get_entity
// ─────────────────────────────────────────────

/// Look up a known entity by name.
pub struct GetEntityTool {
    toolset: Arc<MemoryToolset>,
}

impl GetEntityTool {
    pub fn new(toolset: Arc<MemoryToolset>) -> Self {
        Self { toolset }
    }
}

#[async_trait]
impl Tool for GetEntityTool {
    fn name(&self) -> &str {
        "get_entity"
    }

    fn description(&self) -> &str {
        "Look up everything known about a person, organization, place, concept, or tool by name."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Entity name (case-insensitive; aliases work too)"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let name = require_string(&params, "name")?;
        let retrieval = self.toolset.retrieval();

        let Some(entity) = retrieval.get_entity_by_name(&name)? else {
            return Ok(format!("No entity named '{name}' in memory."));
        };

        let facts = retrieval.get_entity_facts(&entity.id)?;

        let mut out = format!(
            "{} ({})\nMentioned in {} event(s).\n",
            entity.name, entity.entity_type, entity.event_count
        );
        if !entity.aliases.is_empty() {
            out.push_str(&format!("Aliases: {}\n", entity.aliases.join(", ")));
        }
        if !entity.description.is_empty() {
            out.push_str(&format!("{}\n", entity.description));
        }
        if !facts.is_empty() {
            out.push_str("Facts:\n");
            for fact in facts.iter().take(10) {
                out.push_str(&format!("- {} {}\n", fact.predicate, fact.object_text));
            }
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// get_relationships
// ─────────────────────────────────────────────

/// List the relationships of an entity.
pub struct GetRelationshipsTool {
    toolset: Arc<MemoryToolset>,
}

impl GetRelationshipsTool {
    pub fn new(toolset: Arc<MemoryToolset>) -> Self {
        Self { toolset }
    }
}

#[async_trait]
impl Tool for GetRelationshipsTool {
    fn name(&self) -> &str {
        "get_relationships"
    }

    fn description(&self) -> &str {
        "List the known relationships of an entity (who works where, what relates to what)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Entity name to look up relationships for"
                }
            },
            "required": ["name"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let name = require_string(&params, "name")?;
        let retrieval = self.toolset.retrieval();

        let Some(entity) = retrieval.get_entity_by_name(&name)? else {
            return Ok(format!("No entity named '{name}' in memory."));
        };

        let edges = retrieval.get_relationships(&entity.id)?;
        if edges.is_empty() {
            return Ok(format!("No relationships recorded for '{}'.", entity.name));
        }

        let mut out = format!("Relationships of {}:\n", entity.name);
        for edge in edges.iter().take(15) {
            let other_id = if edge.source_entity_id == entity.id {
                &edge.target_entity_id
            } else {
                &edge.source_entity_id
            };
            let other = retrieval
                .get_entity(other_id)?
                .map(|e| e.name)
                .unwrap_or_else(|| other_id.clone());
            out.push_str(&format!(
                "- {} → {} (strength {:.1})\n",
                edge.relation, other, edge.strength
            ));
        }
        Ok(out)
    }
}

// ─────────────────────────────────────────────
// recall
// ─────────────────────────────────────────────

/// Recall everything about a topic: events, entity, facts, relations.
pub struct RecallTool {
    toolset: Arc<MemoryToolset>,
}

impl RecallTool {
    pub fn new(toolset: Arc<MemoryToolset>) -> Self {
        Self { toolset }
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "recall"
    }

    fn description(&self) -> &str {
        "Recall everything memory holds about a topic: related events, the matching \
         entity with its facts, and its relationships."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "description": "The topic, name, or subject to recall"
                }
            },
            "required": ["topic"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let topic = require_string(&params, "topic")?;
        let result = self.toolset.retrieval().recall(&topic, 5)?;
        Ok(result.render(&topic))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
