//! Read-side surface over the memory store, used by the agent's memory
//! tools and context assembly.

use crate::embeddings::Embedder;
use crate::models::{Edge, Entity, Event, Fact};
use crate::store::MemoryStore;

/// A search hit with its similarity score.
#[derive(Debug)]
pub struct SearchHit {
    pub event: Event,
    pub similarity: f64,
}

/// Semantic and graph retrieval over stored memory.
pub struct MemoryRetrieval<'a> {
    store: &'a MemoryStore,
    embedder: &'a dyn Embedder,
}

impl<'a> MemoryRetrieval<'a> {
    pub fn new(store: &'a MemoryStore, embedder: &'a dyn Embedder) -> Self {
        MemoryRetrieval { store, embedder }
    }

    /// Semantic search over events by text query.
    pub fn search(
        &self,
        query: &str,
        session_key: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed(query);
        let results = self
            .store
            .search_events(&query_embedding, session_key, limit, threshold)?;

        // Accessing a result keeps it warm.
        for (event, _) in &results {
            let _ = self.store.touch_event_access(&event.id);
        }

        Ok(results
            .into_iter()
            .map(|(event, similarity)| SearchHit { event, similarity })
            .collect())
    }

    pub fn get_entity(&self, entity_id: &str) -> anyhow::Result<Option<Entity>> {
        self.store.get_entity(entity_id)
    }

    pub fn get_entity_by_name(&self, name: &str) -> anyhow::Result<Option<Entity>> {
        self.store.find_entity_by_name(name)
    }

    /// Facts about an entity, newest first.
    pub fn get_entity_facts(&self, entity_id: &str) -> anyhow::Result<Vec<Fact>> {
        self.store.get_facts_for_subject(entity_id)
    }

    /// Relationships touching an entity, strongest first.
    pub fn get_relationships(&self, entity_id: &str) -> anyhow::Result<Vec<Edge>> {
        self.store.get_edges_for_entity(entity_id)
    }

    /// Recall everything memory holds about a topic: top events plus
    /// any entity matching the topic by name, with its facts and edges.
    pub fn recall(&self, topic: &str, limit: usize) -> anyhow::Result<RecallResult> {
        let hits = self.search(topic, None, limit, 0.1)?;

        let entity = self.get_entity_by_name(topic)?;
        let (facts, edges) = match &entity {
            Some(entity) => (
                self.get_entity_facts(&entity.id)?,
                self.get_relationships(&entity.id)?,
            ),
            None => (Vec::new(), Vec::new()),
        };

        Ok(RecallResult {
            hits,
            entity,
            facts,
            edges,
        })
    }

    /// Recent events across all sessions, newest first.
    pub fn get_recent_events(&self, limit: usize) -> anyhow::Result<Vec<Event>> {
        self.store.get_recent_events(limit)
    }

    pub fn get_all_entities(&self, limit: usize) -> anyhow::Result<Vec<Entity>> {
        self.store.get_all_entities(limit)
    }
}

/// Everything recalled about one topic.
#[derive(Debug)]
pub struct RecallResult {
    pub hits: Vec<SearchHit>,
    pub entity: Option<Entity>,
    pub facts: Vec<Fact>,
    pub edges: Vec<Edge>,
}

impl RecallResult {
    /// Human-readable rendering for tool output.
    pub fn render(&self, topic: &str) -> String {
        let mut out = format!("Recall for '{topic}':\n");

        if let Some(entity) = &self.entity {
            out.push_str(&format!(
                "\nEntity: {} ({}), mentioned in {} event(s)\n",
                entity.name, entity.entity_type, entity.event_count
            ));
            if !entity.description.is_empty() {
                out.push_str(&format!("  {}\n", entity.description));
            }
        }

        if !self.facts.is_empty() {
            out.push_str("\nFacts:\n");
            for fact in self.facts.iter().take(10) {
                out.push_str(&format!("- {} {}\n", fact.predicate, fact.object_text));
            }
        }

        if !self.edges.is_empty() {
            out.push_str(&format!("\nRelationships: {}\n", self.edges.len()));
        }

        if !self.hits.is_empty() {
            out.push_str("\nRelated events:\n");
            for hit in self.hits.iter().take(5) {
                out.push_str(&format!(
                    "- [{:.2}] {}\n",
                    hit.similarity,
                    crewbot_core::utils::truncate_string(&hit.event.content, 100)
                ));
            }
        }

        if self.entity.is_none() && self.hits.is_empty() {
            out.push_str("\nNothing found.\n");
        }

        out
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
