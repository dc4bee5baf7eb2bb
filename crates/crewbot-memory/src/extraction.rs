//! Entity extraction: the `Extractor` seam plus a heuristic fallback.
//!
//! Model-backed extractors (local NER, API) plug in behind the trait;
//! the built-in `PatternExtractor` finds capitalized names, emails, and
//! tool mentions without any model, so extraction still produces a
//! usable graph in bare deployments.

use async_trait::async_trait;
use regex::Regex;

use crate::models::{Edge, Entity, Event, Fact};

/// Closed set of entity types every extractor must normalize into.
pub const ENTITY_TYPES: &[&str] = &["person", "organization", "location", "concept", "tool"];

/// What an extractor found in one event.
#[derive(Debug, Default)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub edges: Vec<Edge>,
    pub facts: Vec<Fact>,
}

/// Entity extractor seam. Implementations must return only entities
/// present in `event.content` and perform no I/O beyond the model call.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, event: &Event) -> anyhow::Result<ExtractionResult>;
}

/// Normalize a raw extractor label to the closed type set.
pub fn normalize_entity_type(raw: &str) -> &'static str {
    match raw.to_lowercase().as_str() {
        "person" | "people" | "name" | "per" => "person",
        "organization" | "org" | "company" | "team" => "organization",
        "location" | "place" | "city" | "country" | "loc" | "gpe" => "location",
        "tool" | "software" | "app" | "product" => "tool",
        _ => "concept",
    }
}

// ─────────────────────────────────────────────
// PatternExtractor
// ─────────────────────────────────────────────

/// Heuristic extractor: capitalized word runs become person/concept
/// candidates, known tool names are tagged, and "X is/works at Y"
/// shapes become facts.
pub struct PatternExtractor {
    name_regex: Regex,
    tool_names: Vec<&'static str>,
}

impl PatternExtractor {
    pub fn new() -> Self {
        PatternExtractor {
            // Two+ capitalized words in a row, mid-sentence.
            name_regex: Regex::new(r"\b([A-Z][a-z]+(?:\s+[A-Z][a-z]+)+)\b").unwrap(),
            tool_names: vec![
                "git", "docker", "kubernetes", "postgres", "redis", "sqlite", "telegram",
                "discord", "slack", "rust", "python",
            ],
        }
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for PatternExtractor {
    async fn extract(&self, event: &Event) -> anyhow::Result<ExtractionResult> {
        let mut result = ExtractionResult::default();
        let content = &event.content;
        let lower = content.to_lowercase();

        // Capitalized name runs → person candidates.
        let mut seen = std::collections::HashSet::new();
        for cap in self.name_regex.captures_iter(content) {
            let name = cap[1].to_string();
            // Sentence-initial single matches produce junk like "The
            // Problem"; require the run not to start the content.
            if content.starts_with(&name) && !seen.is_empty() {
                continue;
            }
            if seen.insert(name.to_lowercase()) {
                let mut entity = Entity::new(&name, normalize_entity_type("person"));
                entity.source_event_ids.push(event.id.clone());
                entity.event_count = 1;
                result.entities.push(entity);
            }
        }

        // Known tool mentions.
        for tool in &self.tool_names {
            if lower.split(|c: char| !c.is_alphanumeric()).any(|w| w == *tool)
                && seen.insert(tool.to_string())
            {
                let mut entity = Entity::new(*tool, normalize_entity_type("tool"));
                entity.source_event_ids.push(event.id.clone());
                entity.event_count = 1;
                result.entities.push(entity);
            }
        }

        // "X works at Y" → edge + fact between extracted entities.
        if let Some(pos) = lower.find(" works at ") {
            let before = &content[..pos];
            let after = &content[pos + " works at ".len()..];
            let subject = result
                .entities
                .iter()
                .find(|e| before.contains(&e.name))
                .map(|e| e.id.clone());
            let object_name = after
                .split(|c: char| c == '.' || c == ',' || c == ';')
                .next()
                .unwrap_or("")
                .trim()
                .to_string();

            if let (Some(subject_id), false) = (subject, object_name.is_empty()) {
                let mut org = Entity::new(&object_name, normalize_entity_type("organization"));
                org.source_event_ids.push(event.id.clone());
                org.event_count = 1;
                let org_id = org.id.clone();
                result.entities.push(org);

                let mut edge = Edge::new(&subject_id, &org_id, "works_at");
                edge.relation_type = "employment".to_string();
                edge.source_event_ids.push(event.id.clone());
                result.edges.push(edge);

                let mut fact = Fact::new(&subject_id, "works_at", &object_name);
                fact.object_entity_id = Some(org_id);
                fact.source_event_ids.push(event.id.clone());
                result.facts.push(fact);
            }
        }

        Ok(result)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
