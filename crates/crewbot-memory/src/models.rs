//! Data models for the memory system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Extraction lifecycle of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Complete,
    Failed,
    Skipped,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Complete => "complete",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> ExtractionStatus {
        match s {
            "complete" => ExtractionStatus::Complete,
            "failed" => ExtractionStatus::Failed,
            "skipped" => ExtractionStatus::Skipped,
            _ => ExtractionStatus::Pending,
        }
    }
}

/// Sentiment attached to a learning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
        }
    }

    pub fn parse(s: &str) -> Sentiment {
        match s {
            "positive" => Sentiment::Positive,
            "negative" => Sentiment::Negative,
            _ => Sentiment::Neutral,
        }
    }
}

/// Immutable record of a single interaction.
///
/// Owned by the store; never mutated after write except
/// `extraction_status`, `last_accessed`, and `relevance_score`.
#[derive(Clone, Debug)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    /// "inbound" or "outbound".
    pub direction: String,
    /// "message", "tool_call", "system", …
    pub event_type: String,
    pub content: String,
    pub session_key: String,
    pub parent_event_id: Option<String>,
    pub person_id: Option<String>,
    pub tool_name: Option<String>,
    pub extraction_status: ExtractionStatus,
    pub content_embedding: Option<Vec<f32>>,
    pub relevance_score: f64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new pending event.
    pub fn new(
        channel: impl Into<String>,
        direction: impl Into<String>,
        event_type: impl Into<String>,
        content: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        Event {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            channel: channel.into(),
            direction: direction.into(),
            event_type: event_type.into(),
            content: content.into(),
            session_key: session_key.into(),
            parent_event_id: None,
            person_id: None,
            tool_name: None,
            extraction_status: ExtractionStatus::Pending,
            content_embedding: None,
            relevance_score: 1.0,
            last_accessed: None,
            metadata: HashMap::new(),
        }
    }
}

/// A person, organization, location, concept, or tool.
///
/// Upsert-by-name: a new extraction merges into an existing entity when
/// the lowercased name matches the name or any alias.
#[derive(Clone, Debug)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub entity_type: String,
    pub aliases: Vec<String>,
    pub description: String,
    pub name_embedding: Option<Vec<f32>>,
    pub description_embedding: Option<Vec<f32>>,
    pub source_event_ids: Vec<String>,
    pub event_count: i64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Entity {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            entity_type: entity_type.into(),
            aliases: Vec::new(),
            description: String::new(),
            name_embedding: None,
            description_embedding: None,
            source_event_ids: Vec::new(),
            event_count: 0,
            first_seen: Some(now),
            last_seen: Some(now),
        }
    }

    /// Case-insensitive match against the name or any alias.
    pub fn matches_name(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.name.to_lowercase() == lower
            || self.aliases.iter().any(|a| a.to_lowercase() == lower)
    }
}

/// Directed relation between two entities.
#[derive(Clone, Debug)]
pub struct Edge {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub relation: String,
    pub relation_type: String,
    pub strength: f64,
    pub source_event_ids: Vec<String>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Edge {
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Edge {
            id: Uuid::new_v4().to_string(),
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            relation: relation.into(),
            relation_type: "association".to_string(),
            strength: 0.5,
            source_event_ids: Vec::new(),
            first_seen: Some(now),
            last_seen: Some(now),
        }
    }
}

/// Subject–predicate–object triplet. Facts are additive: contradictions
/// are represented by newer facts, never by overwriting.
#[derive(Clone, Debug)]
pub struct Fact {
    pub id: String,
    pub subject_entity_id: String,
    pub predicate: String,
    pub object_text: String,
    pub object_entity_id: Option<String>,
    pub fact_type: String,
    pub confidence: f64,
    pub strength: f64,
    pub source_event_ids: Vec<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl Fact {
    pub fn new(
        subject_entity_id: impl Into<String>,
        predicate: impl Into<String>,
        object_text: impl Into<String>,
    ) -> Self {
        Fact {
            id: Uuid::new_v4().to_string(),
            subject_entity_id: subject_entity_id.into(),
            predicate: predicate.into(),
            object_text: object_text.into(),
            object_entity_id: None,
            fact_type: "attribute".to_string(),
            confidence: 0.8,
            strength: 1.0,
            source_event_ids: Vec::new(),
            valid_from: Some(Utc::now()),
            valid_to: None,
        }
    }
}

/// A hierarchical, lazily-refreshed digest of a slice of memory.
///
/// The distinguished node with key `user_preferences` aggregates
/// learnings.
#[derive(Clone, Debug)]
pub struct SummaryNode {
    pub id: String,
    pub node_type: String,
    pub key: String,
    pub parent_id: Option<String>,
    pub summary: String,
    pub summary_embedding: Option<Vec<f32>>,
    pub events_since_update: i64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SummaryNode {
    pub fn new(node_type: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        SummaryNode {
            id: key.clone(),
            node_type: node_type.into(),
            key,
            parent_id: None,
            summary: String::new(),
            summary_embedding: None,
            events_since_update: 0,
            last_updated: Some(Utc::now()),
        }
    }
}

/// A durable, decaying user preference or correction.
#[derive(Clone, Debug)]
pub struct Learning {
    pub id: String,
    pub content: String,
    pub source: String,
    pub sentiment: Sentiment,
    pub confidence: f64,
    pub tool_name: Option<String>,
    pub recommendation: Option<String>,
    pub superseded_by: Option<String>,
    pub content_embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub relevance_score: f64,
    pub times_accessed: i64,
    pub last_accessed: Option<DateTime<Utc>>,
}

impl Learning {
    pub fn new(content: impl Into<String>, source: impl Into<String>, sentiment: Sentiment) -> Self {
        let now = Utc::now();
        Learning {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            source: source.into(),
            sentiment,
            confidence: 0.8,
            tool_name: None,
            recommendation: None,
            superseded_by: None,
            content_embedding: None,
            created_at: now,
            updated_at: now,
            relevance_score: 1.0,
            times_accessed: 0,
            last_accessed: None,
        }
    }

    /// Whether the learning is still active (not superseded).
    pub fn is_active(&self) -> bool {
        self.superseded_by.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_defaults() {
        let event = Event::new("telegram", "inbound", "message", "hello", "room:general");
        assert_eq!(event.extraction_status, ExtractionStatus::Pending);
        assert_eq!(event.relevance_score, 1.0);
        assert!(event.content_embedding.is_none());
        assert!(!event.id.is_empty());
    }

    #[test]
    fn test_extraction_status_round_trip() {
        for status in [
            ExtractionStatus::Pending,
            ExtractionStatus::Complete,
            ExtractionStatus::Failed,
            ExtractionStatus::Skipped,
        ] {
            assert_eq!(ExtractionStatus::parse(status.as_str()), status);
        }
        assert_eq!(ExtractionStatus::parse("garbage"), ExtractionStatus::Pending);
    }

    #[test]
    fn test_entity_matches_name_and_aliases() {
        let mut entity = Entity::new("Alice Johnson", "person");
        entity.aliases.push("AJ".to_string());

        assert!(entity.matches_name("alice johnson"));
        assert!(entity.matches_name("aj"));
        assert!(!entity.matches_name("bob"));
    }

    #[test]
    fn test_learning_active() {
        let mut learning = Learning::new("prefers short answers", "user_feedback", Sentiment::Neutral);
        assert!(learning.is_active());
        learning.superseded_by = Some("other-id".to_string());
        assert!(!learning.is_active());
    }

    #[test]
    fn test_sentiment_parse() {
        assert_eq!(Sentiment::parse("positive"), Sentiment::Positive);
        assert_eq!(Sentiment::parse("negative"), Sentiment::Negative);
        assert_eq!(Sentiment::parse("anything"), Sentiment::Neutral);
    }
}
