//! SQLite storage layer for the memory system.
//!
//! One database per workspace, opened with WAL journaling so readers
//! and writers don't block each other. All operations are synchronous
//! and single-writer safe behind a mutex-guarded connection; the
//! process owns the file exclusively.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crewbot_core::config::schema::MemoryConfig;

use crate::embeddings::{cosine_similarity, pack_embedding, unpack_embedding};
use crate::models::{Edge, Entity, Event, ExtractionStatus, Fact, Learning, Sentiment, SummaryNode};

/// SQLite-based storage for events, entities, edges, facts, summary
/// nodes, and learnings.
pub struct MemoryStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl MemoryStore {
    /// Open (or create) the workspace database per config.
    pub fn open(config: &MemoryConfig, workspace: &Path) -> Result<Self> {
        Self::open_at(&workspace.join(&config.db_path))
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "cache_size", 10000)?;

        init_tables(&conn)?;
        info!(db = %db_path.display(), "memory store opened");

        Ok(MemoryStore {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Save an event. Returns its id.
    pub fn save_event(&self, event: &Event) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO events (
                id, timestamp, channel, direction, event_type, content,
                session_key, parent_event_id, person_id, tool_name,
                extraction_status, content_embedding, relevance_score,
                last_accessed, metadata
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                event.id,
                to_epoch(event.timestamp),
                event.channel,
                event.direction,
                event.event_type,
                event.content,
                event.session_key,
                event.parent_event_id,
                event.person_id,
                event.tool_name,
                event.extraction_status.as_str(),
                event.content_embedding.as_deref().map(pack_embedding),
                event.relevance_score,
                event.last_accessed.map(to_epoch),
                serde_json::to_string(&event.metadata)?,
            ],
        )?;
        debug!(event = %event.id, "event saved");
        Ok(event.id.clone())
    }

    /// Retrieve an event by id.
    pub fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        let conn = self.conn.lock().unwrap();
        let event = conn
            .query_row(
                "SELECT * FROM events WHERE id = ?1",
                params![event_id],
                row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    /// Events for a session, most recent first.
    pub fn get_events_by_session(
        &self,
        session_key: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE session_key = ?1
             ORDER BY timestamp DESC LIMIT ?2 OFFSET ?3",
        )?;
        let events = stmt
            .query_map(params![session_key, limit as i64, offset as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Recent events across all sessions, newest first.
    pub fn get_recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM events ORDER BY timestamp DESC LIMIT ?1")?;
        let events = stmt
            .query_map(params![limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Events awaiting extraction, oldest first.
    pub fn get_pending_events(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM events WHERE extraction_status = 'pending'
             ORDER BY timestamp ASC LIMIT ?1",
        )?;
        let events = stmt
            .query_map(params![limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    /// Update extraction status for an event.
    pub fn mark_event_extracted(&self, event_id: &str, status: ExtractionStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET extraction_status = ?1 WHERE id = ?2",
            params![status.as_str(), event_id],
        )?;
        Ok(())
    }

    /// Record an access: bump `last_accessed` on the event.
    pub fn touch_event_access(&self, event_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE events SET last_accessed = ?1 WHERE id = ?2",
            params![to_epoch(Utc::now()), event_id],
        )?;
        Ok(())
    }

    /// Search events by embedding similarity.
    ///
    /// Scans up to the 1000 most recent events with embeddings (optionally
    /// restricted to a session), scores by cosine similarity, and returns
    /// `(event, similarity)` pairs above the threshold, best first, ties
    /// broken by recency.
    pub fn search_events(
        &self,
        query_embedding: &[f32],
        session_key: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(Event, f64)>> {
        let conn = self.conn.lock().unwrap();

        let mut results: Vec<(Event, f64)> = Vec::new();
        let collect = |rows: &mut dyn Iterator<Item = rusqlite::Result<Event>>,
                       results: &mut Vec<(Event, f64)>|
         -> Result<()> {
            for event in rows {
                let event = event?;
                if let Some(embedding) = &event.content_embedding {
                    let similarity = cosine_similarity(query_embedding, embedding);
                    if similarity >= threshold {
                        results.push((event, similarity));
                    }
                }
            }
            Ok(())
        };

        if let Some(key) = session_key {
            let mut stmt = conn.prepare(
                "SELECT * FROM events
                 WHERE session_key = ?1 AND content_embedding IS NOT NULL
                 ORDER BY timestamp DESC LIMIT 1000",
            )?;
            let mut rows = stmt.query_map(params![key], row_to_event)?;
            collect(&mut rows, &mut results)?;
        } else {
            let mut stmt = conn.prepare(
                "SELECT * FROM events
                 WHERE content_embedding IS NOT NULL
                 ORDER BY timestamp DESC LIMIT 1000",
            )?;
            let mut rows = stmt.query_map([], row_to_event)?;
            collect(&mut rows, &mut results)?;
        }

        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.timestamp.cmp(&a.0.timestamp))
        });
        results.truncate(limit);
        Ok(results)
    }

    // =========================================================================
    // Entities
    // =========================================================================

    /// Save (or replace) an entity.
    pub fn save_entity(&self, entity: &Entity) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO entities (
                id, name, entity_type, aliases, description,
                name_embedding, description_embedding,
                source_event_ids, event_count, first_seen, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                entity.id,
                entity.name,
                entity.entity_type,
                serde_json::to_string(&entity.aliases)?,
                entity.description,
                entity.name_embedding.as_deref().map(pack_embedding),
                entity.description_embedding.as_deref().map(pack_embedding),
                serde_json::to_string(&entity.source_event_ids)?,
                entity.event_count,
                entity.first_seen.map(to_epoch),
                entity.last_seen.map(to_epoch),
            ],
        )?;
        Ok(entity.id.clone())
    }

    /// Update an existing entity in place.
    pub fn update_entity(&self, entity: &Entity) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE entities SET
                name = ?1, entity_type = ?2, aliases = ?3, description = ?4,
                name_embedding = ?5, description_embedding = ?6,
                source_event_ids = ?7, event_count = ?8, last_seen = ?9
             WHERE id = ?10",
            params![
                entity.name,
                entity.entity_type,
                serde_json::to_string(&entity.aliases)?,
                entity.description,
                entity.name_embedding.as_deref().map(pack_embedding),
                entity.description_embedding.as_deref().map(pack_embedding),
                serde_json::to_string(&entity.source_event_ids)?,
                entity.event_count,
                entity.last_seen.map(to_epoch),
                entity.id,
            ],
        )?;
        Ok(())
    }

    pub fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        let entity = conn
            .query_row(
                "SELECT * FROM entities WHERE id = ?1",
                params![entity_id],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    /// Find an entity by name or alias, case-insensitively.
    pub fn find_entity_by_name(&self, name: &str) -> Result<Option<Entity>> {
        let conn = self.conn.lock().unwrap();
        let entity = conn
            .query_row(
                "SELECT * FROM entities
                 WHERE LOWER(name) = LOWER(?1)
                    OR LOWER(aliases) LIKE LOWER(?2)
                 LIMIT 1",
                params![name, format!("%\"{}\"%", name)],
                row_to_entity,
            )
            .optional()?;
        Ok(entity)
    }

    /// Entities with similar name embeddings.
    pub fn get_similar_entities(
        &self,
        name_embedding: &[f32],
        entity_type: Option<&str>,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<(Entity, f64)>> {
        let conn = self.conn.lock().unwrap();

        let mut results: Vec<(Entity, f64)> = Vec::new();
        let mut score = |entity: Entity, results: &mut Vec<(Entity, f64)>| {
            if let Some(embedding) = &entity.name_embedding {
                let similarity = cosine_similarity(name_embedding, embedding);
                if similarity >= threshold {
                    results.push((entity, similarity));
                }
            }
        };

        if let Some(kind) = entity_type {
            let mut stmt = conn.prepare(
                "SELECT * FROM entities WHERE entity_type = ?1 AND name_embedding IS NOT NULL",
            )?;
            for entity in stmt.query_map(params![kind], row_to_entity)? {
                score(entity?, &mut results);
            }
        } else {
            let mut stmt =
                conn.prepare("SELECT * FROM entities WHERE name_embedding IS NOT NULL")?;
            for entity in stmt.query_map([], row_to_entity)? {
                score(entity?, &mut results);
            }
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(limit);
        Ok(results)
    }

    /// Delete an entity and its edges and facts.
    pub fn delete_entity(&self, entity_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM edges WHERE source_entity_id = ?1 OR target_entity_id = ?1",
            params![entity_id],
        )?;
        conn.execute(
            "DELETE FROM facts WHERE subject_entity_id = ?1 OR object_entity_id = ?1",
            params![entity_id],
        )?;
        conn.execute("DELETE FROM entities WHERE id = ?1", params![entity_id])?;
        Ok(())
    }

    /// Entities of one type, most-mentioned first.
    pub fn get_entities_by_type(&self, entity_type: &str, limit: usize) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM entities WHERE entity_type = ?1
             ORDER BY event_count DESC LIMIT ?2",
        )?;
        let entities = stmt
            .query_map(params![entity_type, limit as i64], row_to_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    /// All entities, most-mentioned first.
    pub fn get_all_entities(&self, limit: usize) -> Result<Vec<Entity>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM entities ORDER BY event_count DESC LIMIT ?1")?;
        let entities = stmt
            .query_map(params![limit as i64], row_to_entity)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entities)
    }

    // =========================================================================
    // Edges
    // =========================================================================

    pub fn save_edge(&self, edge: &Edge) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO edges (
                id, source_entity_id, target_entity_id, relation, relation_type,
                strength, source_event_ids, first_seen, last_seen
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                edge.id,
                edge.source_entity_id,
                edge.target_entity_id,
                edge.relation,
                edge.relation_type,
                edge.strength,
                serde_json::to_string(&edge.source_event_ids)?,
                edge.first_seen.map(to_epoch),
                edge.last_seen.map(to_epoch),
            ],
        )?;
        Ok(edge.id.clone())
    }

    /// Edges touching an entity, in either direction.
    pub fn get_edges_for_entity(&self, entity_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM edges
             WHERE source_entity_id = ?1 OR target_entity_id = ?1
             ORDER BY strength DESC",
        )?;
        let edges = stmt
            .query_map(params![entity_id], row_to_edge)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(edges)
    }

    // =========================================================================
    // Facts
    // =========================================================================

    pub fn save_fact(&self, fact: &Fact) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO facts (
                id, subject_entity_id, predicate, object_text, object_entity_id,
                fact_type, confidence, strength, source_event_ids, valid_from, valid_to
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                fact.id,
                fact.subject_entity_id,
                fact.predicate,
                fact.object_text,
                fact.object_entity_id,
                fact.fact_type,
                fact.confidence,
                fact.strength,
                serde_json::to_string(&fact.source_event_ids)?,
                fact.valid_from.map(to_epoch),
                fact.valid_to.map(to_epoch),
            ],
        )?;
        Ok(fact.id.clone())
    }

    /// Facts about a subject entity, newest first.
    pub fn get_facts_for_subject(&self, subject_entity_id: &str) -> Result<Vec<Fact>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM facts WHERE subject_entity_id = ?1 ORDER BY valid_from DESC",
        )?;
        let facts = stmt
            .query_map(params![subject_entity_id], row_to_fact)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(facts)
    }

    // =========================================================================
    // Summary nodes
    // =========================================================================

    pub fn save_summary_node(&self, node: &SummaryNode) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO summary_nodes (
                id, node_type, key, parent_id, summary, summary_embedding,
                events_since_update, last_updated
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                node.id,
                node.node_type,
                node.key,
                node.parent_id,
                node.summary,
                node.summary_embedding.as_deref().map(pack_embedding),
                node.events_since_update,
                node.last_updated.map(to_epoch),
            ],
        )?;
        Ok(())
    }

    pub fn get_summary_node(&self, key: &str) -> Result<Option<SummaryNode>> {
        let conn = self.conn.lock().unwrap();
        let node = conn
            .query_row(
                "SELECT * FROM summary_nodes WHERE key = ?1",
                params![key],
                row_to_summary_node,
            )
            .optional()?;
        Ok(node)
    }

    /// Nodes whose `events_since_update` crossed the staleness threshold.
    pub fn get_stale_summary_nodes(&self, threshold: i64, limit: usize) -> Result<Vec<SummaryNode>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM summary_nodes WHERE events_since_update >= ?1
             ORDER BY events_since_update DESC LIMIT ?2",
        )?;
        let nodes = stmt
            .query_map(params![threshold, limit as i64], row_to_summary_node)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Bump a node's staleness counter.
    pub fn increment_summary_staleness(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE summary_nodes SET events_since_update = events_since_update + 1 WHERE key = ?1",
            params![key],
        )?;
        Ok(())
    }

    // =========================================================================
    // Learnings
    // =========================================================================

    pub fn create_learning(&self, learning: &Learning) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO learnings (
                id, content, source, sentiment, confidence, tool_name,
                recommendation, superseded_by, content_embedding,
                created_at, updated_at, relevance_score, times_accessed, last_accessed
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                learning.id,
                learning.content,
                learning.source,
                learning.sentiment.as_str(),
                learning.confidence,
                learning.tool_name,
                learning.recommendation,
                learning.superseded_by,
                learning.content_embedding.as_deref().map(pack_embedding),
                to_epoch(learning.created_at),
                to_epoch(learning.updated_at),
                learning.relevance_score,
                learning.times_accessed,
                learning.last_accessed.map(to_epoch),
            ],
        )?;
        Ok(learning.id.clone())
    }

    pub fn get_learning(&self, learning_id: &str) -> Result<Option<Learning>> {
        let conn = self.conn.lock().unwrap();
        let learning = conn
            .query_row(
                "SELECT * FROM learnings WHERE id = ?1",
                params![learning_id],
                row_to_learning,
            )
            .optional()?;
        Ok(learning)
    }

    pub fn update_learning(&self, learning: &Learning) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE learnings SET
                content = ?1, sentiment = ?2, confidence = ?3, tool_name = ?4,
                recommendation = ?5, superseded_by = ?6, updated_at = ?7,
                relevance_score = ?8, times_accessed = ?9, last_accessed = ?10
             WHERE id = ?11",
            params![
                learning.content,
                learning.sentiment.as_str(),
                learning.confidence,
                learning.tool_name,
                learning.recommendation,
                learning.superseded_by,
                to_epoch(learning.updated_at),
                learning.relevance_score,
                learning.times_accessed,
                learning.last_accessed.map(to_epoch),
                learning.id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_learning(&self, learning_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM learnings WHERE id = ?1", params![learning_id])?;
        Ok(())
    }

    /// All learnings, optionally only the active (not superseded) ones,
    /// most relevant first.
    pub fn get_all_learnings(&self, active_only: bool) -> Result<Vec<Learning>> {
        let conn = self.conn.lock().unwrap();
        let sql = if active_only {
            "SELECT * FROM learnings WHERE superseded_by IS NULL ORDER BY relevance_score DESC"
        } else {
            "SELECT * FROM learnings ORDER BY relevance_score DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let learnings = stmt
            .query_map([], row_to_learning)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(learnings)
    }

    /// Active learnings above a relevance floor.
    pub fn get_high_relevance_learnings(&self, min_score: f64, limit: usize) -> Result<Vec<Learning>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM learnings
             WHERE superseded_by IS NULL AND relevance_score >= ?1
             ORDER BY relevance_score DESC LIMIT ?2",
        )?;
        let learnings = stmt
            .query_map(params![min_score, limit as i64], row_to_learning)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(learnings)
    }

    // =========================================================================
    // Statistics & maintenance
    // =========================================================================

    /// Per-table row counts plus `pending_extractions`.
    pub fn get_stats(&self) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stats = HashMap::new();

        for table in ["events", "entities", "edges", "facts", "topics", "summary_nodes", "learnings"] {
            let count: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            stats.insert(table.to_string(), count);
        }

        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE extraction_status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        stats.insert("pending_extractions".to_string(), pending);

        Ok(stats)
    }

    /// Reclaim space and defragment.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("VACUUM;")?;
        info!("memory database vacuumed");
        Ok(())
    }
}

// ─────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────

fn init_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            timestamp REAL NOT NULL,
            channel TEXT NOT NULL,
            direction TEXT NOT NULL,
            event_type TEXT NOT NULL,
            content TEXT NOT NULL,
            session_key TEXT NOT NULL,
            parent_event_id TEXT,
            person_id TEXT,
            tool_name TEXT,
            extraction_status TEXT DEFAULT 'pending',
            content_embedding BLOB,
            relevance_score REAL DEFAULT 1.0,
            last_accessed REAL,
            metadata TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_key);
        CREATE INDEX IF NOT EXISTS idx_events_extraction ON events(extraction_status);
        CREATE INDEX IF NOT EXISTS idx_events_channel ON events(channel);

        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            aliases TEXT,
            description TEXT,
            name_embedding BLOB,
            description_embedding BLOB,
            source_event_ids TEXT,
            event_count INTEGER DEFAULT 0,
            first_seen REAL,
            last_seen REAL
        );
        CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name);
        CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(entity_type);

        CREATE TABLE IF NOT EXISTS edges (
            id TEXT PRIMARY KEY,
            source_entity_id TEXT NOT NULL,
            target_entity_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            relation_type TEXT,
            strength REAL DEFAULT 0.5,
            source_event_ids TEXT,
            first_seen REAL,
            last_seen REAL,
            FOREIGN KEY (source_entity_id) REFERENCES entities(id),
            FOREIGN KEY (target_entity_id) REFERENCES entities(id)
        );
        CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_entity_id);
        CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_entity_id);

        CREATE TABLE IF NOT EXISTS facts (
            id TEXT PRIMARY KEY,
            subject_entity_id TEXT NOT NULL,
            predicate TEXT NOT NULL,
            object_text TEXT NOT NULL,
            object_entity_id TEXT,
            fact_type TEXT DEFAULT 'attribute',
            confidence REAL DEFAULT 0.8,
            strength REAL DEFAULT 1.0,
            source_event_ids TEXT,
            valid_from REAL,
            valid_to REAL,
            FOREIGN KEY (subject_entity_id) REFERENCES entities(id),
            FOREIGN KEY (object_entity_id) REFERENCES entities(id)
        );
        CREATE INDEX IF NOT EXISTS idx_facts_subject ON facts(subject_entity_id);

        CREATE TABLE IF NOT EXISTS topics (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            embedding BLOB,
            event_ids TEXT,
            first_seen REAL,
            last_seen REAL
        );

        CREATE TABLE IF NOT EXISTS summary_nodes (
            id TEXT PRIMARY KEY,
            node_type TEXT NOT NULL,
            key TEXT NOT NULL UNIQUE,
            parent_id TEXT,
            summary TEXT,
            summary_embedding BLOB,
            events_since_update INTEGER DEFAULT 0,
            last_updated REAL,
            FOREIGN KEY (parent_id) REFERENCES summary_nodes(id)
        );
        CREATE INDEX IF NOT EXISTS idx_summary_type ON summary_nodes(node_type);
        CREATE INDEX IF NOT EXISTS idx_summary_key ON summary_nodes(key);

        CREATE TABLE IF NOT EXISTS learnings (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            source TEXT NOT NULL,
            sentiment TEXT DEFAULT 'neutral',
            confidence REAL DEFAULT 0.8,
            tool_name TEXT,
            recommendation TEXT,
            superseded_by TEXT,
            content_embedding BLOB,
            created_at REAL,
            updated_at REAL,
            relevance_score REAL DEFAULT 1.0,
            times_accessed INTEGER DEFAULT 0,
            last_accessed REAL,
            FOREIGN KEY (superseded_by) REFERENCES learnings(id)
        );
        CREATE INDEX IF NOT EXISTS idx_learnings_source ON learnings(source);
        CREATE INDEX IF NOT EXISTS idx_learnings_relevance ON learnings(relevance_score);",
    )
}

// ─────────────────────────────────────────────
// Row conversion
// ─────────────────────────────────────────────

fn to_epoch(dt: DateTime<Utc>) -> f64 {
    dt.timestamp_millis() as f64 / 1000.0
}

fn from_epoch(epoch: f64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis((epoch * 1000.0) as i64).unwrap_or_else(Utc::now)
}

fn unpack_column(bytes: Option<Vec<u8>>) -> rusqlite::Result<Option<Vec<f32>>> {
    match bytes {
        Some(bytes) => unpack_embedding(&bytes)
            .map(Some)
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Blob,
                    Box::new(e),
                )
            }),
        None => Ok(None),
    }
}

fn json_vec(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok()).unwrap_or_default()
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let metadata: HashMap<String, String> = row
        .get::<_, Option<String>>("metadata")?
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();

    Ok(Event {
        id: row.get("id")?,
        timestamp: from_epoch(row.get("timestamp")?),
        channel: row.get("channel")?,
        direction: row.get("direction")?,
        event_type: row.get("event_type")?,
        content: row.get("content")?,
        session_key: row.get("session_key")?,
        parent_event_id: row.get("parent_event_id")?,
        person_id: row.get("person_id")?,
        tool_name: row.get("tool_name")?,
        extraction_status: ExtractionStatus::parse(&row.get::<_, String>("extraction_status")?),
        content_embedding: unpack_column(row.get("content_embedding")?)?,
        relevance_score: row.get("relevance_score")?,
        last_accessed: row.get::<_, Option<f64>>("last_accessed")?.map(from_epoch),
        metadata,
    })
}

fn row_to_entity(row: &Row) -> rusqlite::Result<Entity> {
    Ok(Entity {
        id: row.get("id")?,
        name: row.get("name")?,
        entity_type: row.get("entity_type")?,
        aliases: json_vec(row.get("aliases")?),
        description: row.get::<_, Option<String>>("description")?.unwrap_or_default(),
        name_embedding: unpack_column(row.get("name_embedding")?)?,
        description_embedding: unpack_column(row.get("description_embedding")?)?,
        source_event_ids: json_vec(row.get("source_event_ids")?),
        event_count: row.get::<_, Option<i64>>("event_count")?.unwrap_or(0),
        first_seen: row.get::<_, Option<f64>>("first_seen")?.map(from_epoch),
        last_seen: row.get::<_, Option<f64>>("last_seen")?.map(from_epoch),
    })
}

fn row_to_edge(row: &Row) -> rusqlite::Result<Edge> {
    Ok(Edge {
        id: row.get("id")?,
        source_entity_id: row.get("source_entity_id")?,
        target_entity_id: row.get("target_entity_id")?,
        relation: row.get("relation")?,
        relation_type: row.get::<_, Option<String>>("relation_type")?.unwrap_or_default(),
        strength: row.get::<_, Option<f64>>("strength")?.unwrap_or(0.5),
        source_event_ids: json_vec(row.get("source_event_ids")?),
        first_seen: row.get::<_, Option<f64>>("first_seen")?.map(from_epoch),
        last_seen: row.get::<_, Option<f64>>("last_seen")?.map(from_epoch),
    })
}

fn row_to_fact(row: &Row) -> rusqlite::Result<Fact> {
    Ok(Fact {
        id: row.get("id")?,
        subject_entity_id: row.get("subject_entity_id")?,
        predicate: row.get("predicate")?,
        object_text: row.get("object_text")?,
        object_entity_id: row.get("object_entity_id")?,
        fact_type: row.get::<_, Option<String>>("fact_type")?.unwrap_or_default(),
        confidence: row.get::<_, Option<f64>>("confidence")?.unwrap_or(0.8),
        strength: row.get::<_, Option<f64>>("strength")?.unwrap_or(1.0),
        source_event_ids: json_vec(row.get("source_event_ids")?),
        valid_from: row.get::<_, Option<f64>>("valid_from")?.map(from_epoch),
        valid_to: row.get::<_, Option<f64>>("valid_to")?.map(from_epoch),
    })
}

fn row_to_summary_node(row: &Row) -> rusqlite::Result<SummaryNode> {
    Ok(SummaryNode {
        id: row.get("id")?,
        node_type: row.get("node_type")?,
        key: row.get("key")?,
        parent_id: row.get("parent_id")?,
        summary: row.get::<_, Option<String>>("summary")?.unwrap_or_default(),
        summary_embedding: unpack_column(row.get("summary_embedding")?)?,
        events_since_update: row.get::<_, Option<i64>>("events_since_update")?.unwrap_or(0),
        last_updated: row.get::<_, Option<f64>>("last_updated")?.map(from_epoch),
    })
}

fn row_to_learning(row: &Row) -> rusqlite::Result<Learning> {
    Ok(Learning {
        id: row.get("id")?,
        content: row.get("content")?,
        source: row.get("source")?,
        sentiment: Sentiment::parse(&row.get::<_, Option<String>>("sentiment")?.unwrap_or_default()),
        confidence: row.get::<_, Option<f64>>("confidence")?.unwrap_or(0.8),
        tool_name: row.get("tool_name")?,
        recommendation: row.get("recommendation")?,
        superseded_by: row.get("superseded_by")?,
        content_embedding: unpack_column(row.get("content_embedding")?)?,
        created_at: row
            .get::<_, Option<f64>>("created_at")?
            .map(from_epoch)
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, Option<f64>>("updated_at")?
            .map(from_epoch)
            .unwrap_or_else(Utc::now),
        relevance_score: row.get::<_, Option<f64>>("relevance_score")?.unwrap_or(1.0),
        times_accessed: row.get::<_, Option<i64>>("times_accessed")?.unwrap_or(0),
        last_accessed: row.get::<_, Option<f64>>("last_accessed")?.map(from_epoch),
    })
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
