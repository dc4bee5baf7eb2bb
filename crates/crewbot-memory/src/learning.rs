//! Feedback detection and the learning lifecycle.
//!
//! Stage 1 is free: regex patterns over user messages catch the bulk of
//! corrections, preferences, and reactions. Detected feedback becomes a
//! `Learning` that decays daily, boosts on access, and supersedes older
//! contradictory learnings.

use chrono::Utc;
use regex::Regex;
use tracing::{debug, info};

use crate::models::{Learning, Sentiment};
use crate::store::MemoryStore;

/// Confidence assigned to regex-detected feedback.
const REGEX_CONFIDENCE: f64 = 0.7;
/// Word-overlap similarity above which opposite sentiments contradict.
const CONTRADICTION_SIMILARITY: f64 = 0.7;
/// Learnings below this relevance are removed during decay.
const REMOVAL_FLOOR: f64 = 0.1;
/// Relevance multiplier applied on access.
const ACCESS_BOOST: f64 = 1.2;

/// What kind of feedback a message carried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackKind {
    Correction,
    Preference,
    Positive,
    Negative,
}

impl FeedbackKind {
    fn sentiment(&self) -> Sentiment {
        match self {
            FeedbackKind::Correction | FeedbackKind::Negative => Sentiment::Negative,
            FeedbackKind::Preference => Sentiment::Neutral,
            FeedbackKind::Positive => Sentiment::Positive,
        }
    }
}

/// A detected piece of feedback.
#[derive(Clone, Debug)]
pub struct FeedbackDetection {
    pub kind: FeedbackKind,
    pub confidence: f64,
    /// The meaningful part extracted from the message.
    pub content: String,
}

/// Detects feedback in user messages using regex patterns — zero cost,
/// catches the bulk without any API call.
pub struct FeedbackDetector {
    patterns: Vec<(FeedbackKind, Regex)>,
    correction_extract: Regex,
    preference_extract: Regex,
}

impl FeedbackDetector {
    pub fn new() -> Self {
        let mut patterns = Vec::new();
        let mut add = |kind: FeedbackKind, pattern: &str| {
            patterns.push((kind, Regex::new(pattern).expect("valid feedback pattern")));
        };

        add(FeedbackKind::Correction, r"(?i)actually[,.]?\s+(?:i|you|that|it|this)");
        add(FeedbackKind::Correction, r"(?i)no[,.]?\s+(?:that'?s|it is|you're|wrong)");
        add(FeedbackKind::Correction, r"(?i)\b(wrong|incorrect|not right|mistake)\b");
        add(FeedbackKind::Correction, r"(?i)\bI meant\b");
        add(FeedbackKind::Correction, r"(?i)\bshould be\b");
        add(FeedbackKind::Correction, r"(?i)\bnot quite\b");
        add(FeedbackKind::Correction, r"(?i)\bthat's not\b");

        add(FeedbackKind::Preference, r"(?i)\bI prefer\b");
        add(FeedbackKind::Preference, r"(?i)\bI like\b");
        add(FeedbackKind::Preference, r"(?i)\bI want\b");
        add(FeedbackKind::Preference, r"(?i)\bI need\b");
        add(FeedbackKind::Preference, r"(?i)\balways use\b");
        add(FeedbackKind::Preference, r"(?i)\bnever use\b");
        add(FeedbackKind::Preference, r"(?i)\bmake sure to\b");
        add(FeedbackKind::Preference, r"(?i)\bgive me\b");

        add(FeedbackKind::Positive, r"(?i)^perfect!?$");
        add(FeedbackKind::Positive, r"(?i)^exactly!?$");
        add(FeedbackKind::Positive, r"(?i)^that's right!?$");
        add(FeedbackKind::Positive, r"(?i)^great!?$");
        add(FeedbackKind::Positive, r"(?i)^awesome!?$");
        add(FeedbackKind::Positive, r"(?i)^thank you[!,.]? that");

        add(FeedbackKind::Negative, r"(?i)^no[,.!]?$");
        add(FeedbackKind::Negative, r"(?i)^that's wrong");
        add(FeedbackKind::Negative, r"(?i)^not correct");
        add(FeedbackKind::Negative, r"(?i)^bad\b");
        add(FeedbackKind::Negative, r"(?i)^terrible\b");

        FeedbackDetector {
            patterns,
            correction_extract: Regex::new(r"(?i)(?:should be|actually[,.]?\s+|I meant\s+)(.+)")
                .unwrap(),
            preference_extract: Regex::new(
                r"(?i)(?:I (?:prefer|like|want|need)|always use|never use|give me)\s+(.+)",
            )
            .unwrap(),
        }
    }

    /// Detect feedback in a message. Returns `None` for ordinary text.
    pub fn detect(&self, text: &str) -> Option<FeedbackDetection> {
        let trimmed = text.trim();
        if trimmed.len() < 3 {
            return None;
        }

        for (kind, regex) in &self.patterns {
            if regex.is_match(trimmed) {
                return Some(FeedbackDetection {
                    kind: *kind,
                    confidence: REGEX_CONFIDENCE,
                    content: self.extract_content(trimmed, *kind),
                });
            }
        }
        None
    }

    /// Pull the meaningful span out of a feedback message.
    fn extract_content(&self, text: &str, kind: FeedbackKind) -> String {
        let extracted = match kind {
            FeedbackKind::Correction => self
                .correction_extract
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string()),
            FeedbackKind::Preference => self
                .preference_extract
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string()),
            _ => None,
        };

        extracted.unwrap_or_else(|| {
            if text.len() > 200 {
                text.chars().take(200).collect()
            } else {
                text.to_string()
            }
        })
    }
}

impl Default for FeedbackDetector {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// LearningManager
// ─────────────────────────────────────────────

/// Decay/removal statistics from one decay pass.
#[derive(Debug, Default)]
pub struct DecayStats {
    pub total: usize,
    pub decayed: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Manages the learning lifecycle: detect feedback, create learnings,
/// supersede contradictions, apply decay, and boost on access.
pub struct LearningManager<'a> {
    store: &'a MemoryStore,
    detector: FeedbackDetector,
    /// Daily relevance decay rate.
    decay_rate: f64,
}

impl<'a> LearningManager<'a> {
    pub fn new(store: &'a MemoryStore, decay_rate: f64) -> Self {
        LearningManager {
            store,
            detector: FeedbackDetector::new(),
            decay_rate,
        }
    }

    /// Process a user message: if it carries feedback, create a learning
    /// (handling contradictions) and return it.
    pub fn process_message(&self, message: &str) -> anyhow::Result<Option<Learning>> {
        let Some(detection) = self.detector.detect(message) else {
            return Ok(None);
        };

        let mut learning = Learning::new(
            detection.content.clone(),
            "user_feedback",
            detection.kind.sentiment(),
        );
        learning.confidence = detection.confidence;
        learning.recommendation = Some(recommendation_for(&detection));

        self.supersede_contradictions(&mut learning)?;
        self.store.create_learning(&learning)?;

        info!(learning = %learning.id, kind = ?detection.kind, "learning created from feedback");
        Ok(Some(learning))
    }

    /// Mark active learnings that contradict the new one as superseded.
    ///
    /// A contradiction is >70 % word-overlap similarity with the
    /// opposite sentiment; the new learning starts back at full
    /// relevance.
    fn supersede_contradictions(&self, new_learning: &mut Learning) -> anyhow::Result<bool> {
        let mut found = false;
        for mut old in self.store.get_all_learnings(true)? {
            let similarity = word_overlap(&new_learning.content, &old.content);
            if similarity > CONTRADICTION_SIMILARITY && old.sentiment != new_learning.sentiment {
                old.superseded_by = Some(new_learning.id.clone());
                old.updated_at = Utc::now();
                self.store.update_learning(&old)?;
                new_learning.relevance_score = 1.0;
                info!(old = %old.id, new = %new_learning.id, "contradictory learning superseded");
                found = true;
            }
        }
        Ok(found)
    }

    /// Apply relevance decay to all active learnings:
    /// `score *= (1 − rate)^days_since_update`, removing those that fall
    /// below the floor. Absent access, scores are non-increasing.
    pub fn apply_decay(&self) -> anyhow::Result<DecayStats> {
        let learnings = self.store.get_all_learnings(true)?;
        let now = Utc::now();

        let mut stats = DecayStats {
            total: learnings.len(),
            ..Default::default()
        };

        for mut learning in learnings {
            let days_old = (now - learning.updated_at).num_days();
            if days_old < 1 {
                stats.unchanged += 1;
                continue;
            }

            let decay_factor = (1.0 - self.decay_rate).powi(days_old as i32);
            learning.relevance_score *= decay_factor;

            if learning.relevance_score < REMOVAL_FLOOR {
                self.store.delete_learning(&learning.id)?;
                stats.removed += 1;
                debug!(learning = %learning.id, "stale learning removed");
            } else {
                learning.updated_at = now;
                self.store.update_learning(&learning)?;
                stats.decayed += 1;
            }
        }

        Ok(stats)
    }

    /// Boost a learning's relevance when it is used:
    /// `min(1.0, score × 1.2)`, with access bookkeeping.
    pub fn boost_on_access(&self, learning_id: &str) -> anyhow::Result<Option<Learning>> {
        let Some(mut learning) = self.store.get_learning(learning_id)? else {
            return Ok(None);
        };

        learning.relevance_score = (learning.relevance_score * ACCESS_BOOST).min(1.0);
        learning.times_accessed += 1;
        learning.last_accessed = Some(Utc::now());
        learning.updated_at = Utc::now();
        self.store.update_learning(&learning)?;

        Ok(Some(learning))
    }

    /// Most relevant active learnings.
    pub fn relevant_learnings(&self, limit: usize) -> anyhow::Result<Vec<Learning>> {
        self.store.get_high_relevance_learnings(0.5, limit)
    }
}

/// Word-overlap (Jaccard) similarity between two texts.
pub fn word_overlap(a: &str, b: &str) -> f64 {
    let words_a: std::collections::HashSet<String> =
        a.to_lowercase().split_whitespace().map(String::from).collect();
    let words_b: std::collections::HashSet<String> =
        b.to_lowercase().split_whitespace().map(String::from).collect();

    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

fn recommendation_for(detection: &FeedbackDetection) -> String {
    match detection.kind {
        FeedbackKind::Preference => format!("Apply this preference: {}", detection.content),
        FeedbackKind::Correction => format!("Avoid this mistake: {}", detection.content),
        FeedbackKind::Positive => "Continue this approach".to_string(),
        FeedbackKind::Negative => format!("Note: {}", detection.content),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn make_store() -> (MemoryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = MemoryStore::open_at(&dir.path().join("memory.db")).unwrap();
        (store, dir)
    }

    // ── Detection ──

    #[test]
    fn test_detect_preference() {
        let detector = FeedbackDetector::new();
        let detection = detector.detect("I prefer short responses.").unwrap();
        assert_eq!(detection.kind, FeedbackKind::Preference);
        assert!((detection.confidence - 0.7).abs() < 1e-9);
        assert_eq!(detection.content, "short responses.");
    }

    #[test]
    fn test_detect_correction() {
        let detector = FeedbackDetector::new();
        let detection = detector.detect("Actually, I wanted the CSV format").unwrap();
        assert_eq!(detection.kind, FeedbackKind::Correction);
    }

    #[test]
    fn test_detect_positive_and_negative() {
        let detector = FeedbackDetector::new();
        assert_eq!(detector.detect("Perfect!").unwrap().kind, FeedbackKind::Positive);
        assert_eq!(detector.detect("no").unwrap().kind, FeedbackKind::Negative);
    }

    #[test]
    fn test_ordinary_text_is_not_feedback() {
        let detector = FeedbackDetector::new();
        assert!(detector.detect("what's the weather tomorrow?").is_none());
        assert!(detector.detect("ok").is_none());
    }

    #[test]
    fn test_content_extraction_preference() {
        let detector = FeedbackDetector::new();
        let detection = detector.detect("always use tabs for indentation").unwrap();
        assert_eq!(detection.content, "tabs for indentation");
    }

    // ── Lifecycle ──

    #[test]
    fn test_process_message_creates_learning() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let learning = manager
            .process_message("I prefer short responses.")
            .unwrap()
            .unwrap();

        assert_eq!(learning.sentiment, Sentiment::Neutral);
        assert!(learning.recommendation.as_ref().unwrap().contains("preference"));
        assert_eq!(store.get_all_learnings(true).unwrap().len(), 1);
    }

    #[test]
    fn test_process_plain_message_creates_nothing() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);
        assert!(manager.process_message("how's the launch going?").unwrap().is_none());
        assert!(store.get_all_learnings(true).unwrap().is_empty());
    }

    #[test]
    fn test_contradiction_supersession() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        // Seed an existing positive learning with nearly identical words.
        let old = Learning::new("give me detailed explanations always", "user_feedback", Sentiment::Positive);
        store.create_learning(&old).unwrap();

        // Same vocabulary, negative sentiment → contradiction.
        let mut contradicting = Learning::new(
            "give me detailed explanations always",
            "user_feedback",
            Sentiment::Negative,
        );
        contradicting.relevance_score = 0.6;
        let manager_found = manager.supersede_contradictions(&mut contradicting).unwrap();
        store.create_learning(&contradicting).unwrap();

        assert!(manager_found);
        // New learning boosted back to full relevance.
        assert_eq!(contradicting.relevance_score, 1.0);

        // Exactly one of the pair is active.
        let active = store.get_all_learnings(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, contradicting.id);

        let superseded = store.get_learning(&old.id).unwrap().unwrap();
        assert_eq!(superseded.superseded_by.as_deref(), Some(contradicting.id.as_str()));
    }

    #[test]
    fn test_preference_flip_scenario() {
        // "I prefer short responses." then "Actually, give me detailed
        // explanations." → both are learnings; they don't share enough
        // vocabulary to contradict, so both stay active with the newer
        // one carrying the correction.
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let first = manager.process_message("I prefer short responses.").unwrap();
        let second = manager
            .process_message("Actually, give me detailed explanations.")
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_some());
        let all = store.get_all_learnings(false).unwrap();
        assert_eq!(all.len(), 2);
        assert!(all
            .iter()
            .any(|l| l.content.contains("detailed explanations") && l.is_active()));
    }

    // ── Decay ──

    #[test]
    fn test_decay_is_monotonic_non_increasing() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let mut learning = Learning::new("likes markdown tables", "user_feedback", Sentiment::Neutral);
        learning.updated_at = Utc::now() - Duration::days(5);
        store.create_learning(&learning).unwrap();

        let before = store.get_learning(&learning.id).unwrap().unwrap().relevance_score;
        manager.apply_decay().unwrap();
        let after = store.get_learning(&learning.id).unwrap().unwrap().relevance_score;

        assert!(after < before);
        let expected = before * (0.95f64).powi(5);
        assert!((after - expected).abs() < 1e-9);
    }

    #[test]
    fn test_decay_removes_below_floor() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let mut learning = Learning::new("old habit", "user_feedback", Sentiment::Neutral);
        learning.relevance_score = 0.12;
        learning.updated_at = Utc::now() - Duration::days(10);
        store.create_learning(&learning).unwrap();

        let stats = manager.apply_decay().unwrap();
        assert_eq!(stats.removed, 1);
        assert!(store.get_learning(&learning.id).unwrap().is_none());
    }

    #[test]
    fn test_fresh_learning_unchanged_by_decay() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let learning = Learning::new("fresh", "user_feedback", Sentiment::Neutral);
        store.create_learning(&learning).unwrap();

        let stats = manager.apply_decay().unwrap();
        assert_eq!(stats.unchanged, 1);
        assert_eq!(
            store.get_learning(&learning.id).unwrap().unwrap().relevance_score,
            1.0
        );
    }

    // ── Boost ──

    #[test]
    fn test_boost_on_access_capped_at_one() {
        let (store, _dir) = make_store();
        let manager = LearningManager::new(&store, 0.05);

        let mut learning = Learning::new("boost me", "user_feedback", Sentiment::Neutral);
        learning.relevance_score = 0.5;
        store.create_learning(&learning).unwrap();

        let boosted = manager.boost_on_access(&learning.id).unwrap().unwrap();
        assert!((boosted.relevance_score - 0.6).abs() < 1e-9);
        assert_eq!(boosted.times_accessed, 1);

        // Repeated boosts cap at 1.0.
        for _ in 0..10 {
            manager.boost_on_access(&learning.id).unwrap();
        }
        let capped = store.get_learning(&learning.id).unwrap().unwrap();
        assert!(capped.relevance_score <= 1.0);
    }

    // ── Similarity ──

    #[test]
    fn test_word_overlap() {
        assert_eq!(word_overlap("a b c", "a b c"), 1.0);
        assert_eq!(word_overlap("a b", "c d"), 0.0);
        let half = word_overlap("red green blue", "red green yellow");
        assert!((half - 0.5).abs() < 1e-9);
        assert_eq!(word_overlap("", "anything"), 0.0);
    }
}
