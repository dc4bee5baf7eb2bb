//! Auto-calibration — learning new routing patterns from observed LLM
//! classifications.
//!
//! Every routed message records a classification. Periodically the
//! calibrator compares client and LLM tiers, mines the mismatches for
//! common vocabulary, emits new patterns, evicts patterns that stopped
//! working, and persists the updated set plus analytics.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crewbot_core::config::schema::AutoCalibrationConfig;

use crate::classifier::PatternsFile;
use crate::models::{RoutingPattern, RoutingTier};

/// Maximum classification records retained for analysis.
const MAX_RECORDS: usize = 1000;
/// Word must appear in at least this fraction of a tier's mismatch
/// samples to become a pattern.
const WORD_FREQUENCY_THRESHOLD: f64 = 0.6;
/// Patterns below this success rate are evicted once out of grace.
const EVICTION_SUCCESS_RATE: f64 = 0.3;

/// One recorded classification, kept for calibration analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassificationRecord {
    pub content_preview: String,
    pub final_tier: String,
    pub final_confidence: f64,
    pub layer: String,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub has_negations: bool,
    #[serde(default)]
    pub content_length: usize,
    #[serde(default)]
    pub client_tier: Option<String>,
    #[serde(default)]
    pub client_confidence: Option<f64>,
    #[serde(default)]
    pub llm_tier: Option<String>,
    #[serde(default)]
    pub llm_confidence: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outcome of one calibration pass.
#[derive(Clone, Debug, Serialize)]
pub struct CalibrationReport {
    pub timestamp: DateTime<Utc>,
    pub classifications_analyzed: usize,
    pub accuracy: f64,
    pub patterns_added: usize,
    pub patterns_removed: usize,
    pub total_patterns: usize,
}

#[derive(Serialize, Deserialize, Default)]
struct AnalyticsFile {
    classifications: Vec<ClassificationRecord>,
    last_calibration: Option<DateTime<Utc>>,
}

struct CalState {
    classifications: Vec<ClassificationRecord>,
    last_calibration: Option<DateTime<Utc>>,
}

/// Manages auto-calibration of routing patterns.
pub struct CalibrationManager {
    patterns_file: PathBuf,
    analytics_file: PathBuf,
    interval_hours: i64,
    min_classifications: usize,
    max_patterns: usize,
    backup_before: bool,
    state: Mutex<CalState>,
}

impl CalibrationManager {
    /// Create a manager, loading prior analytics when present.
    pub fn new(
        patterns_file: PathBuf,
        analytics_file: PathBuf,
        config: &AutoCalibrationConfig,
    ) -> Self {
        let loaded = std::fs::read_to_string(&analytics_file)
            .ok()
            .and_then(|content| serde_json::from_str::<AnalyticsFile>(&content).ok())
            .unwrap_or_default();

        CalibrationManager {
            patterns_file,
            analytics_file,
            interval_hours: parse_interval(&config.interval),
            min_classifications: config.min_classifications,
            max_patterns: config.max_patterns,
            backup_before: config.backup_before_calibration,
            state: Mutex::new(CalState {
                classifications: loaded.classifications,
                last_calibration: loaded.last_calibration,
            }),
        }
    }

    /// Record a classification for later analysis, bounded to the last
    /// [`MAX_RECORDS`].
    pub fn record_classification(&self, mut record: ClassificationRecord) {
        record.timestamp.get_or_insert_with(Utc::now);

        let mut state = self.state.lock().unwrap();
        state.classifications.push(record);
        let len = state.classifications.len();
        if len > MAX_RECORDS {
            state.classifications.drain(..len - MAX_RECORDS);
        }
    }

    /// Number of retained records.
    pub fn record_count(&self) -> usize {
        self.state.lock().unwrap().classifications.len()
    }

    /// When the last calibration ran.
    pub fn last_calibration(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().last_calibration
    }

    /// Whether calibration is due: something recorded, and either the
    /// interval elapsed or enough fresh classifications accumulated.
    pub fn should_calibrate(&self) -> bool {
        let state = self.state.lock().unwrap();
        if state.classifications.is_empty() {
            return false;
        }

        let Some(last) = state.last_calibration else {
            return true;
        };

        if Utc::now() - last >= Duration::hours(self.interval_hours) {
            return true;
        }

        let fresh = state
            .classifications
            .iter()
            .filter(|c| c.timestamp.map_or(false, |t| t > last))
            .count();
        fresh >= self.min_classifications
    }

    /// Run calibration: analyze accuracy, mine mismatches for new
    /// patterns, evict underperformers, persist patterns + analytics.
    pub fn calibrate(&self) -> CalibrationReport {
        if self.backup_before && self.patterns_file.exists() {
            self.backup_patterns();
        }

        let (analyzed, accuracy, mismatches) = {
            let state = self.state.lock().unwrap();
            let (matches, mismatches) = analyze_accuracy(&state.classifications);
            let total_pairs = matches + mismatches.len();
            let accuracy = if total_pairs > 0 {
                matches as f64 / total_pairs as f64
            } else {
                0.0
            };
            (state.classifications.len(), accuracy, mismatches)
        };

        let new_patterns = generate_patterns(&mismatches);

        let mut patterns = self.load_existing_patterns();
        let mut added = 0;
        for pattern in new_patterns {
            if patterns.len() >= self.max_patterns {
                break;
            }
            if patterns.iter().any(|p| p.regex == pattern.regex) {
                continue;
            }
            patterns.push(pattern);
            added += 1;
        }

        let before = patterns.len();
        patterns.retain(|p| p.success_rate() >= EVICTION_SUCCESS_RATE || p.age_days() < 7);
        let removed = before - patterns.len();

        self.save_patterns(&patterns);

        let now = Utc::now();
        {
            let mut state = self.state.lock().unwrap();
            state.last_calibration = Some(now);
        }
        self.save_analytics();

        let report = CalibrationReport {
            timestamp: now,
            classifications_analyzed: analyzed,
            accuracy,
            patterns_added: added,
            patterns_removed: removed,
            total_patterns: patterns.len(),
        };
        info!(
            analyzed = report.classifications_analyzed,
            accuracy = report.accuracy,
            added = report.patterns_added,
            removed = report.patterns_removed,
            "calibration completed"
        );
        report
    }

    fn load_existing_patterns(&self) -> Vec<RoutingPattern> {
        std::fs::read_to_string(&self.patterns_file)
            .ok()
            .and_then(|content| serde_json::from_str::<PatternsFile>(&content).ok())
            .map(|file| file.patterns)
            .unwrap_or_default()
    }

    fn save_patterns(&self, patterns: &[RoutingPattern]) {
        let file = PatternsFile {
            patterns: patterns.to_vec(),
            version: "2.0".to_string(),
            count: patterns.len(),
        };
        if let Some(parent) = self.patterns_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let json = match serde_json::to_string_pretty(&file) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize routing patterns");
                return;
            }
        };
        let tmp = self.patterns_file.with_extension("json.tmp");
        let result =
            std::fs::write(&tmp, json).and_then(|_| std::fs::rename(&tmp, &self.patterns_file));
        if let Err(e) = result {
            warn!(error = %e, "failed to save routing patterns");
        }
    }

    fn backup_patterns(&self) {
        let backup = self.patterns_file.with_extension("backup.json");
        if let Err(e) = std::fs::copy(&self.patterns_file, &backup) {
            warn!(error = %e, "failed to back up routing patterns");
        }
    }

    fn save_analytics(&self) {
        let state = self.state.lock().unwrap();
        let file = AnalyticsFile {
            classifications: state.classifications.clone(),
            last_calibration: state.last_calibration,
        };
        if let Some(parent) = self.analytics_file.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&file) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.analytics_file, json) {
                    warn!(error = %e, "failed to save routing analytics");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize routing analytics"),
        }
    }
}

// ─────────────────────────────────────────────
// Analysis helpers
// ─────────────────────────────────────────────

/// Count client/LLM agreements and collect the mismatched records.
fn analyze_accuracy(records: &[ClassificationRecord]) -> (usize, Vec<ClassificationRecord>) {
    let mut matches = 0;
    let mut mismatches = Vec::new();

    for record in records {
        let (Some(client), Some(llm)) = (&record.client_tier, &record.llm_tier) else {
            continue;
        };
        if client == llm {
            matches += 1;
        } else {
            mismatches.push(record.clone());
        }
    }

    (matches, mismatches)
}

/// Generate new patterns from mismatched classifications: group by the
/// LLM's (assumed correct) tier, then mine words that recur across at
/// least [`WORD_FREQUENCY_THRESHOLD`] of the group's samples.
fn generate_patterns(mismatches: &[ClassificationRecord]) -> Vec<RoutingPattern> {
    let mut by_tier: HashMap<String, Vec<&ClassificationRecord>> = HashMap::new();
    for record in mismatches {
        if let Some(tier) = &record.llm_tier {
            by_tier.entry(tier.clone()).or_default().push(record);
        }
    }

    let mut patterns = Vec::new();
    for (tier_name, records) in by_tier {
        if records.len() < 3 {
            continue;
        }
        let Some(tier) = RoutingTier::parse(&tier_name) else {
            continue;
        };

        let samples: Vec<&str> = records.iter().map(|r| r.content_preview.as_str()).collect();
        for word in frequent_words(&samples).into_iter().take(3) {
            let mut pattern = RoutingPattern::new(
                format!(r"\b{}\b", regex::escape(&word)),
                tier,
                0.8,
            );
            pattern.source = "auto_calibration".to_string();
            pattern.examples = samples.iter().take(3).map(|s| s.to_string()).collect();
            pattern.action_context = records.iter().find_map(|r| r.action_type.clone());
            patterns.push(pattern);
        }
    }

    patterns
}

/// Meaningful words (length > 3) present in at least the threshold
/// fraction of samples, most frequent first.
fn frequent_words(samples: &[&str]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for sample in samples {
        let mut seen = std::collections::HashSet::new();
        for word in sample.to_lowercase().split(|c: char| !c.is_alphanumeric()) {
            if word.len() > 3 && seen.insert(word.to_string()) {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
        }
    }

    let required = ((samples.len() as f64) * WORD_FREQUENCY_THRESHOLD).ceil() as usize;
    let mut words: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(_, count)| *count >= required)
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    words.into_iter().map(|(word, _)| word).collect()
}

/// Parse an interval string ("24h", "7d", or plain hours) into hours.
fn parse_interval(interval: &str) -> i64 {
    if let Some(hours) = interval.strip_suffix('h') {
        hours.parse().unwrap_or(24)
    } else if let Some(days) = interval.strip_suffix('d') {
        days.parse::<i64>().map(|d| d * 24).unwrap_or(24)
    } else {
        interval.parse().unwrap_or(24)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config() -> AutoCalibrationConfig {
        AutoCalibrationConfig::default()
    }

    fn manager(dir: &std::path::Path) -> CalibrationManager {
        CalibrationManager::new(
            dir.join("ROUTING_PATTERNS.json"),
            dir.join("routing_stats.json"),
            &config(),
        )
    }

    fn record(preview: &str, client: &str, llm: &str) -> ClassificationRecord {
        ClassificationRecord {
            content_preview: preview.to_string(),
            final_tier: llm.to_string(),
            final_confidence: 0.9,
            layer: "llm".to_string(),
            action_type: Some("write".to_string()),
            has_negations: false,
            content_length: preview.len(),
            client_tier: Some(client.to_string()),
            client_confidence: Some(0.6),
            llm_tier: Some(llm.to_string()),
            llm_confidence: Some(0.9),
            timestamp: None,
        }
    }

    #[test]
    fn test_record_bounded_to_max() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        for i in 0..1100 {
            mgr.record_classification(record(&format!("msg {i}"), "simple", "simple"));
        }
        assert_eq!(mgr.record_count(), 1000);
    }

    #[test]
    fn test_should_calibrate_empty() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(!mgr.should_calibrate());
    }

    #[test]
    fn test_should_calibrate_never_run_before() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.record_classification(record("hello", "simple", "simple"));
        assert!(mgr.should_calibrate());
    }

    #[test]
    fn test_should_calibrate_throttled_after_run() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.record_classification(record("hello", "simple", "simple"));
        mgr.calibrate();

        // One fresh record isn't enough, and no time has passed.
        mgr.record_classification(record("again", "simple", "simple"));
        assert!(!mgr.should_calibrate());
    }

    #[test]
    fn test_should_calibrate_on_fresh_volume() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());
        mgr.record_classification(record("seed", "simple", "simple"));
        mgr.calibrate();

        for i in 0..60 {
            mgr.record_classification(record(&format!("m {i}"), "simple", "simple"));
        }
        assert!(mgr.should_calibrate());
    }

    #[test]
    fn test_analyze_accuracy() {
        let records = vec![
            record("a", "simple", "simple"),
            record("b", "simple", "coding"),
            record("c", "medium", "medium"),
        ];
        let (matches, mismatches) = analyze_accuracy(&records);
        assert_eq!(matches, 2);
        assert_eq!(mismatches.len(), 1);
    }

    #[test]
    fn test_generate_patterns_needs_three_examples() {
        let mismatches = vec![
            record("deploy the staging service", "medium", "coding"),
            record("deploy to production now", "medium", "coding"),
        ];
        assert!(generate_patterns(&mismatches).is_empty());
    }

    #[test]
    fn test_generate_patterns_from_common_vocabulary() {
        let mismatches = vec![
            record("deploy the staging service", "medium", "coding"),
            record("deploy to production now", "medium", "coding"),
            record("can you deploy the worker", "medium", "coding"),
        ];
        let patterns = generate_patterns(&mismatches);
        assert!(!patterns.is_empty());
        assert!(patterns.iter().any(|p| p.regex.contains("deploy")));
        for p in &patterns {
            assert_eq!(p.tier, RoutingTier::Coding);
            assert_eq!(p.confidence, 0.8);
            assert_eq!(p.source, "auto_calibration");
        }
    }

    #[test]
    fn test_frequent_words_threshold() {
        // "deploy" in 3/3, "staging" in 1/3 — only deploy passes 60 %.
        let samples = [
            "deploy the staging service",
            "deploy to production",
            "please deploy it",
        ];
        let words = frequent_words(&samples);
        assert!(words.contains(&"deploy".to_string()));
        assert!(!words.contains(&"staging".to_string()));
    }

    #[test]
    fn test_frequent_words_diverse_samples_still_yield() {
        // No word in *all* samples; intersection would be empty, but the
        // frequency threshold still finds "database" (2 of 3 ≥ 60 %).
        let samples = [
            "optimize the database index",
            "database migration is stuck",
            "tune the query planner",
        ];
        let words = frequent_words(&samples);
        assert!(words.contains(&"database".to_string()));
    }

    #[test]
    fn test_calibrate_writes_patterns_and_analytics() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        for preview in [
            "deploy the staging service",
            "deploy to production now",
            "can you deploy the worker",
        ] {
            mgr.record_classification(record(preview, "medium", "coding"));
        }

        let report = mgr.calibrate();
        assert!(report.patterns_added > 0);
        assert_eq!(report.classifications_analyzed, 3);
        assert!(dir.path().join("ROUTING_PATTERNS.json").exists());
        assert!(dir.path().join("routing_stats.json").exists());

        // Patterns file has the expected shape.
        let content = std::fs::read_to_string(dir.path().join("ROUTING_PATTERNS.json")).unwrap();
        let file: PatternsFile = serde_json::from_str(&content).unwrap();
        assert_eq!(file.version, "2.0");
        assert_eq!(file.count, file.patterns.len());
    }

    #[test]
    fn test_calibrate_backs_up_existing_patterns() {
        let dir = tempdir().unwrap();
        let patterns_path = dir.path().join("ROUTING_PATTERNS.json");
        std::fs::write(
            &patterns_path,
            serde_json::to_string(&PatternsFile {
                patterns: vec![],
                version: "2.0".into(),
                count: 0,
            })
            .unwrap(),
        )
        .unwrap();

        let mgr = manager(dir.path());
        mgr.record_classification(record("x", "simple", "simple"));
        mgr.calibrate();

        assert!(dir.path().join("ROUTING_PATTERNS.backup.json").exists());
    }

    #[test]
    fn test_eviction_spares_grace_period() {
        let dir = tempdir().unwrap();
        let patterns_path = dir.path().join("ROUTING_PATTERNS.json");

        // One fresh pattern and one old failure.
        let fresh = RoutingPattern::new(r"\bfresh\b", RoutingTier::Simple, 0.8);
        let mut stale = RoutingPattern::new(r"\bstale\b", RoutingTier::Simple, 0.8);
        stale.added_at = Utc::now() - Duration::days(30);
        stale.times_matched = 10;
        stale.times_correct = 1;

        std::fs::write(
            &patterns_path,
            serde_json::to_string(&PatternsFile {
                patterns: vec![fresh, stale],
                version: "2.0".into(),
                count: 2,
            })
            .unwrap(),
        )
        .unwrap();

        let mgr = manager(dir.path());
        mgr.record_classification(record("x", "simple", "simple"));
        let report = mgr.calibrate();

        assert_eq!(report.patterns_removed, 1);
        let content = std::fs::read_to_string(&patterns_path).unwrap();
        let file: PatternsFile = serde_json::from_str(&content).unwrap();
        assert!(file.patterns.iter().any(|p| p.regex.contains("fresh")));
        assert!(!file.patterns.iter().any(|p| p.regex.contains("stale")));
    }

    #[test]
    fn test_analytics_survive_restart() {
        let dir = tempdir().unwrap();
        {
            let mgr = manager(dir.path());
            mgr.record_classification(record("persisted", "simple", "simple"));
            mgr.calibrate();
        }
        let mgr = manager(dir.path());
        assert_eq!(mgr.record_count(), 1);
        assert!(mgr.last_calibration().is_some());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("24h"), 24);
        assert_eq!(parse_interval("7d"), 168);
        assert_eq!(parse_interval("12"), 12);
        assert_eq!(parse_interval("bogus"), 24);
    }
}
