//! Client-side classifier for fast routing decisions.
//!
//! Synchronous, no I/O: context extraction (action type, negation
//! scopes, code blocks), 15 weighted dimension scores, sigmoid
//! confidence, and tier selection via pattern matches then thresholds.
//! Patterns load from `memory/ROUTING_PATTERNS.json` when present, so
//! auto-calibration can teach the classifier new tricks over time.

use std::collections::HashMap;
use std::path::PathBuf;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::{ClassificationScores, RoutingDecision, RoutingPattern, RoutingTier};

// ─────────────────────────────────────────────
// Defaults
// ─────────────────────────────────────────────

/// Default dimension weights (sum to 1.0).
pub fn default_weights() -> HashMap<&'static str, f64> {
    HashMap::from([
        ("reasoning_markers", 0.18),
        ("code_presence", 0.15),
        ("simple_indicators", 0.12),
        ("multi_step_patterns", 0.12),
        ("technical_terms", 0.10),
        ("token_count", 0.08),
        ("creative_markers", 0.05),
        ("question_complexity", 0.05),
        ("constraint_count", 0.04),
        ("imperative_verbs", 0.03),
        ("output_format", 0.03),
        ("domain_specificity", 0.02),
        ("reference_complexity", 0.02),
        ("negation_complexity", 0.01),
        ("social_interaction", 0.01),
    ])
}

/// Tier thresholds over the confidence score.
#[derive(Clone, Copy, Debug)]
pub struct TierThresholds {
    pub medium: f64,
    pub complex: f64,
    pub coding: f64,
    pub reasoning: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            medium: 0.50,
            complex: 0.85,
            coding: 0.90,
            reasoning: 0.97,
        }
    }
}

/// On-disk shape of the patterns file.
#[derive(Serialize, Deserialize)]
pub struct PatternsFile {
    pub patterns: Vec<RoutingPattern>,
    pub version: String,
    pub count: usize,
}

/// The built-in pattern library used until calibration learns better.
pub fn builtin_patterns() -> Vec<RoutingPattern> {
    let mut patterns = Vec::new();
    let mut add = |regex: &str, tier: RoutingTier, confidence: f64, examples: &[&str]| {
        let mut p = RoutingPattern::new(regex, tier, confidence);
        p.examples = examples.iter().map(|s| s.to_string()).collect();
        patterns.push(p);
    };

    // Mathematical & formal reasoning
    add(
        r"\b(prove|theorem|lemma|corollary|derivation|formal proof|logical consequence|inductive|deductive|syllogism|axiom|postulate)\b",
        RoutingTier::Reasoning,
        0.95,
        &["Prove that...", "Theorem states...", "Formal proof of"],
    );
    add(
        r"(\$[^$]+\$|\b\d+\s*[+\-*/]\s*\d+\s*=\s*\?|\b(solve|integrate|differentiate|equation|quadratic|logarithm|calculus|algebra|trigonometry)\b)",
        RoutingTier::Reasoning,
        0.90,
        &["Solve x² + 5x + 6 = 0", "Calculate ∫x² dx"],
    );
    add(
        r"\b(step by step|walk me through|explain why|inference|premise|hypothesis)\b",
        RoutingTier::Reasoning,
        0.88,
        &["Walk me through this", "Step by step solution"],
    );

    // Complex systems & debugging
    add(
        r"\b(refactor|architecture|distributed system|microservice|design pattern|security review|performance optimization|scalability|high availability|load balancing|system design)\b",
        RoutingTier::Complex,
        0.90,
        &["Refactor this codebase", "Design a distributed system"],
    );
    add(
        r"\b(debug|troubleshoot|complex algorithm|concurrency|threading|race condition|memory leak|deadlock|bottleneck|profil)\b",
        RoutingTier::Complex,
        0.85,
        &["Debug this issue", "Find the race condition"],
    );
    add(
        r"\b(not working|broken|exception|crash|stack trace|what's wrong)\b",
        RoutingTier::Complex,
        0.82,
        &["Not working", "Getting an exception"],
    );

    // Coding & development
    add(
        r"\b(write code|implement|code review|unit test|integration test|api endpoint|database query|data structure|fix bug|optimize code|fix this bug)\b",
        RoutingTier::Coding,
        0.92,
        &["Write a function", "Code review", "Fix this bug"],
    );
    add(
        r"\b(git (status|log|add|commit|push|pull|fetch|merge|rebase|checkout|branch|clone|stash|reset|revert|tag|diff|blame))\b",
        RoutingTier::Coding,
        0.88,
        &["git status", "git push"],
    );
    add(
        r"\b(npm (install|run|build|test)|yarn (add|remove|install)|pip (install|uninstall|freeze)|cargo (build|test|run|add)|go mod|gradle|maven)\b",
        RoutingTier::Coding,
        0.87,
        &["npm install", "pip install requests", "cargo build"],
    );
    add(
        r"\b(docker (build|run|exec|stop|logs|ps|images|pull|push|compose)|dockerfile|kubernetes|k8s|helm)\b",
        RoutingTier::Coding,
        0.90,
        &["docker build", "kubernetes deployment"],
    );
    add(
        r"\b(sql|select|insert into|schema migration|mongodb|postgres|mysql|redis|sqlite)\b",
        RoutingTier::Coding,
        0.87,
        &["SQL query", "database migration"],
    );
    add(
        r"\b(pytest|jest|mocha|cypress|playwright|selenium|stub|assert|coverage|benchmark|lint|eslint|prettier)\b",
        RoutingTier::Coding,
        0.85,
        &["write tests", "check coverage"],
    );
    add(
        r"\b(compile|transpile|webpack|vite|rollup|esbuild|babel|typescript|tsc|cmake|gcc|clang)\b",
        RoutingTier::Coding,
        0.85,
        &["compile code", "webpack bundle"],
    );

    // Code blocks in content
    add(
        r"(?m)```\w*$|^(function|class|def|async|await|import|const|let|var|return)\b",
        RoutingTier::Medium,
        0.85,
        &["Code block present", "function definition"],
    );

    // Medium complexity tasks
    add(
        r"\b(documentation|readme|docstring|summarize|paraphrase|rewrite|proofread|grammar|versus|pros and cons)\b",
        RoutingTier::Medium,
        0.78,
        &["Write documentation", "Summarize this"],
    );
    add(
        r"\b(creative writing|story|poem|fiction|plot|dialogue|brainstorm|generate ideas|recommend|suggest|tutorial)\b",
        RoutingTier::Medium,
        0.80,
        &["Write a story", "Brainstorm ideas"],
    );
    add(
        r"\b(graph|chart|visualize|analyze data|dataset|dataframe|statistics|correlation|regression|histogram)\b",
        RoutingTier::Medium,
        0.82,
        &["Plot this data", "Create a chart"],
    );
    add(
        r"\b(scrape|webhook|graphql|oauth|authentication|json response)\b",
        RoutingTier::Medium,
        0.80,
        &["Create a webhook", "REST endpoint"],
    );
    add(
        r"\b(configure|setup|deploy|initialize|getting started|configuration|environment|dependencies)\b",
        RoutingTier::Medium,
        0.78,
        &["Setup guide", "Configure settings"],
    );

    // Simple social interactions
    add(
        r"\b(good morning|good afternoon|good evening|good night|rise and shine|sleep tight|see you tomorrow|sweet dreams)\b",
        RoutingTier::Simple,
        0.95,
        &["Good morning!", "Good night!"],
    );
    add(
        r"\b(happy weekend|tgif|happy friday|vacation mode|merry christmas|happy new year)\b",
        RoutingTier::Simple,
        0.90,
        &["Happy weekend!", "TGIF!"],
    );
    add(
        r"\b(great job|well done|awesome work|excellent|perfect|that worked|it works|nailed it|high five|kudos|bravo)\b",
        RoutingTier::Simple,
        0.90,
        &["Great job!", "That worked!"],
    );
    add(
        r"\b(thank you|thanks|appreciate it|grateful|lifesaver|much appreciated)\b",
        RoutingTier::Simple,
        0.90,
        &["Thank you!", "Thanks so much!"],
    );
    add(
        r"\b(how are you|how's it going|what's new|what's happening|how have you been|howdy|sup)\b",
        RoutingTier::Simple,
        0.90,
        &["How are you?", "What's new?"],
    );
    add(
        r"\b(my bad|sorry|oops|my mistake|apologies|scratch that|never mind|let me rephrase)\b",
        RoutingTier::Simple,
        0.85,
        &["My bad!", "Never mind"],
    );
    add(
        r"\b(what is|look up|define|translate|meaning of|definition|synonym|antonym)\b",
        RoutingTier::Simple,
        0.85,
        &["What is photosynthesis?", "Translate hello"],
    );
    add(
        r"\b(reminder|alarm|timer|countdown|timezone|what time|when is|due date)\b",
        RoutingTier::Simple,
        0.80,
        &["Set a reminder", "What time is it?"],
    );
    add(
        r"\b(weather|temperature|forecast|directions|nearby|restaurant)\b",
        RoutingTier::Simple,
        0.85,
        &["What's the weather", "Find nearby restaurants"],
    );

    patterns
}

// ─────────────────────────────────────────────
// Context extraction
// ─────────────────────────────────────────────

/// What kind of action the user is requesting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionType {
    Write,
    Explain,
    Analyze,
    Fix,
    Compare,
    Search,
    General,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Write => "write",
            ActionType::Explain => "explain",
            ActionType::Analyze => "analyze",
            ActionType::Fix => "fix",
            ActionType::Compare => "compare",
            ActionType::Search => "search",
            ActionType::General => "general",
        }
    }
}

/// A negation and the span of text it governs.
#[derive(Clone, Debug)]
pub struct NegationScope {
    pub negation: String,
    /// Byte offset of the negation in the lowercased content.
    pub position: usize,
    /// Byte offset where the scope ends.
    pub scope_end: usize,
    pub scope_text: String,
}

impl NegationScope {
    fn contains(&self, pos: usize) -> bool {
        self.position < pos && pos < self.scope_end
    }
}

/// Context information extracted from content.
#[derive(Clone, Debug)]
pub struct ClassificationContext {
    pub negations: Vec<NegationScope>,
    pub action_type: ActionType,
    pub has_code_blocks: bool,
    pub question_type: Option<&'static str>,
    pub urgency: Vec<&'static str>,
}

fn negation_regexes() -> &'static Vec<Regex> {
    static CELL: std::sync::OnceLock<Vec<Regex>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"\b(don't|dont|do not|doesn't|doesnt|does not|didn't|didnt|did not)\b",
            r"\b(won't|wont|will not|wouldn't|wouldnt|would not|shouldn't|shouldnt|should not)\b",
            r"\b(can't|cant|cannot|couldn't|couldnt|could not|mustn't|must not)\b",
            r"\b(isn't|isnt|aren't|arent|wasn't|wasnt|weren't|werent)\b",
            r"\b(never|no|not|none|nothing|nobody|nowhere|neither|nor)\b",
            r"\b(avoid|stop|refrain from|without|unless|except|skip|ignore)\b",
            r"\b(rather than|instead of|as opposed to)\b",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn action_regexes() -> &'static Vec<(Regex, ActionType)> {
    static CELL: std::sync::OnceLock<Vec<(Regex, ActionType)>> = std::sync::OnceLock::new();
    CELL.get_or_init(|| {
        [
            (
                r"\b(write|create|generate|build|implement|make|develop|code|script)\b",
                ActionType::Write,
            ),
            (
                r"\b(explain|describe|tell me about|what is|how does|why|clarify|elaborate)\b",
                ActionType::Explain,
            ),
            (
                r"\b(analyze|review|debug|troubleshoot|check|inspect|investigate|assess|evaluate)\b",
                ActionType::Analyze,
            ),
            (
                r"\b(fix|repair|correct|improve|optimize|refactor|enhance|upgrade|update)\b",
                ActionType::Fix,
            ),
            (
                r"\b(compare|contrast|difference|versus|vs|which is better)\b",
                ActionType::Compare,
            ),
            (
                r"\b(search|find|look for|locate|fetch|retrieve)\b",
                ActionType::Search,
            ),
        ]
        .iter()
        .filter_map(|(p, a)| Regex::new(p).ok().map(|r| (r, *a)))
        .collect()
    })
}

// ─────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────

/// Fast client-side classifier using pattern matching and heuristics.
pub struct ClientSideClassifier {
    pub min_confidence: f64,
    weights: HashMap<&'static str, f64>,
    thresholds: TierThresholds,
    patterns_file: Option<PathBuf>,
    patterns: Vec<(RoutingPattern, Option<Regex>)>,
}

impl Default for ClientSideClassifier {
    fn default() -> Self {
        Self::new(None, 0.85)
    }
}

impl ClientSideClassifier {
    /// Create a classifier, loading patterns from `patterns_file` when
    /// present, or falling back to the built-in library.
    pub fn new(patterns_file: Option<PathBuf>, min_confidence: f64) -> Self {
        let patterns = Self::load_patterns(patterns_file.as_deref());
        ClientSideClassifier {
            min_confidence,
            weights: default_weights(),
            thresholds: TierThresholds::default(),
            patterns_file,
            patterns,
        }
    }

    fn load_patterns(path: Option<&std::path::Path>) -> Vec<(RoutingPattern, Option<Regex>)> {
        let raw = path
            .filter(|p| p.exists())
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|content| serde_json::from_str::<PatternsFile>(&content).ok())
            .map(|file| file.patterns)
            .unwrap_or_else(builtin_patterns);

        raw.into_iter()
            .map(|pattern| {
                let compiled = RegexBuilder::new(&pattern.regex)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| warn!(regex = %pattern.regex, error = %e, "invalid routing pattern"))
                    .ok();
                (pattern, compiled)
            })
            .collect()
    }

    /// Persist the current pattern set to the patterns file.
    pub fn save_patterns(&self) -> anyhow::Result<()> {
        let Some(path) = &self.patterns_file else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = PatternsFile {
            patterns: self.patterns.iter().map(|(p, _)| p.clone()).collect(),
            version: "2.0".to_string(),
            count: self.patterns.len(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Number of loaded patterns.
    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }

    /// Classify content. Synchronous, no I/O.
    pub fn classify(&self, content: &str) -> (RoutingDecision, ClassificationScores) {
        let context = self.extract_context(content);
        let scores = self.calculate_scores(content, &context);

        let weighted_sum = scores.weighted_sum(&self.weights);
        let confidence = sigmoid(weighted_sum);

        let tier = self.determine_tier(confidence, content, &context, &scores);

        let decision = RoutingDecision {
            tier,
            model: String::new(),
            confidence,
            layer: "client",
            reasoning: format!(
                "Client-side classification: {} (confidence={:.2}, action={})",
                tier,
                confidence,
                context.action_type.as_str()
            ),
            estimated_tokens: estimate_tokens(content, tier),
            needs_tools: needs_tools(content, tier),
            metadata: HashMap::from([
                (
                    "scores".to_string(),
                    serde_json::to_value(&scores).unwrap_or_default(),
                ),
                (
                    "action_type".to_string(),
                    serde_json::Value::String(context.action_type.as_str().to_string()),
                ),
                (
                    "has_negations".to_string(),
                    serde_json::Value::Bool(!context.negations.is_empty()),
                ),
            ]),
        };

        (decision, scores)
    }

    // ────────────── Context ──────────────

    /// Extract contextual information: negation scopes first, so action
    /// detection can skip negated verbs ("don't write code; explain it"
    /// is an explain request, not a write request).
    pub fn extract_context(&self, content: &str) -> ClassificationContext {
        let lower = content.to_lowercase();

        let negations = extract_negations(&lower);
        let action_type = detect_action_type(&lower, &negations);
        let has_code_blocks = content.matches("```").count() >= 2;

        let question_type = if content.contains('?') {
            if Regex::new(r"\b(what|which|who|where|when|why|how)\b")
                .unwrap()
                .is_match(&lower)
            {
                Some("wh_question")
            } else if Regex::new(
                r"\b(is|are|was|were|do|does|did|can|could|will|would|should|has|have|had)\b",
            )
            .unwrap()
            .is_match(&lower)
            {
                Some("yes_no")
            } else {
                Some("open")
            }
        } else {
            None
        };

        let urgency_words = [
            "urgent",
            "asap",
            "immediately",
            "quickly",
            "hurry",
            "deadline",
            "emergency",
        ];
        let urgency = urgency_words
            .iter()
            .filter(|w| lower.contains(**w))
            .copied()
            .collect();

        ClassificationContext {
            negations,
            action_type,
            has_code_blocks,
            question_type,
            urgency,
        }
    }

    // ────────────── Scores ──────────────

    fn calculate_scores(
        &self,
        content: &str,
        context: &ClassificationContext,
    ) -> ClassificationScores {
        let lower = content.to_lowercase();
        let token_count = content.split_whitespace().count();

        let mut scores = ClassificationScores::default();

        let reasoning_words = [
            "prove", "theorem", "lemma", "corollary", "step by step", "walk me through",
            "explain why", "derivation", "formal proof", "logical consequence", "reasoning",
        ];
        scores.reasoning_markers = score_keywords(&lower, &reasoning_words, context);

        // Code presence stays high even when negated — the user still
        // needs that expertise.
        let code_indicators = [
            "function", "class", "def", "async", "await", "import", "const", "return",
            "git", "docker", "npm", "pip", "cargo", "api", "database", "sql",
        ];
        let mut code_score = score_keywords(&lower, &code_indicators, context);
        if context.has_code_blocks {
            code_score = (code_score + 0.3).min(1.0);
        }
        scores.code_presence = code_score;

        let simple_words = [
            "what is", "define", "translate", "how to", "meaning of", "what's", "what are",
            "hello", "hi", "thanks", "thank you",
        ];
        scores.simple_indicators = score_keywords(&lower, &simple_words, context);

        let multi_step = [
            "first", "then", "next", "after that", "step 1", "step 2", "1.", "2.", "3.",
            "phase", "stage", "iteration",
        ];
        scores.multi_step_patterns = score_keywords(&lower, &multi_step, context);

        let technical = [
            "algorithm", "kubernetes", "distributed", "microservice", "database", "api",
            "framework", "protocol", "architecture", "infrastructure", "deployment",
        ];
        scores.technical_terms = score_keywords(&lower, &technical, context);

        scores.token_count = match token_count {
            n if n < 20 => 0.1,
            n if n < 100 => 0.4,
            n if n < 300 => 0.7,
            _ => 1.0,
        };

        let creative = [
            "story", "poem", "creative", "imagine", "brainstorm", "write a", "generate ideas",
            "compose",
        ];
        scores.creative_markers = score_keywords(&lower, &creative, context);

        let question_marks = content.matches('?').count();
        scores.question_complexity = match question_marks {
            0 => 0.0,
            1 => 0.3,
            n => (0.3 + (n as f64 - 1.0) * 0.2).min(1.0),
        };

        let constraints = [
            "at most", "at least", "minimum", "maximum", "limit", "o(n)", "o(log n)",
            "efficient", "optimize",
        ];
        scores.constraint_count = score_keywords(&lower, &constraints, context);

        let imperative = [
            "build", "create", "implement", "design", "develop", "write", "make", "setup",
            "configure", "deploy",
        ];
        let mut imperative_score = score_keywords(&lower, &imperative, context);
        if context.action_type == ActionType::Explain && !context.negations.is_empty() {
            imperative_score *= 0.5;
        }
        scores.imperative_verbs = imperative_score;

        let formats = [
            "json", "yaml", "xml", "csv", "markdown", "html", "schema", "table", "diagram",
        ];
        scores.output_format = score_keywords(&lower, &formats, context);

        let domains = [
            "quantum", "blockchain", "machine learning", "genomics", "bioinformatics",
            "cybersecurity", "cryptography",
        ];
        scores.domain_specificity = score_keywords(&lower, &domains, context);

        let references = [
            "the docs", "the api", "the documentation", "above", "previous", "earlier",
            "mentioned", "referenced",
        ];
        scores.reference_complexity = score_keywords(&lower, &references, context);

        let negation_words = ["don't", "not", "never", "avoid", "without", "unless"];
        scores.negation_complexity = score_keywords(&lower, &negation_words, context);

        let social = [
            "hello", "hi", "hey", "good morning", "good night", "thanks", "great job",
            "well done", "how are you",
        ];
        scores.social_interaction = score_keywords(&lower, &social, context);

        scores
    }

    // ────────────── Tier ──────────────

    /// Determine the tier with intelligent handling of negations and
    /// action context.
    fn determine_tier(
        &self,
        confidence: f64,
        content: &str,
        context: &ClassificationContext,
        scores: &ClassificationScores,
    ) -> RoutingTier {
        let lower = content.to_lowercase();

        // Explicit pattern matches are strong signals.
        for (pattern, compiled) in &self.patterns {
            let Some(regex) = compiled else { continue };
            if !regex.is_match(&lower) {
                continue;
            }

            if pattern.confidence >= 0.90 {
                if pattern.tier == RoutingTier::Coding {
                    // Coding expertise requested, but for explanation —
                    // or with the write action negated: a medium task.
                    if context.action_type == ActionType::Explain {
                        return RoutingTier::Medium;
                    }
                    let write_negated = context.negations.iter().any(|neg| {
                        ["write", "create", "build", "make"]
                            .iter()
                            .any(|w| neg.scope_text.contains(w))
                    });
                    if write_negated {
                        return RoutingTier::Medium;
                    }
                }
                return pattern.tier;
            } else if pattern.confidence >= 0.85 {
                return pattern.tier;
            }
        }

        // Two or more reasoning markers with high confidence.
        let reasoning_count = ["prove", "theorem", "step by step", "formal proof"]
            .iter()
            .filter(|w| lower.contains(**w))
            .count();
        if reasoning_count >= 2 && confidence >= 0.90 {
            return RoutingTier::Reasoning;
        }

        // Explaining code is simpler than writing it.
        if context.action_type == ActionType::Explain
            && scores.code_presence > 0.5
            && confidence >= self.thresholds.medium
        {
            return RoutingTier::Medium;
        }

        if confidence >= self.thresholds.reasoning {
            RoutingTier::Reasoning
        } else if confidence >= self.thresholds.complex {
            RoutingTier::Complex
        } else if confidence >= self.thresholds.coding {
            if scores.code_presence > 0.6
                && matches!(context.action_type, ActionType::Write | ActionType::Fix)
            {
                RoutingTier::Coding
            } else {
                RoutingTier::Medium
            }
        } else if confidence >= self.thresholds.medium {
            RoutingTier::Medium
        } else {
            RoutingTier::Simple
        }
    }
}

// ─────────────────────────────────────────────
// Free helpers
// ─────────────────────────────────────────────

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x * 2.0).exp())
}

/// Extract negations with scope detection. A negation owns the words
/// after it until a clause break or 10 words, whichever comes first.
pub fn extract_negations(lower: &str) -> Vec<NegationScope> {
    let mut negations = Vec::new();

    for regex in negation_regexes() {
        for m in regex.find_iter(lower) {
            let pos = m.start();
            let mut scope_end = lower.len();

            // Clause boundaries end the scope.
            for ending in [". ", "; ", " but ", " however ", " instead ", " rather "] {
                if let Some(rel) = lower[m.end()..].find(ending) {
                    scope_end = scope_end.min(m.end() + rel);
                }
            }
            for ending in ['.', ';'] {
                if let Some(rel) = lower[m.end()..].find(ending) {
                    scope_end = scope_end.min(m.end() + rel);
                }
            }

            // Limit to ~10 words.
            let mut word_count = 0;
            for (offset, ch) in lower[pos..].char_indices() {
                if ch == ' ' {
                    word_count += 1;
                    if word_count >= 10 {
                        scope_end = scope_end.min(pos + offset);
                        break;
                    }
                }
            }

            let scope_end = scope_end.max(pos);
            negations.push(NegationScope {
                negation: m.as_str().to_string(),
                position: pos,
                scope_end,
                scope_text: lower[pos..scope_end].to_string(),
            });
        }
    }

    negations
}

/// Detect the requested action, skipping matches inside negation scopes
/// so "don't write code, just explain it" reads as an explain request.
pub fn detect_action_type(lower: &str, negations: &[NegationScope]) -> ActionType {
    for (regex, action) in action_regexes() {
        for m in regex.find_iter(lower) {
            let negated = negations.iter().any(|neg| neg.contains(m.start()));
            if !negated {
                return *action;
            }
        }
    }
    ActionType::General
}

/// Keyword scoring with negation awareness.
///
/// Domain indicators (code, math, technical) keep 80 % of their weight
/// even when negated — the user still needs that expertise. Action
/// indicators are reduced by proximity to the negation.
fn score_keywords(lower: &str, keywords: &[&str], context: &ClassificationContext) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }

    const DOMAIN_WORDS: &[&str] = &[
        "code", "function", "git", "docker", "sql", "api", "database", "math", "algorithm",
        "prove", "theorem",
    ];

    let mut matches = 0.0;
    for keyword in keywords {
        let Some(pos) = lower.find(keyword) else {
            continue;
        };

        let negation = context.negations.iter().find(|neg| neg.contains(pos));
        match negation {
            Some(neg) => {
                let is_domain = DOMAIN_WORDS.iter().any(|d| keyword.contains(d));
                if is_domain {
                    matches += 0.8;
                } else {
                    let distance = lower[neg.position..pos].split_whitespace().count();
                    matches += match distance {
                        d if d <= 2 => 0.2,
                        d if d <= 5 => 0.5,
                        _ => 0.7,
                    };
                }
            }
            None => matches += 1.0,
        }
    }

    (matches / keywords.len() as f64 * 2.0 + matches * 0.05).min(1.0)
}

/// Estimate tokens needed from content size and tier.
pub fn estimate_tokens(content: &str, tier: RoutingTier) -> u32 {
    let base = content.split_whitespace().count() as f64 * 1.5;
    let tier_budget = match tier {
        RoutingTier::Simple => 50.0,
        RoutingTier::Medium => 200.0,
        RoutingTier::Complex => 1000.0,
        RoutingTier::Coding => 800.0,
        RoutingTier::Reasoning => 2000.0,
    };
    (base + tier_budget) as u32
}

/// Whether tools are likely needed for this request.
pub fn needs_tools(content: &str, tier: RoutingTier) -> bool {
    const TOOL_INDICATORS: &[&str] = &[
        "search", "find", "look up", "web", "internet", "file", "read", "write", "execute",
        "run", "command", "shell", "code", "program", "script", "function", "class",
    ];

    let lower = content.to_lowercase();
    let tool_score = TOOL_INDICATORS.iter().filter(|w| lower.contains(**w)).count();

    let tier_boost = match tier {
        RoutingTier::Simple => 0,
        RoutingTier::Medium => 1,
        RoutingTier::Complex | RoutingTier::Coding => 2,
        RoutingTier::Reasoning => 1,
    };

    tool_score + tier_boost >= 2
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(content: &str) -> (RoutingDecision, ClassificationScores) {
        ClientSideClassifier::default().classify(content)
    }

    #[test]
    fn test_simple_arithmetic_question() {
        let (decision, _) = classify("What is 2+2?");
        assert_eq!(decision.tier, RoutingTier::Simple);
        assert_eq!(decision.layer, "client");
        assert!(decision.confidence >= 0.5);
        assert!(!decision.needs_tools);
    }

    #[test]
    fn test_greeting_is_simple() {
        let (decision, _) = classify("Good morning!");
        assert_eq!(decision.tier, RoutingTier::Simple);
    }

    #[test]
    fn test_thanks_is_simple() {
        let (decision, _) = classify("Thanks");
        assert_eq!(decision.tier, RoutingTier::Simple);
    }

    #[test]
    fn test_debugging_is_elevated() {
        let (decision, _) = classify("Debug this distributed system with race conditions");
        assert!(matches!(
            decision.tier,
            RoutingTier::Complex | RoutingTier::Medium
        ));
    }

    #[test]
    fn test_formal_proof_is_reasoning() {
        let (decision, _) = classify("Prove this theorem by induction, step by step");
        assert_eq!(decision.tier, RoutingTier::Reasoning);
    }

    #[test]
    fn test_write_code_is_coding() {
        let (decision, _) = classify("Write code to parse JSON into a struct");
        assert_eq!(decision.tier, RoutingTier::Coding);
    }

    #[test]
    fn test_negated_write_downgrades_to_medium() {
        let (decision, _) = classify("Don't write code; just explain how quicksort works.");
        assert_eq!(decision.tier, RoutingTier::Medium);
        assert_eq!(
            decision.metadata["action_type"],
            serde_json::Value::String("explain".into())
        );
    }

    #[test]
    fn test_explain_code_downgrades_coding_pattern() {
        let (decision, _) = classify("Explain how docker compose works");
        // A high-confidence coding pattern matches, but the action is
        // explain — coding expertise for a simpler task.
        assert_eq!(decision.tier, RoutingTier::Medium);
    }

    #[test]
    fn test_action_detection_skips_negated_verbs() {
        let lower = "don't write code; just explain how quicksort works.";
        let negations = extract_negations(lower);
        let action = detect_action_type(lower, &negations);
        assert_eq!(action, ActionType::Explain);
    }

    #[test]
    fn test_action_detection_plain_write() {
        let action = detect_action_type("write a poem about rust", &[]);
        assert_eq!(action, ActionType::Write);
    }

    #[test]
    fn test_negation_scope_ends_at_clause_break() {
        let negations = extract_negations("don't write code; just explain it");
        assert!(!negations.is_empty());
        let scope = &negations[0];
        assert!(scope.scope_text.contains("write"));
        assert!(!scope.scope_text.contains("explain"));
    }

    #[test]
    fn test_negation_scope_bounded_to_ten_words() {
        let text = "never one two three four five six seven eight nine ten eleven twelve";
        let negations = extract_negations(text);
        let scope = &negations[0];
        let words = scope.scope_text.split_whitespace().count();
        assert!(words <= 10);
    }

    #[test]
    fn test_domain_keywords_survive_negation() {
        let lower = "don't use docker for this";
        let negated_context = ClassificationContext {
            negations: extract_negations(lower),
            action_type: ActionType::General,
            has_code_blocks: false,
            question_type: None,
            urgency: vec![],
        };
        let clean_context = ClassificationContext {
            negations: vec![],
            action_type: ActionType::General,
            has_code_blocks: false,
            question_type: None,
            urgency: vec![],
        };

        // docker is a domain word → keeps 0.8 of its weight when negated.
        let negated = score_keywords(lower, &["docker"], &negated_context);
        let clean = score_keywords("use docker for this", &["docker"], &clean_context);
        assert!(negated > 0.0);
        assert!(negated < clean);
    }

    #[test]
    fn test_code_block_boosts_code_presence() {
        let classifier = ClientSideClassifier::default();
        let with_block = "Here:\n```rust\nfn main() {}\n```\nWhat does it do?";
        let context = classifier.extract_context(with_block);
        assert!(context.has_code_blocks);
    }

    #[test]
    fn test_question_type_detection() {
        let classifier = ClientSideClassifier::default();
        assert_eq!(
            classifier.extract_context("What is Rust?").question_type,
            Some("wh_question")
        );
        assert_eq!(
            classifier.extract_context("Is this correct?").question_type,
            Some("yes_no")
        );
        assert_eq!(classifier.extract_context("Just a statement").question_type, None);
    }

    #[test]
    fn test_urgency_detection() {
        let classifier = ClientSideClassifier::default();
        let context = classifier.extract_context("Fix this ASAP, it's urgent!");
        assert!(context.urgency.contains(&"urgent"));
        assert!(context.urgency.contains(&"asap"));
    }

    #[test]
    fn test_threshold_cascade_prefers_complex_over_coding() {
        // With no pattern match, confidence in [0.85, 0.97) resolves to
        // complex — the coding arm sits above complex's threshold and is
        // only reachable through a strong pattern match.
        let classifier = ClientSideClassifier::default();
        let context = ClassificationContext {
            negations: vec![],
            action_type: ActionType::Write,
            has_code_blocks: false,
            question_type: None,
            urgency: vec![],
        };
        let scores = ClassificationScores {
            code_presence: 0.9,
            ..Default::default()
        };

        let tier = classifier.determine_tier(0.92, "qqq zzz", &context, &scores);
        assert_eq!(tier, RoutingTier::Complex);

        let tier = classifier.determine_tier(0.86, "qqq zzz", &context, &scores);
        assert_eq!(tier, RoutingTier::Complex);
    }

    #[test]
    fn test_confidence_is_sigmoid_bounded() {
        for content in ["hi", "Debug the distributed system", "x"] {
            let (decision, _) = classify(content);
            assert!(decision.confidence >= 0.5);
            assert!(decision.confidence <= 1.0);
        }
    }

    #[test]
    fn test_estimate_tokens_by_tier() {
        let simple = estimate_tokens("hi", RoutingTier::Simple);
        let reasoning = estimate_tokens("hi", RoutingTier::Reasoning);
        assert!(simple < reasoning);
        assert!(reasoning >= 2000);
    }

    #[test]
    fn test_needs_tools() {
        assert!(needs_tools("search the web and write a file", RoutingTier::Medium));
        assert!(!needs_tools("good morning", RoutingTier::Simple));
    }

    #[test]
    fn test_builtin_patterns_all_compile() {
        for pattern in builtin_patterns() {
            assert!(
                RegexBuilder::new(&pattern.regex)
                    .case_insensitive(true)
                    .build()
                    .is_ok(),
                "pattern failed to compile: {}",
                pattern.regex
            );
        }
    }

    #[test]
    fn test_patterns_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ROUTING_PATTERNS.json");

        let classifier = ClientSideClassifier::new(Some(path.clone()), 0.85);
        classifier.save_patterns().unwrap();
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        let file: PatternsFile = serde_json::from_str(&content).unwrap();
        assert_eq!(file.version, "2.0");
        assert_eq!(file.count, file.patterns.len());

        // Reload picks up the saved file rather than builtins.
        let reloaded = ClientSideClassifier::new(Some(path), 0.85);
        assert_eq!(reloaded.pattern_count(), classifier.pattern_count());
    }

    #[test]
    fn test_corrupt_patterns_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ROUTING_PATTERNS.json");
        std::fs::write(&path, "{{{ not json").unwrap();

        let classifier = ClientSideClassifier::new(Some(path), 0.85);
        assert_eq!(classifier.pattern_count(), builtin_patterns().len());
    }
}
