//! Agent loop — the per-message reasoning cycle.
//!
//! For each inbound envelope: onboarding gate, slash commands,
//! sanitization, memory recording and feedback detection, context
//! assembly, compaction, routing, the bounded LLM ↔ tool loop with
//! optional chain-of-thought reflection, and outbound composition.
//! Room brokers drive this through the `MessageProcessor` seam.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crewbot_broker::MessageProcessor;
use crewbot_core::bus::queue::MessageBus;
use crewbot_core::bus::types::{MessageEnvelope, SenderRole};
use crewbot_core::config::Config;
use crewbot_core::room::RoomManager;
use crewbot_core::session::{
    CompactionConfig, MemoryFlushHook, RoomSessionManager, SessionCompactor,
};
use crewbot_core::types::Message;
use crewbot_core::utils::expand_home;
use crewbot_memory::{
    ActivityTracker, Embedder, Event, HashingEmbedder, LearningManager, MemoryRetrieval,
    MemoryStore, PreferencesAggregator,
};
use crewbot_providers::traits::{LlmProvider, LlmRequestConfig};
use crewbot_router::{RoutingStage, RoutingTier};

use crate::bots::BotRegistry;
use crate::context::ContextBuilder;
use crate::dispatch::BotDispatch;
use crate::sanitizer::SecretSanitizer;
use crate::tools::config_tool::{SharedConfig, UpdateConfigTool};
use crate::tools::filesystem::{
    EditFileTool, ListDirTool, PathPolicy, ReadFileTool, WriteFileTool,
};
use crate::tools::invoke::{BotInvoker, InvokeTool};
use crate::tools::memory_tools::{
    GetEntityTool, GetRelationshipsTool, MemoryToolset, RecallTool, SearchMemoryTool,
};
use crate::tools::registry::ToolRegistry;
use crate::tools::security::{ScanSkillTool, ValidateSkillSafetyTool};
use crate::tools::shell::ExecTool;
use crate::tools::web::{WebFetchTool, WebSearchTool};

/// Default maximum LLM ↔ tool iterations per user message.
const DEFAULT_MAX_ITERATIONS: usize = 20;

/// How many history messages go into each prompt.
const HISTORY_WINDOW: usize = 50;

const ONBOARDING_RESPONSE: &str = "👋 I'm not fully set up yet. No LLM provider is configured — \
     add an API key with `crewbot configure` (or set an env var like \
     OPENROUTER_API_KEY), then try again.";

const HELP_RESPONSE: &str = "Crewbot commands:\n\
     /new — Start a new conversation in this room\n\
     /help — Show available commands\n\
     Mention a teammate with @name to address them directly.";

// ─────────────────────────────────────────────
// Memory plumbing
// ─────────────────────────────────────────────

/// Memory-side collaborators, absent when memory is disabled.
struct MemoryStack {
    store: Arc<MemoryStore>,
    embedder: Arc<dyn Embedder>,
    activity: Arc<ActivityTracker>,
    context_budget: usize,
    always_include_preferences: bool,
    preferences_staleness: i64,
    decay_rate: f64,
}

/// Pre-compaction hook: mine the trailing window for feedback and
/// refresh aggregated preferences.
struct MemoryFlush<'a> {
    stack: &'a MemoryStack,
}

impl MemoryFlushHook for MemoryFlush<'_> {
    fn flush(&self, recent_messages: &[Message]) -> Result<()> {
        let manager = LearningManager::new(&self.stack.store, self.stack.decay_rate);
        for message in recent_messages {
            if let Message::User {
                content: crewbot_core::types::MessageContent::Text(text),
            } = message
            {
                let _ = manager.process_message(text)?;
            }
        }
        let aggregator =
            PreferencesAggregator::new(&self.stack.store, self.stack.preferences_staleness)?;
        aggregator.refresh_if_stale()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────
// AgentLoop
// ─────────────────────────────────────────────

/// The per-message reasoning engine shared by all room brokers.
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Option<Arc<dyn LlmProvider>>,
    workspace: PathBuf,
    default_model: String,
    max_iterations: usize,
    request_config: LlmRequestConfig,

    tools: ToolRegistry,
    context: ContextBuilder,
    sessions: Arc<RoomSessionManager>,
    sanitizer: SecretSanitizer,
    bots: BotRegistry,
    dispatch: BotDispatch,
    rooms: Arc<RoomManager>,
    routing: Option<RoutingStage>,
    memory: Option<MemoryStack>,
    compactor: SessionCompactor,
    max_context_tokens: usize,
}

impl AgentLoop {
    /// Assemble the loop from configuration and shared collaborators.
    pub fn new(
        config: &Config,
        shared_config: SharedConfig,
        config_path: PathBuf,
        bus: Arc<MessageBus>,
        provider: Option<Arc<dyn LlmProvider>>,
        sessions: Arc<RoomSessionManager>,
        rooms: Arc<RoomManager>,
        memory_store: Option<Arc<MemoryStore>>,
        activity: Option<Arc<ActivityTracker>>,
    ) -> Self {
        let workspace = expand_home(&config.agents.defaults.workspace);
        let leader = config.agents.leader.clone();
        let bots = BotRegistry::with_defaults(&leader);
        let dispatch = BotDispatch::new(&leader);
        let context = ContextBuilder::new(&workspace);

        let request_config = LlmRequestConfig {
            max_tokens: config.agents.defaults.max_tokens,
            temperature: config.agents.defaults.temperature,
            ..Default::default()
        };

        // Filesystem access policy from tool config.
        let protected: Vec<PathBuf> = config
            .tools
            .protected_paths
            .iter()
            .map(|p| expand_home(p))
            .collect();
        let policy = if config.tools.restrict_to_workspace {
            PathPolicy::workspace(workspace.clone(), protected)
        } else if !config.tools.allowed_paths.is_empty() {
            PathPolicy::allowlist(
                config.tools.allowed_paths.iter().map(|p| expand_home(p)).collect(),
                protected,
            )
        } else {
            PathPolicy::open(protected)
        };

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ReadFileTool::new(policy.clone())));
        tools.register(Arc::new(WriteFileTool::new(policy.clone())));
        tools.register(Arc::new(EditFileTool::new(policy.clone())));
        tools.register(Arc::new(ListDirTool::new(policy)));
        tools.register(Arc::new(ExecTool::new(
            workspace.clone(),
            Some(config.tools.exec.timeout),
            config.tools.restrict_to_workspace,
        )));
        tools.register(Arc::new(WebSearchTool::new(Some(
            config.tools.web.search.api_key.clone(),
        ))));
        tools.register(Arc::new(WebFetchTool::new()));
        tools.register(Arc::new(ScanSkillTool));
        tools.register(Arc::new(ValidateSkillSafetyTool));
        tools.register(Arc::new(UpdateConfigTool::new(shared_config, config_path)));

        // Memory stack + memory tools.
        let memory = memory_store.map(|store| {
            let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new());
            let toolset = MemoryToolset::new(store.clone(), embedder.clone());
            tools.register(Arc::new(SearchMemoryTool::new(toolset.clone())));
            tools.register(Arc::new(GetEntityTool::new(toolset.clone())));
            tools.register(Arc::new(GetRelationshipsTool::new(toolset.clone())));
            tools.register(Arc::new(RecallTool::new(toolset)));

            MemoryStack {
                store,
                embedder,
                activity: activity
                    .unwrap_or_else(|| {
                        Arc::new(ActivityTracker::new(
                            config.memory.background.quiet_threshold_seconds,
                        ))
                    }),
                context_budget: config.memory.context.total_budget,
                always_include_preferences: config.memory.context.always_include_preferences,
                preferences_staleness: config.memory.summary.staleness_threshold,
                decay_rate: config.memory.learning.relevance_decay_rate,
            }
        });

        // Bot delegation.
        if let Some(p) = &provider {
            let invoker = Arc::new(CrewInvoker {
                provider: p.clone(),
                bots: BotRegistry::with_defaults(&leader),
                context: ContextBuilder::new(&workspace),
                model: config.agents.defaults.model.clone(),
                request_config: request_config.clone(),
            });
            tools.register(Arc::new(InvokeTool::new(invoker)));
        }

        // Routing stage (needs a provider for the LLM fallback layer;
        // the client classifier works either way).
        let routing = if config.routing.enabled {
            Some(RoutingStage::new(
                config.routing.clone(),
                provider.clone(),
                Some(&workspace),
            ))
        } else {
            None
        };

        let compaction_config: CompactionConfig = config.memory.session_compaction.clone();
        let max_context_tokens = compaction_config.max_context_tokens;

        info!(
            model = %config.agents.defaults.model,
            tools = tools.len(),
            routing = routing.is_some(),
            memory = memory.is_some(),
            "agent loop initialized"
        );

        Self {
            bus,
            provider,
            workspace,
            default_model: config.agents.defaults.model.clone(),
            max_iterations: config.agents.defaults.max_tool_iterations as usize,
            request_config,
            tools,
            context,
            sessions,
            sanitizer: SecretSanitizer::new(),
            bots,
            dispatch,
            rooms,
            routing,
            memory,
            compactor: SessionCompactor::new(compaction_config),
            max_context_tokens,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    /// Process a single inbound envelope into an outbound one.
    pub async fn process_message(&self, msg: &MessageEnvelope) -> Result<MessageEnvelope> {
        // Internal cross-bot announcements carry their origin in chat_id
        // and are processed against that origin's session.
        if msg.sender_role == Some(SenderRole::System) {
            return self.process_system_message(msg).await;
        }

        // 1. Onboarding gate.
        let Some(provider) = self.provider.clone() else {
            return Ok(msg.reply(ONBOARDING_RESPONSE));
        };

        let session_key = msg.session_key();

        // 2. Slash commands — no LLM call.
        match msg.content.trim() {
            "/new" => {
                self.sessions.clear(&session_key);
                return Ok(msg.reply("🆕 Started a new conversation."));
            }
            "/help" => {
                return Ok(msg.reply(HELP_RESPONSE));
            }
            _ => {}
        }

        // 3. Sanitize; everything downstream sees only sanitized text.
        if self.sanitizer.has_secrets(&msg.content) {
            let kinds: Vec<&str> = self
                .sanitizer
                .secret_kinds(&msg.content)
                .iter()
                .map(|k| k.as_str())
                .collect();
            warn!(kinds = ?kinds, "secrets detected in inbound message, redacting");
        }
        let sanitized = self.sanitizer.sanitize(&msg.content);

        // 4. Record the inbound event.
        if let Some(stack) = &self.memory {
            stack.activity.mark_activity();
            let mut event = Event::new(
                &msg.channel,
                "inbound",
                "message",
                &sanitized,
                &session_key,
            );
            event.content_embedding = Some(stack.embedder.embed(&sanitized));
            if let Err(e) = stack.store.save_event(&event) {
                warn!(error = %e, "failed to record inbound event");
            }

            // 5. Feedback detection + preferences staleness.
            let manager = LearningManager::new(&stack.store, stack.decay_rate);
            match manager.process_message(&sanitized) {
                Ok(Some(_)) => {
                    if let Ok(aggregator) =
                        PreferencesAggregator::new(&stack.store, stack.preferences_staleness)
                    {
                        let _ = aggregator.increment_staleness();
                        let _ = aggregator.refresh_if_stale();
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "feedback detection failed"),
            }
        }

        // 6. Memory context assembly.
        let memory_context = self.assemble_memory_context(&sanitized);

        // 7. Session compaction check.
        let mut session = self.sessions.get_or_create(&session_key);
        if self.compactor.should_compact(&session.messages) {
            let result = match &self.memory {
                Some(stack) => {
                    let hook = MemoryFlush { stack };
                    self.compactor.compact(&mut session, Some(&hook))
                }
                None => self.compactor.compact(&mut session, None),
            };
            info!(
                original = result.original_count,
                compacted = result.compacted_count,
                mode = %result.mode,
                "session compaction"
            );
            self.sessions.replace(session.clone());
        }

        // 8. Routing: pick the model pair (sticky).
        let (mut model, secondary_model, tier) = match &self.routing {
            Some(stage) => {
                let selection = stage.select_model(&sanitized, &mut session).await;
                self.sessions.replace(session.clone());
                let model = if selection.model.is_empty() {
                    self.default_model.clone()
                } else {
                    selection.model
                };
                (model, selection.secondary_model, selection.decision.tier)
            }
            None => (self.default_model.clone(), None, RoutingTier::Medium),
        };

        // Resolve the responding bot.
        let room = msg
            .room_id
            .as_deref()
            .map(|id| self.rooms.get_or_general(id));
        let is_dm = msg.metadata.get("is_dm").map(|v| v == "true").unwrap_or(false);
        let dm_target = msg.metadata.get("dm_target").map(String::as_str);
        let dispatched = self
            .dispatch
            .dispatch(&sanitized, room.as_ref(), is_dm, dm_target);
        let bot = self.bots.get_or_leader(&dispatched.primary_bot);
        let permitted = bot.permitted_tools(&self.tools.tool_names());

        debug!(
            bot = %bot.name,
            model = %model,
            tier = %tier,
            "processing message"
        );

        // 9. The bounded LLM ↔ tool loop.
        let system_prompt =
            self.context
                .build_system_prompt(bot, memory_context.as_deref(), &permitted);
        let history = self.sessions.get_history(&session_key, HISTORY_WINDOW);
        let mut messages = self.context.build_messages(
            &system_prompt,
            &history,
            &sanitized,
            &msg.media.iter().map(|m| m.path.clone()).collect::<Vec<_>>(),
            &msg.channel,
            &msg.chat_id,
            msg.room_id.as_deref(),
        );
        let tool_defs = self.tools.get_definitions_for(&permitted);

        // Provider calls carry this envelope's trace id end to end.
        let request_config = self.request_config.for_trace(msg.trace_id.as_deref());

        let mut final_content: Option<String> = None;
        let mut tried_secondary = false;

        for iteration in 0..self.max_iterations {
            debug!(iteration, model = %model, "LLM call");

            let response = match provider
                .chat(&messages, Some(&tool_defs), &model, &request_config)
                .await
            {
                Ok(response) => response,
                // 10. Transient provider error → one retry on the
                // tier's secondary model; anything else surfaces.
                Err(e) => {
                    if e.is_transient() && !tried_secondary {
                        if let Some(secondary) = secondary_model.clone() {
                            warn!(
                                primary = %model,
                                secondary = %secondary,
                                error = %e,
                                "transient provider error, retrying with secondary model"
                            );
                            model = secondary;
                            tried_secondary = true;
                            continue;
                        }
                    }
                    final_content = Some(format!("Sorry, I encountered an error: {e}"));
                    break;
                }
            };

            if response.has_tool_calls() {
                let tool_calls = response.tool_calls.clone();
                ContextBuilder::add_assistant_message(
                    &mut messages,
                    response.content.clone(),
                    tool_calls.clone(),
                    response.reasoning_content.clone(),
                );

                for tc in &tool_calls {
                    let params: HashMap<String, serde_json::Value> =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();

                    info!(tool = %tc.function.name, iteration, "executing tool call");
                    let result = self
                        .tools
                        .execute_for(&permitted, &tc.function.name, params)
                        .await;
                    ContextBuilder::add_tool_result(&mut messages, &tc.id, &result);

                    // CoT reflection between tool executions, when the
                    // bot's reasoning config + tier call for it.
                    if let Some(prompt) = bot.reasoning.reflection_prompt(tier) {
                        messages.push(Message::user(prompt));
                    }
                }
            } else {
                final_content = response.content;
                break;
            }
        }

        let content = final_content.unwrap_or_else(|| {
            format!(
                "Reached {} iterations without completion.",
                self.max_iterations
            )
        });
        let sanitized_response = self.sanitizer.sanitize(&content);

        // 11. Record the outbound event; append to the session.
        if let Some(stack) = &self.memory {
            let mut event = Event::new(
                &msg.channel,
                "outbound",
                "message",
                &sanitized_response,
                &session_key,
            );
            event.content_embedding = Some(stack.embedder.embed(&sanitized_response));
            if let Err(e) = stack.store.save_event(&event) {
                warn!(error = %e, "failed to record outbound event");
            }
        }

        self.sessions.add_message(&session_key, Message::user(&sanitized));
        self.sessions
            .add_message(&session_key, Message::assistant(&sanitized_response));

        // 12. Compose the outbound envelope.
        let mut out = msg.reply(&sanitized_response);
        out.bot_name = Some(bot.name.clone());
        let history_tokens =
            crewbot_core::session::compactor::total_tokens(&self.sessions.get_history(
                &session_key,
                usize::MAX,
            ));
        let usage = history_tokens as f64 / self.max_context_tokens as f64;
        out.metadata
            .insert("context_usage".into(), format!("{:.0}%", usage * 100.0));
        Ok(out)
    }

    /// Process an internal system announcement: `chat_id` carries
    /// `"origin_channel:origin_chat"`; the response routes back there.
    async fn process_system_message(&self, msg: &MessageEnvelope) -> Result<MessageEnvelope> {
        let (origin_channel, origin_chat) = msg
            .chat_id
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("invalid system message chat_id: {}", msg.chat_id))?;

        info!(
            origin_channel,
            origin_chat, "processing system message against origin session"
        );

        let mut derived = msg.clone();
        derived.channel = origin_channel.to_string();
        derived.chat_id = origin_chat.to_string();
        derived.sender_role = Some(SenderRole::User);

        Box::pin(self.process_message(&derived)).await
    }

    /// Direct processing mode (CLI entry point): wraps text into an
    /// envelope on the "cli" channel in the general room.
    pub async fn process_direct(&self, text: &str) -> Result<String> {
        let mut msg = MessageEnvelope::inbound("cli", "user", "direct", text);
        msg.set_room(crewbot_core::room::GENERAL_ROOM);
        msg.apply_defaults(SenderRole::User);
        let response = self.process_message(&msg).await?;
        Ok(response.content)
    }

    /// Assemble the bounded memory context block for the prompt:
    /// preferences first, then relevant entities, then similar events.
    fn assemble_memory_context(&self, content: &str) -> Option<String> {
        let stack = self.memory.as_ref()?;
        let mut sections: Vec<String> = Vec::new();
        let budget = stack.context_budget;

        if stack.always_include_preferences {
            if let Ok(aggregator) =
                PreferencesAggregator::new(&stack.store, stack.preferences_staleness)
            {
                let summary = aggregator.summary();
                if !summary.contains("No preferences learned") {
                    sections.push(summary);
                }
            }
        }

        let retrieval = MemoryRetrieval::new(&stack.store, stack.embedder.as_ref());

        let query_embedding = stack.embedder.embed(content);
        if let Ok(entities) = stack.store.get_similar_entities(&query_embedding, None, 5, 0.2) {
            if !entities.is_empty() {
                let mut block = String::from("## Relevant entities\n");
                for (entity, _) in entities {
                    block.push_str(&format!("- {} ({})", entity.name, entity.entity_type));
                    if !entity.description.is_empty() {
                        block.push_str(&format!(": {}", entity.description));
                    }
                    block.push('\n');
                }
                sections.push(block);
            }
        }

        if let Ok(hits) = retrieval.search(content, None, 3, 0.2) {
            if !hits.is_empty() {
                let mut block = String::from("## Related past events\n");
                for hit in hits {
                    block.push_str(&format!(
                        "- ({}) {}\n",
                        hit.event.timestamp.format("%Y-%m-%d"),
                        crewbot_core::utils::truncate_string(&hit.event.content, 120)
                    ));
                }
                sections.push(block);
            }
        }

        if sections.is_empty() {
            return None;
        }

        let mut context = sections.join("\n");
        if context.chars().count() > budget {
            context = context.chars().take(budget).collect();
        }
        Some(context)
    }
}

// ─────────────────────────────────────────────
// MessageProcessor — broker seam
// ─────────────────────────────────────────────

#[async_trait]
impl MessageProcessor for AgentLoop {
    async fn process(&self, envelope: MessageEnvelope) -> Result<()> {
        match self.process_message(&envelope).await {
            Ok(response) => {
                if let Err(e) = self.bus.publish_outbound(response).await {
                    error!(error = %e, "failed to publish outbound message");
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "message processing error");
                let _ = self
                    .bus
                    .publish_outbound(envelope.reply(format!("I encountered an error: {e}")))
                    .await;
                Err(e)
            }
        }
    }
}

// ─────────────────────────────────────────────
// CrewInvoker — the `invoke` tool's backend
// ─────────────────────────────────────────────

/// Runs a one-shot task as another bot: the bot's system prompt plus the
/// task, one chat call, no nested tools (delegation does not recurse).
struct CrewInvoker {
    provider: Arc<dyn LlmProvider>,
    bots: BotRegistry,
    context: ContextBuilder,
    model: String,
    request_config: LlmRequestConfig,
}

#[async_trait]
impl BotInvoker for CrewInvoker {
    async fn invoke(&self, bot: &str, task: &str, context: Option<&str>) -> Result<String> {
        let profile = self.bots.get_or_leader(bot);
        let system_prompt = self.context.build_system_prompt(profile, None, &[]);

        let mut user_text = task.to_string();
        if let Some(ctx) = context {
            user_text.push_str(&format!("\n\nContext from the room:\n{ctx}"));
        }

        let messages = vec![Message::system(system_prompt), Message::user(user_text)];
        let response = self
            .provider
            .chat(&messages, None, &self.model, &self.request_config)
            .await?;

        Ok(response.content.unwrap_or_else(|| "(no response)".into()))
    }

    fn available_bots(&self) -> Vec<String> {
        self.bots.bot_names()
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crewbot_core::types::{LlmResponse, ToolCall, ToolDefinition};
    use crewbot_providers::traits::ProviderError;
    use std::sync::Mutex;

    /// A mock LLM provider that returns canned results in sequence.
    struct MockProvider {
        responses: Mutex<Vec<Result<LlmResponse, ProviderError>>>,
        models_seen: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn new(responses: Vec<Result<LlmResponse, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                models_seen: Mutex::new(Vec::new()),
            })
        }

        fn simple(text: &str) -> Arc<Self> {
            Self::new(vec![Ok(LlmResponse {
                content: Some(text.into()),
                ..Default::default()
            })])
        }

        fn rate_limited() -> Result<LlmResponse, ProviderError> {
            Err(ProviderError::RateLimited { retry_after: None })
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(
            &self,
            _messages: &[Message],
            _tools: Option<&[ToolDefinition]>,
            model: &str,
            _config: &LlmRequestConfig,
        ) -> Result<LlmResponse, ProviderError> {
            self.models_seen.lock().unwrap().push(model.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(LlmResponse {
                    content: Some("(no more responses)".into()),
                    ..Default::default()
                })
            } else {
                responses.remove(0)
            }
        }

        fn default_model(&self) -> &str {
            "mock-model"
        }
        fn display_name(&self) -> &str {
            "MockProvider"
        }
    }

    struct TestRig {
        agent: AgentLoop,
        store: Arc<MemoryStore>,
        _dir: tempfile::TempDir,
    }

    fn make_rig(provider: Option<Arc<dyn LlmProvider>>) -> TestRig {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.agents.defaults.workspace = dir.path().join("ws").to_string_lossy().to_string();
        config.agents.defaults.max_tool_iterations = 5;
        // Keep the router's LLM fallback out of unit tests: with a zero
        // confidence floor, the client classifier always wins.
        config.routing.enabled = true;
        config.routing.client_classifier.min_confidence = 0.0;

        let bus = Arc::new(MessageBus::new(32));
        let sessions = Arc::new(
            RoomSessionManager::new(Some(dir.path().join("room_sessions"))).unwrap(),
        );
        let rooms = Arc::new(RoomManager::new("crewbot"));
        let store = Arc::new(MemoryStore::open_at(&dir.path().join("memory.db")).unwrap());
        let shared_config: SharedConfig = Arc::new(std::sync::RwLock::new(config.clone()));

        let agent = AgentLoop::new(
            &config,
            shared_config,
            dir.path().join("config.json"),
            bus,
            provider,
            sessions,
            rooms,
            Some(store.clone()),
            None,
        );

        TestRig {
            agent,
            store,
            _dir: dir,
        }
    }

    fn room_message(content: &str) -> MessageEnvelope {
        let mut msg = MessageEnvelope::inbound("cli", "user", "default", content);
        msg.set_room("general");
        msg.apply_defaults(SenderRole::User);
        msg
    }

    #[tokio::test]
    async fn test_simple_response() {
        let rig = make_rig(Some(MockProvider::simple("Hello from the crew!")));
        let result = rig.agent.process_direct("Hi").await.unwrap();
        assert_eq!(result, "Hello from the crew!");
    }

    #[tokio::test]
    async fn test_onboarding_gate_without_provider() {
        let rig = make_rig(None);
        let response = rig
            .agent
            .process_message(&room_message("hello"))
            .await
            .unwrap();
        assert!(response.content.contains("No LLM provider is configured"));
    }

    #[tokio::test]
    async fn test_slash_new_clears_session() {
        let rig = make_rig(Some(MockProvider::new(vec![Ok(LlmResponse {
            content: Some("first".into()),
            ..Default::default()
        })])));

        rig.agent.process_direct("remember this").await.unwrap();
        let response = rig
            .agent
            .process_message(&room_message("/new"))
            .await
            .unwrap();
        assert!(response.content.contains("new conversation"));

        let history = rig.agent.sessions.get_history("room:general", 50);
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn test_slash_help_lists_commands() {
        let rig = make_rig(Some(MockProvider::simple("unused")));
        let response = rig
            .agent
            .process_message(&room_message("/help"))
            .await
            .unwrap();
        assert!(response.content.contains("/new"));
        assert!(response.content.contains("/help"));
    }

    #[tokio::test]
    async fn test_tool_calling_loop() {
        let dir = tempfile::tempdir().unwrap();
        let test_file = dir.path().join("note.txt");
        std::fs::write(&test_file, "file content here").unwrap();

        let tool_call = ToolCall::new(
            "call_1",
            "read_file",
            serde_json::json!({"path": test_file.to_str().unwrap()}).to_string(),
        );
        let provider = MockProvider::new(vec![
            Ok(LlmResponse {
                content: None,
                tool_calls: vec![tool_call],
                ..Default::default()
            }),
            Ok(LlmResponse {
                content: Some("The file contains: file content here".into()),
                ..Default::default()
            }),
        ]);

        let rig = make_rig(Some(provider));
        let result = rig.agent.process_direct("Read note.txt").await.unwrap();
        assert_eq!(result, "The file contains: file content here");
    }

    #[tokio::test]
    async fn test_max_iterations_exhaustion() {
        let tool_call = ToolCall::new("loop", "list_dir", r#"{"path": "/tmp"}"#);
        let responses: Vec<Result<LlmResponse, ProviderError>> = (0..10)
            .map(|_| {
                Ok(LlmResponse {
                    content: None,
                    tool_calls: vec![tool_call.clone()],
                    ..Default::default()
                })
            })
            .collect();

        let rig = make_rig(Some(MockProvider::new(responses)));
        let result = rig.agent.process_direct("loop forever").await.unwrap();
        assert!(result.contains("iterations without completion"));
    }

    #[tokio::test]
    async fn test_transient_error_retries_on_secondary_model() {
        let provider = MockProvider::new(vec![
            MockProvider::rate_limited(),
            Ok(LlmResponse {
                content: Some("recovered".into()),
                ..Default::default()
            }),
        ]);

        let rig = make_rig(Some(provider.clone()));
        let result = rig.agent.process_direct("hello there").await.unwrap();
        assert_eq!(result, "recovered");

        // Two calls, second on a different model (the tier's secondary).
        let seen = provider.models_seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn test_persistent_transient_error_surfaces_as_text() {
        let provider = MockProvider::new(vec![
            MockProvider::rate_limited(),
            MockProvider::rate_limited(),
        ]);

        let rig = make_rig(Some(provider));
        let result = rig.agent.process_direct("hello there").await.unwrap();
        assert!(result.contains("Sorry, I encountered an error"));
        assert!(result.contains("rate limited"));
    }

    #[tokio::test]
    async fn test_permanent_error_skips_secondary_retry() {
        let provider = MockProvider::new(vec![Err(ProviderError::Rejected {
            status: 401,
            message: "invalid api key".into(),
        })]);

        let rig = make_rig(Some(provider.clone()));
        let result = rig.agent.process_direct("hello there").await.unwrap();
        assert!(result.contains("Sorry, I encountered an error"));
        assert!(result.contains("invalid api key"));

        // A rejection is not retried — exactly one provider call.
        assert_eq!(provider.models_seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_secrets_sanitized_before_session() {
        let rig = make_rig(Some(MockProvider::simple("noted")));
        rig.agent
            .process_direct("my key is sk-abc123def456ghi789jkl")
            .await
            .unwrap();

        let history = rig.agent.sessions.get_history("room:general", 50);
        let serialized = serde_json::to_string(&history).unwrap();
        assert!(!serialized.contains("sk-abc123def456ghi789jkl"));
        assert!(serialized.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_events_recorded_for_both_directions() {
        let rig = make_rig(Some(MockProvider::simple("the answer")));
        rig.agent.process_direct("a question").await.unwrap();

        let events = rig.store.get_events_by_session("room:general", 10, 0).unwrap();
        assert_eq!(events.len(), 2);
        let directions: Vec<&str> = events.iter().map(|e| e.direction.as_str()).collect();
        assert!(directions.contains(&"inbound"));
        assert!(directions.contains(&"outbound"));
    }

    #[tokio::test]
    async fn test_feedback_creates_learning() {
        let rig = make_rig(Some(MockProvider::simple("understood")));
        rig.agent
            .process_direct("I prefer short responses.")
            .await
            .unwrap();

        let learnings = rig.store.get_all_learnings(true).unwrap();
        assert_eq!(learnings.len(), 1);
        assert!(learnings[0].content.contains("short responses"));
    }

    #[tokio::test]
    async fn test_session_appended_and_metadata_routed() {
        let rig = make_rig(Some(MockProvider::simple("4")));
        rig.agent.process_direct("What is 2+2?").await.unwrap();

        let session = rig.agent.sessions.get_or_create("room:general");
        assert_eq!(session.messages.len(), 2);
        assert!(session.metadata.contains_key("routing_tier"));
    }

    #[tokio::test]
    async fn test_outbound_carries_context_usage() {
        let rig = make_rig(Some(MockProvider::simple("ok")));
        let response = rig
            .agent
            .process_message(&room_message("hello"))
            .await
            .unwrap();
        assert!(response.metadata.contains_key("context_usage"));
        assert!(response.bot_name.is_some());
    }

    #[tokio::test]
    async fn test_system_message_routes_to_origin() {
        let rig = make_rig(Some(MockProvider::simple("Summary of the result.")));

        let mut msg = MessageEnvelope::inbound(
            "system",
            "crewbot",
            "telegram:chat_42",
            "## Task result\nDone!",
        );
        msg.sender_role = Some(SenderRole::System);

        let response = rig.agent.process_message(&msg).await.unwrap();
        assert_eq!(response.channel, "telegram");
        assert_eq!(response.chat_id, "chat_42");
        assert_eq!(response.content, "Summary of the result.");
    }

    #[tokio::test]
    async fn test_system_message_invalid_format_errors() {
        let rig = make_rig(Some(MockProvider::simple("ok")));
        let mut msg = MessageEnvelope::inbound("system", "crewbot", "no-colon-here", "x");
        msg.sender_role = Some(SenderRole::System);

        assert!(rig.agent.process_message(&msg).await.is_err());
    }

    #[test]
    fn test_default_tools_registered() {
        let rig = make_rig(Some(MockProvider::simple("ok")));
        let names = rig.agent.tools().tool_names();
        for expected in [
            "read_file",
            "write_file",
            "edit_file",
            "list_dir",
            "exec",
            "web_search",
            "web_fetch",
            "invoke",
            "search_memory",
            "get_entity",
            "get_relationships",
            "recall",
            "scan_skill",
            "validate_skill_safety",
            "update_config",
        ] {
            assert!(names.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn test_broker_seam_publishes_outbound() {
        let rig = make_rig(Some(MockProvider::simple("broker reply")));
        let bus = rig.agent.bus.clone();

        rig.agent.process(room_message("ping")).await.unwrap();

        let outbound = bus.consume_outbound().await.unwrap();
        assert_eq!(outbound.content, "broker reply");
        assert_eq!(outbound.room_id.as_deref(), Some("general"));
    }
}
