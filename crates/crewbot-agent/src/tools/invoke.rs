//! The `invoke` tool — synchronous delegation to another specialist bot.
//!
//! The calling bot hands a task to a teammate and waits for the result
//! (up to five minutes) so the answer can be woven into its own reply.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::base::{optional_string, require_string, Tool};

/// How long `invoke` waits for the delegated bot.
pub const INVOKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Seam for delegating a task to another bot.
#[async_trait]
pub trait BotInvoker: Send + Sync {
    /// Run `task` as `bot` and return its textual result.
    async fn invoke(&self, bot: &str, task: &str, context: Option<&str>)
        -> anyhow::Result<String>;

    /// Names of bots that can be invoked.
    fn available_bots(&self) -> Vec<String>;
}

/// Delegate a task to another bot and wait for its answer.
pub struct InvokeTool {
    invoker: Arc<dyn BotInvoker>,
}

impl InvokeTool {
    pub fn new(invoker: Arc<dyn BotInvoker>) -> Self {
        Self { invoker }
    }
}

#[async_trait]
impl Tool for InvokeTool {
    fn name(&self) -> &str {
        "invoke"
    }

    fn description(&self) -> &str {
        "Delegate a task to another specialist bot and wait for its result. \
         Use when a teammate's expertise fits the sub-task better than yours."
    }

    fn parameters(&self) -> Value {
        let bots = self.invoker.available_bots();
        json!({
            "type": "object",
            "properties": {
                "bot": {
                    "type": "string",
                    "description": format!("Name of the bot to invoke. Available: {}", bots.join(", "))
                },
                "task": {
                    "type": "string",
                    "description": "The task for the bot, with all context it needs"
                },
                "context": {
                    "type": "string",
                    "description": "Optional extra context from the current conversation"
                }
            },
            "required": ["bot", "task"]
        })
    }

    fn timeout(&self) -> Option<Duration> {
        Some(INVOKE_TIMEOUT)
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let bot = require_string(&params, "bot")?.to_lowercase();
        let task = require_string(&params, "task")?;
        let context = optional_string(&params, "context");

        let available = self.invoker.available_bots();
        if !available.iter().any(|b| b.eq_ignore_ascii_case(&bot)) {
            return Ok(format!(
                "Error: Unknown bot '{bot}'. Available bots: {}",
                available.join(", ")
            ));
        }

        info!(bot = %bot, "invoking specialist bot");

        match tokio::time::timeout(
            INVOKE_TIMEOUT,
            self.invoker.invoke(&bot, &task, context.as_deref()),
        )
        .await
        {
            Ok(Ok(result)) => Ok(format!("## Result from @{bot}\n\n{result}")),
            Ok(Err(e)) => Ok(format!("Error: @{bot} failed: {e}")),
            Err(_) => Ok(format!(
                "Error: @{bot} did not respond within {} seconds",
                INVOKE_TIMEOUT.as_secs()
            )),
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
