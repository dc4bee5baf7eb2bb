//! The `update_config` tool — controlled configuration changes.
//!
//! Edits go through the typed dotted-path walker: unknown paths are
//! rejected, values are validated by round-tripping into the schema,
//! and the file on disk is backed up before the atomic save.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crewbot_core::config::loader::save_config;
use crewbot_core::config::paths::{apply, get_path, ConfigOp};
use crewbot_core::config::Config;

use super::base::{optional_string, require_string, Tool};

/// Live configuration shared between the tool and the service.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Apply set/append/remove operations to the configuration.
pub struct UpdateConfigTool {
    config: SharedConfig,
    config_path: PathBuf,
}

impl UpdateConfigTool {
    pub fn new(config: SharedConfig, config_path: PathBuf) -> Self {
        Self { config, config_path }
    }

    fn backup(&self) {
        if self.config_path.exists() {
            let backup = self.config_path.with_extension("json.bak");
            let _ = std::fs::copy(&self.config_path, backup);
        }
    }
}

#[async_trait]
impl Tool for UpdateConfigTool {
    fn name(&self) -> &str {
        "update_config"
    }

    fn description(&self) -> &str {
        "Read or change configuration via dotted paths (e.g. \
         'agents.defaults.model', 'tools.allowedPaths'). Operations: get, set, \
         append (arrays), remove (arrays and channel entries). Changes are \
         validated against the schema and saved atomically with a backup."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["get", "set", "append", "remove"],
                    "description": "What to do at the path"
                },
                "path": {
                    "type": "string",
                    "description": "Dotted config path, e.g. 'routing.tiers.coding.model'"
                },
                "value": {
                    "type": "string",
                    "description": "JSON-encoded value for set/append/remove (e.g. '\"gpt-4o\"', 'true', '42')"
                }
            },
            "required": ["operation", "path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let operation = require_string(&params, "operation")?;
        let path = require_string(&params, "path")?;

        if operation == "get" {
            let config = self.config.read().unwrap().clone();
            let value = get_path(&config, &path)?;
            return Ok(format!("{path} = {value}"));
        }

        let raw_value = optional_string(&params, "value")
            .ok_or_else(|| anyhow::anyhow!("Missing required parameter: value"))?;
        let value: Value = serde_json::from_str(&raw_value)
            .unwrap_or(Value::String(raw_value.clone()));

        let op = match operation.as_str() {
            "set" => ConfigOp::Set(value),
            "append" => ConfigOp::Append(value),
            "remove" => ConfigOp::Remove(value),
            other => anyhow::bail!("Unknown operation '{other}' (use get/set/append/remove)"),
        };

        let updated = {
            let current = self.config.read().unwrap().clone();
            apply(&current, &path, op)?
        };

        self.backup();
        save_config(&updated, Some(&self.config_path))?;
        *self.config.write().unwrap() = updated;

        info!(path = %path, operation = %operation, "config updated");
        Ok(format!("Updated {path} ({operation}). Config saved."))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
