//! Shell tool — execute commands in a subprocess, with a deny-pattern
//! safety guard and optional workspace restriction.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::{info, warn};

use super::base::{optional_string, require_string, Tool};

/// Maximum output length before truncation (characters).
const MAX_OUTPUT_LEN: usize = 10_000;

/// Default command timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Dangerous command patterns that are always blocked.
const DENY_PATTERNS: &[&str] = &[
    r"\brm\s+-[rf]{1,2}\b",
    r"\bdel\s+/[fq]\b",
    r"\brmdir\s+/s\b",
    r"\b(format|mkfs|diskpart)\b",
    r"\bdd\s+if=",
    r">\s*/dev/sd",
    r"\b(shutdown|reboot|poweroff)\b",
    r":\(\)\s*\{.*\};\s*:", // fork bomb
];

/// Execute shell commands in a subprocess.
pub struct ExecTool {
    /// Working directory for commands.
    working_dir: PathBuf,
    /// Command timeout.
    timeout: Duration,
    /// If true, block commands that reference paths outside `working_dir`.
    restrict_to_workspace: bool,
    /// Compiled deny regexes (built once at construction).
    deny_regexes: Vec<Regex>,
}

impl ExecTool {
    pub fn new(working_dir: PathBuf, timeout_secs: Option<u64>, restrict_to_workspace: bool) -> Self {
        let deny_regexes: Vec<Regex> = DENY_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        Self {
            working_dir,
            timeout: Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            restrict_to_workspace,
            deny_regexes,
        }
    }

    /// Check if a command is safe to execute. Returns an error message
    /// if blocked.
    fn guard_command(&self, command: &str, cwd: &str) -> Option<String> {
        let lower = command.to_lowercase();

        for re in &self.deny_regexes {
            if re.is_match(&lower) {
                warn!(command = command, "command blocked by safety guard");
                return Some(
                    "Error: Command blocked by safety guard (dangerous pattern detected)".into(),
                );
            }
        }

        if self.restrict_to_workspace {
            if command.contains("../") || command.contains("..\\") {
                return Some(
                    "Error: Command blocked — path traversal (../) not allowed in restricted mode"
                        .into(),
                );
            }

            let cwd_path = PathBuf::from(cwd);
            if let Ok(re) = Regex::new(r#"(?:/[^\s"']+|[A-Za-z]:\\[^\s"']+)"#) {
                for cap in re.find_iter(command) {
                    let p = PathBuf::from(cap.as_str());
                    let resolved = if p.exists() {
                        p.canonicalize().unwrap_or(p)
                    } else {
                        p
                    };
                    if !resolved.starts_with(&cwd_path) {
                        return Some(format!(
                            "Error: Command references path '{}' outside workspace",
                            cap.as_str()
                        ));
                    }
                }
            }
        }

        None
    }
}

#[async_trait]
impl Tool for ExecTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. \
         Use this for running builds, tests, git, or any CLI tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory (defaults to workspace root)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let command = require_string(&params, "command")?;
        let cwd = optional_string(&params, "working_dir")
            .unwrap_or_else(|| self.working_dir.to_string_lossy().to_string());

        // Blocked commands are tool output, not a Rust error — the LLM
        // should see the refusal and adjust.
        if let Some(err) = self.guard_command(&command, &cwd) {
            return Ok(err);
        }

        info!(command = %command, cwd = %cwd, "executing shell command");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&cwd)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Ok(format!("Error running command: {e}")),
            Err(_) => {
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n--- stderr ---\n");
            }
            result.push_str(&stderr);
        }
        if result.is_empty() {
            result = format!("(no output, exit code {})", output.status.code().unwrap_or(-1));
        }

        if result.chars().count() > MAX_OUTPUT_LEN {
            let truncated: String = result.chars().take(MAX_OUTPUT_LEN).collect();
            result = format!("{truncated}\n... (output truncated)");
        }

        if !output.status.success() {
            result = format!(
                "Command failed with exit code {}:\n{result}",
                output.status.code().unwrap_or(-1)
            );
        }

        Ok(result)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_params(command: &str) -> HashMap<String, Value> {
        let mut params = HashMap::new();
        params.insert("command".to_string(), Value::String(command.to_string()));
        params
    }

    fn tool() -> ExecTool {
        ExecTool::new(std::env::temp_dir(), Some(10), false)
    }

    #[tokio::test]
    async fn test_exec_echo() {
        let result = tool().execute(make_params("echo hello crew")).await.unwrap();
        assert!(result.contains("hello crew"));
    }

    #[tokio::test]
    async fn test_exec_captures_stderr() {
        let result = tool()
            .execute(make_params("echo oops 1>&2"))
            .await
            .unwrap();
        assert!(result.contains("oops"));
    }

    #[tokio::test]
    async fn test_exec_nonzero_exit_reported() {
        let result = tool().execute(make_params("exit 3")).await.unwrap();
        assert!(result.contains("exit code 3"));
    }

    #[tokio::test]
    async fn test_dangerous_command_blocked() {
        let result = tool().execute(make_params("rm -rf /")).await.unwrap();
        assert!(result.contains("blocked by safety guard"));
    }

    #[tokio::test]
    async fn test_shutdown_blocked() {
        let result = tool().execute(make_params("sudo shutdown now")).await.unwrap();
        assert!(result.contains("blocked"));
    }

    #[tokio::test]
    async fn test_traversal_blocked_when_restricted() {
        let restricted = ExecTool::new(std::env::temp_dir(), Some(10), true);
        let result = restricted
            .execute(make_params("cat ../outside.txt"))
            .await
            .unwrap();
        assert!(result.contains("path traversal"));
    }

    #[tokio::test]
    async fn test_timeout_becomes_output() {
        let quick = ExecTool::new(std::env::temp_dir(), Some(1), false);
        let result = quick.execute(make_params("sleep 5")).await.unwrap();
        assert!(result.contains("timed out"));
    }
}
