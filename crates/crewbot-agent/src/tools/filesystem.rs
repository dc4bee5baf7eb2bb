//! Filesystem tools — read, write, edit, list directory.
//!
//! Access is governed by a shared [`PathPolicy`]: either workspace-only,
//! or an explicit allowed-paths whitelist. Protected paths are blocked
//! even when they sit inside an allowed prefix.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::base::{require_string, Tool};
use crewbot_core::utils::expand_home;

// ─────────────────────────────────────────────
// PathPolicy
// ─────────────────────────────────────────────

/// Where the filesystem tools may reach.
pub struct PathPolicy {
    /// When set, only this directory (the workspace) is accessible.
    workspace_only: Option<PathBuf>,
    /// Explicit whitelist used when not workspace-restricted. Empty
    /// whitelist = everywhere (minus protected paths).
    allowed_paths: Vec<PathBuf>,
    /// Blacklist enforced even inside allowed paths.
    protected_paths: Vec<PathBuf>,
}

impl PathPolicy {
    /// Unrestricted access (still honoring protected paths).
    pub fn open(protected_paths: Vec<PathBuf>) -> Arc<Self> {
        Arc::new(PathPolicy {
            workspace_only: None,
            allowed_paths: Vec::new(),
            protected_paths,
        })
    }

    /// Workspace-only access.
    pub fn workspace(workspace: PathBuf, protected_paths: Vec<PathBuf>) -> Arc<Self> {
        Arc::new(PathPolicy {
            workspace_only: Some(workspace),
            allowed_paths: Vec::new(),
            protected_paths,
        })
    }

    /// Whitelist access.
    pub fn allowlist(allowed_paths: Vec<PathBuf>, protected_paths: Vec<PathBuf>) -> Arc<Self> {
        Arc::new(PathPolicy {
            workspace_only: None,
            allowed_paths,
            protected_paths,
        })
    }

    /// Resolve a user-supplied path and enforce the policy.
    pub fn resolve(&self, path: &str) -> anyhow::Result<PathBuf> {
        let expanded = expand_home(path);

        // Canonicalize what exists; for new files, canonicalize the parent.
        let resolved = if expanded.exists() {
            expanded.canonicalize().unwrap_or(expanded)
        } else if let Some(parent) = expanded.parent() {
            if parent.exists() {
                let canon = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
                match expanded.file_name() {
                    Some(name) => canon.join(name),
                    None => expanded,
                }
            } else {
                expanded
            }
        } else {
            expanded
        };

        // Protected paths always win.
        for protected in &self.protected_paths {
            if resolved.starts_with(canonical_or(protected)) {
                anyhow::bail!(
                    "Access denied: path '{}' is protected",
                    resolved.display()
                );
            }
        }

        if let Some(workspace) = &self.workspace_only {
            if !resolved.starts_with(canonical_or(workspace)) {
                anyhow::bail!(
                    "Access denied: path '{}' is outside the workspace '{}'",
                    resolved.display(),
                    workspace.display()
                );
            }
        } else if !self.allowed_paths.is_empty() {
            let allowed = self
                .allowed_paths
                .iter()
                .any(|prefix| resolved.starts_with(canonical_or(prefix)));
            if !allowed {
                anyhow::bail!(
                    "Access denied: path '{}' is not in the allowed paths",
                    resolved.display()
                );
            }
        }

        Ok(resolved)
    }
}

fn canonical_or(path: &Path) -> PathBuf {
    if path.exists() {
        path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
    } else {
        path.to_path_buf()
    }
}

// ─────────────────────────────────────────────
// ReadFileTool
// ─────────────────────────────────────────────

/// Reads and returns the entire content of a file.
pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file at the given path. Returns the full text content."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path to the file to read"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let path = self.policy.resolve(&path_str)?;

        if !path.exists() {
            anyhow::bail!("File not found: {}", path.display());
        }
        if !path.is_file() {
            anyhow::bail!("Not a file: {}", path.display());
        }

        std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))
    }
}

// ─────────────────────────────────────────────
// WriteFileTool
// ─────────────────────────────────────────────

/// Creates or overwrites a file with the given content.
pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it if it doesn't exist or overwriting if it does. \
         Parent directories are created automatically."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or relative path for the file"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let content = require_string(&params, "content")?;
        let path = self.policy.resolve(&path_str)?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create directory {}: {e}", parent.display())
                })?;
            }
        }

        let bytes = content.len();
        std::fs::write(&path, &content)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        Ok(format!("Successfully wrote {bytes} bytes to {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// EditFileTool
// ─────────────────────────────────────────────

/// Replaces a text snippet within a file (single occurrence).
pub struct EditFileTool {
    policy: Arc<PathPolicy>,
}

impl EditFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing the first occurrence of `old_text` with `new_text`. \
         Include enough context in `old_text` to uniquely identify the replacement site."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "Exact text to find (include surrounding context for uniqueness)"
                },
                "new_text": {
                    "type": "string",
                    "description": "Text to replace old_text with"
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let old_text = require_string(&params, "old_text")?;
        let new_text = require_string(&params, "new_text")?;
        let path = self.policy.resolve(&path_str)?;

        if !path.is_file() {
            anyhow::bail!("File not found: {}", path.display());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

        let count = content.matches(&old_text).count();
        if count == 0 {
            anyhow::bail!("old_text not found in {}", path.display());
        }

        let mut warning = String::new();
        if count > 1 {
            warning = format!(
                "Warning: old_text appears {count} times; only the first occurrence was replaced. "
            );
        }

        let updated = content.replacen(&old_text, &new_text, 1);
        std::fs::write(&path, &updated)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;

        Ok(format!("{warning}Successfully edited {}", path.display()))
    }
}

// ─────────────────────────────────────────────
// ListDirTool
// ─────────────────────────────────────────────

/// Lists the contents of a directory.
pub struct ListDirTool {
    policy: Arc<PathPolicy>,
}

impl ListDirTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List the contents of a directory. Returns file and folder names with type indicators."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the directory to list"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<String> {
        let path_str = require_string(&params, "path")?;
        let path = self.policy.resolve(&path_str)?;

        if !path.is_dir() {
            anyhow::bail!("Not a directory: {}", path.display());
        }

        let mut dir_entries: Vec<_> = std::fs::read_dir(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read directory {}: {e}", path.display()))?
            .filter_map(|e| e.ok())
            .collect();
        dir_entries.sort_by_key(|e| e.file_name());

        let mut entries: Vec<String> = Vec::new();
        for entry in dir_entries {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);
            if is_dir {
                entries.push(format!("📁 {name}"));
            } else {
                entries.push(format!("📄 {name}"));
            }
        }

        if entries.is_empty() {
            Ok("(empty directory)".into())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
