//! Context builder — constructs the system prompt and conversation
//! messages for a bot.
//!
//! The system prompt layers: identity, the bot's personality (with
//! optional `bots/<name>/SOUL.md` and `AGENTS.md` overrides from the
//! workspace), the memory context block, and the bot's tool surface.

use std::path::PathBuf;

use chrono::Utc;
use tracing::debug;

use crewbot_core::types::{ContentPart, ImageUrl, Message, ToolCall};

use crate::bots::BotProfile;

/// Builds system prompts and message lists for the agent loop.
pub struct ContextBuilder {
    /// Root workspace directory.
    workspace: PathBuf,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &std::path::Path {
        &self.workspace
    }

    // ────────────── System prompt ──────────────

    /// Build the full system prompt for one bot.
    pub fn build_system_prompt(
        &self,
        bot: &BotProfile,
        memory_context: Option<&str>,
        permitted_tools: &[String],
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(self.build_identity(bot));

        // Per-bot soul/instruction files override the built-in blurb.
        if let Some(soul) = self.load_bot_file(&bot.name, "SOUL.md") {
            parts.push(format!("## Personality\n\n{soul}"));
        }
        if let Some(agents) = self.load_bot_file(&bot.name, "AGENTS.md") {
            parts.push(format!("## Operating Instructions\n\n{agents}"));
        }

        if let Some(memory) = memory_context {
            if !memory.trim().is_empty() {
                parts.push(format!("# Memory Context\n\n{memory}"));
            }
        }

        if !permitted_tools.is_empty() {
            parts.push(format!(
                "# Tools\n\nYou can use these tools: {}.\n\
                 Prefer tools over guessing; cite tool results when you use them.",
                permitted_tools.join(", ")
            ));
        }

        parts.join("\n\n---\n\n")
    }

    /// Core identity block.
    fn build_identity(&self, bot: &BotProfile) -> String {
        let now = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let os = std::env::consts::OS;
        let arch = std::env::consts::ARCH;
        let workspace = self.workspace.display();

        format!(
            "# Identity\n\n\
             You are **{name}**, part of a crew of assistant bots sharing rooms with the user.\n\
             {personality}\n\n\
             - **Date/time**: {now}\n\
             - **Runtime**: Rust on {os}/{arch}\n\
             - **Workspace**: `{workspace}`\n\n\
             Messages in a room may mention teammates with @name; answer for yourself \
             and delegate with the `invoke` tool when a teammate fits better. \
             Be concise and helpful.",
            name = bot.name,
            personality = bot.personality,
        )
    }

    /// Load `bots/<bot>/<file>` from the workspace, if present.
    fn load_bot_file(&self, bot_name: &str, file: &str) -> Option<String> {
        let path = self.workspace.join("bots").join(bot_name).join(file);
        if !path.is_file() {
            return None;
        }
        let content = std::fs::read_to_string(&path).ok()?;
        if content.trim().is_empty() {
            return None;
        }
        debug!(bot = bot_name, file = file, "loaded bot file");
        Some(content)
    }

    // ────────────── Message building ──────────────

    /// Build the full message list for an LLM call:
    /// system prompt + session history + current user message.
    #[allow(clippy::too_many_arguments)]
    pub fn build_messages(
        &self,
        system_prompt: &str,
        history: &[Message],
        user_text: &str,
        media: &[String],
        channel: &str,
        chat_id: &str,
        room_id: Option<&str>,
    ) -> Vec<Message> {
        let mut messages = Vec::new();

        let mut system = system_prompt.to_string();
        system.push_str(&format!(
            "\n\n## Current Session\nChannel: {channel}\nChat ID: {chat_id}"
        ));
        if let Some(room) = room_id {
            system.push_str(&format!("\nRoom: {room}"));
        }
        messages.push(Message::system(system));

        messages.extend_from_slice(history);

        if media.is_empty() {
            messages.push(Message::user(user_text));
        } else {
            messages.push(build_multimodal_user_message(user_text, media));
        }

        messages
    }

    /// Add a tool result to the message list.
    pub fn add_tool_result(messages: &mut Vec<Message>, tool_call_id: &str, result: &str) {
        messages.push(Message::tool_result(tool_call_id, result));
    }

    /// Add an assistant message, preserving tool calls and reasoning.
    pub fn add_assistant_message(
        messages: &mut Vec<Message>,
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
        reasoning_content: Option<String>,
    ) {
        if tool_calls.is_empty() {
            if let Some(text) = content {
                messages.push(Message::Assistant {
                    content: Some(text),
                    tool_calls: None,
                    reasoning_content,
                });
            }
        } else {
            messages.push(Message::Assistant {
                content,
                tool_calls: Some(tool_calls),
                reasoning_content,
            });
        }
    }
}

// ─────────────────────────────────────────────
// Multimodal helpers
// ─────────────────────────────────────────────

/// Build a user message with base64-encoded images.
///
/// Audio files are skipped — their transcription is already in the text.
fn build_multimodal_user_message(text: &str, media_paths: &[String]) -> Message {
    let mut parts = Vec::new();

    for path in media_paths {
        if is_audio_extension(path) {
            continue;
        }
        if let Ok(data) = std::fs::read(path) {
            let mime = guess_mime(path);
            let b64 = base64_encode(&data);
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:{mime};base64,{b64}"),
                    detail: None,
                },
            });
        }
    }

    parts.push(ContentPart::Text {
        text: text.to_string(),
    });

    Message::user_parts(parts)
}

/// Check if a file path has an audio extension.
fn is_audio_extension(path: &str) -> bool {
    let lower = path.to_lowercase();
    [".ogg", ".oga", ".opus", ".mp3", ".m4a", ".wav", ".flac", ".aac", ".wma", ".webm"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

/// Simple MIME guesser based on extension.
fn guess_mime(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".gif") {
        "image/gif"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else if lower.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "image/jpeg"
    }
}

/// Base64-encode bytes (standard alphabet, padded).
fn base64_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = Vec::with_capacity((data.len() + 2) / 3 * 4);
    for chunk in data.chunks(3) {
        let b0 = chunk[0] as u32;
        let b1 = if chunk.len() > 1 { chunk[1] as u32 } else { 0 };
        let b2 = if chunk.len() > 2 { chunk[2] as u32 } else { 0 };
        let triple = (b0 << 16) | (b1 << 8) | b2;
        out.push(ALPHABET[((triple >> 18) & 0x3F) as usize]);
        out.push(ALPHABET[((triple >> 12) & 0x3F) as usize]);
        if chunk.len() > 1 {
            out.push(ALPHABET[((triple >> 6) & 0x3F) as usize]);
        } else {
            out.push(b'=');
        }
        if chunk.len() > 2 {
            out.push(ALPHABET[(triple & 0x3F) as usize]);
        } else {
            out.push(b'=');
        }
    }
    String::from_utf8(out).unwrap_or_default()
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
