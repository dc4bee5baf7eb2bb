//! Per-room conversation sessions: JSONL persistence, tool-chain-safe
//! history reads, and long-conversation compaction.

pub mod compactor;
pub mod manager;

pub use compactor::{CompactionConfig, CompactionResult, MemoryFlushHook, SessionCompactor};
pub use manager::{repair_tool_chains, safe_compaction_point, RoomSessionManager};
