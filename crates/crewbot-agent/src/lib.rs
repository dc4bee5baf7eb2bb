//! The agent: per-message reasoning loop, context assembly, bot
//! dispatch, secret sanitization, and the tool registry.

pub mod agent_loop;
pub mod bots;
pub mod context;
pub mod dispatch;
pub mod reasoning;
pub mod sanitizer;
pub mod tools;

pub use agent_loop::AgentLoop;
pub use bots::{BotProfile, BotRegistry};
pub use dispatch::{BotDispatch, DispatchResult, DispatchTarget};
pub use sanitizer::SecretSanitizer;
