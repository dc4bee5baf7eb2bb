//! The smart router: a fast local classifier, sticky tier retention,
//! an LLM fallback for uncertain cases, and an auto-calibration loop
//! that learns new patterns from observed LLM classifications.

pub mod calibration;
pub mod classifier;
pub mod llm;
pub mod models;
pub mod stage;
pub mod sticky;

pub use classifier::ClientSideClassifier;
pub use llm::LlmRouter;
pub use models::{ClassificationScores, RoutingDecision, RoutingPattern, RoutingTier};
pub use stage::{ModelSelection, RoutingStage};
pub use sticky::StickyRouter;
