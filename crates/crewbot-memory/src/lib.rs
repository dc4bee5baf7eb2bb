//! Durable per-workspace memory: an event/entity/edge/fact/learning
//! store on SQLite, pluggable embedding and extraction providers, a
//! feedback-driven learning lifecycle, and an activity-gated background
//! processor.

pub mod background;
pub mod embeddings;
pub mod extraction;
pub mod learning;
pub mod models;
pub mod preferences;
pub mod retrieval;
pub mod store;
pub mod summaries;

pub use background::{ActivityTracker, BackgroundProcessor};
pub use embeddings::{cosine_similarity, pack_embedding, unpack_embedding, Embedder, HashingEmbedder};
pub use extraction::{ExtractionResult, Extractor, PatternExtractor};
pub use learning::{FeedbackDetector, LearningManager};
pub use models::{Edge, Entity, Event, ExtractionStatus, Fact, Learning, Sentiment, SummaryNode};
pub use preferences::PreferencesAggregator;
pub use retrieval::MemoryRetrieval;
pub use store::MemoryStore;
pub use summaries::SummaryTreeManager;
