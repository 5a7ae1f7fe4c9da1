//! The persona engine: topic scheduling, mood tracking, chat ingestion,
//! and the autonomous dialogue loop that ties them together.

pub mod chat;
pub mod engine;
pub mod moderation;
pub mod mood;
pub mod topics;

pub use chat::{has_priority_keyword, mentions, ChatLog};
pub use engine::{EngineEvent, EngineHandle, EnginePhase, PersonaEngine};
pub use moderation::passes_filter;
pub use mood::resolve_mood;
pub use topics::TopicScheduler;
