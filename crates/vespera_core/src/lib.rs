pub mod config;
pub mod error;

pub use config::{
    JsonFileStore, MoodRule, PersonaConfig, CONFIG_VERSION, MAX_COOLDOWN_MINUTES,
    MAX_INTERVAL_SECONDS, MAX_TIMEOUT_SECONDS, NEUTRAL_MOOD,
};
pub use error::{ConfigError, EngineError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The live configuration, shared by reference across every component.
/// Constructed exactly once at startup and passed into constructors.
pub type SharedConfig = Arc<tokio::sync::RwLock<PersonaConfig>>;

/// A chat message from the streaming platform, already decoded by the
/// platform bridge. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display name of the sender. Platforms do not always provide one.
    pub sender: Option<String>,
    pub text: String,
    /// Unix timestamp of arrival.
    pub received_at: i64,
}

impl ChatMessage {
    pub fn new(sender: Option<String>, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            received_at: chrono::Utc::now().timestamp(),
        }
    }

    /// Display name, or a stand-in for senders that did not provide one.
    pub fn sender_name(&self) -> &str {
        self.sender.as_deref().unwrap_or("anonymous")
    }
}

/// The external text-generation collaborator. Opaque to the engine: it
/// receives a prompt and eventually produces text or an error. Callers
/// are responsible for bounding it with a timeout.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Where the persona's spoken/written output is delivered (chat overlay,
/// TTS pipeline, terminal, ...).
#[async_trait]
pub trait TextOutlet: Send + Sync {
    async fn send_text(&self, text: &str) -> anyhow::Result<()>;
}

/// Receives mood labels and turns them into avatar expression changes.
/// Delivery is best-effort: implementations may drop a change when the
/// avatar transport is not ready.
#[async_trait]
pub trait ExpressionSink: Send + Sync {
    async fn set_expression(&self, mood: &str);
}

/// The configuration persistence collaborator. `load` distinguishes a
/// missing document (`Ok(None)`) from an unreadable or unparseable one.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<Option<PersonaConfig>, ConfigError>;
    fn save(&self, config: &PersonaConfig) -> Result<(), ConfigError>;
}
