//! The runtime configuration record and its JSON persistence.
//!
//! One live instance per process, wrapped in a [`SharedConfig`] and handed
//! to every component. Missing fields fall back to defaults so a partial
//! document still loads; an unparseable document is a startup abort.
//!
//! [`SharedConfig`]: crate::SharedConfig

use crate::error::ConfigError;
use crate::ConfigStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Schema version written to new documents. Bump on incompatible changes.
pub const CONFIG_VERSION: u32 = 1;

/// The mood every resolution falls back to. The expression map must carry
/// an entry for it.
pub const NEUTRAL_MOOD: &str = "neutral";

/// Magnitude ceilings enforced by [`PersonaConfig::validate`]. Values
/// past these overflow timer arithmetic inside the engine.
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 60 * 60;
pub const MAX_COOLDOWN_MINUTES: u64 = 7 * 24 * 60;
pub const MAX_TIMEOUT_SECONDS: u64 = 60 * 60;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub version: u32,
    pub persona: PersonaIdentity,
    pub twitch: TwitchCredentials,
    pub vtube_studio: VtsConfig,
    pub intervals: IntervalBounds,
    pub timeouts: TimeoutConfig,
    pub filters: FilterConfig,
    /// Prompt topics for the monologue loop. Order is not significant and
    /// duplicates are allowed (they weight the random draw).
    pub topics: Vec<String>,
    /// Mood rules, evaluated in order. First match wins.
    pub moods: Vec<MoodRule>,
    /// Mood label → avatar hotkey/expression identifier. A sorted map so
    /// saved documents are deterministic.
    pub expressions: BTreeMap<String, String>,
    pub chat: ChatConfig,
    pub cooldowns: CooldownConfig,
    pub moderation: ModerationConfig,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            persona: PersonaIdentity::default(),
            twitch: TwitchCredentials::default(),
            vtube_studio: VtsConfig::default(),
            intervals: IntervalBounds::default(),
            timeouts: TimeoutConfig::default(),
            filters: FilterConfig::default(),
            topics: vec![
                "Welcome to the stream!".to_string(),
                "Talk about your favorite game.".to_string(),
                "What's your dream vacation?".to_string(),
            ],
            moods: vec![
                MoodRule::new("happy", &["fun", "joke", "celebrate"]),
                MoodRule::new("serious", &["dark", "serious", "deep topic"]),
                MoodRule::new(NEUTRAL_MOOD, &[]),
            ],
            expressions: BTreeMap::from([
                ("happy".to_string(), "expressionSmile".to_string()),
                ("serious".to_string(), "expressionSad".to_string()),
                (NEUTRAL_MOOD.to_string(), "expressionNeutral".to_string()),
            ]),
            chat: ChatConfig::default(),
            cooldowns: CooldownConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }
}

impl PersonaConfig {
    /// Load a document from disk. `Ok(None)` means the file does not
    /// exist; any other failure (unreadable, not JSON) is an error the
    /// caller must decide about. Env var overrides are applied after a
    /// successful parse.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>, ConfigError> {
        let path = path.as_ref();
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let mut config: PersonaConfig =
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.apply_env_overrides();
        Ok(Some(config))
    }

    /// Load from `path`, or write defaults there when the file is missing.
    /// Returns `(config, created)` where `created` reports whether a new
    /// document was written. A document that exists but cannot be parsed
    /// propagates its error; the broken file is left on disk untouched.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<(Self, bool), ConfigError> {
        let path = path.as_ref();
        match Self::load(path)? {
            Some(config) => Ok((config, false)),
            None => {
                tracing::warn!(
                    "no config at {}, writing defaults - fill this out",
                    path.display()
                );
                let mut config = Self::default();
                config.apply_env_overrides();
                config.save(path)?;
                Ok((config, true))
            }
        }
    }

    /// Persist as pretty-printed JSON. Field order follows declaration
    /// order, so repeated saves of the same config are byte-identical.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut body = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        body.push('\n');
        std::fs::write(path, body).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Check the invariants a running engine relies on. Called once at
    /// startup (abort on failure) and again on hot reload (reject the
    /// reloaded document, keep the current one).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.intervals.min_seconds > self.intervals.max_seconds {
            return Err(ConfigError::Invalid(format!(
                "intervals.min_seconds ({}) exceeds intervals.max_seconds ({})",
                self.intervals.min_seconds, self.intervals.max_seconds
            )));
        }
        if self.intervals.max_seconds > MAX_INTERVAL_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "intervals.max_seconds ({}) exceeds the supported maximum ({MAX_INTERVAL_SECONDS})",
                self.intervals.max_seconds
            )));
        }
        if self.chat.max_recent_messages == 0 {
            return Err(ConfigError::Invalid(
                "chat.max_recent_messages must be positive".to_string(),
            ));
        }
        if !self.expressions.contains_key(NEUTRAL_MOOD) {
            return Err(ConfigError::Invalid(format!(
                "expressions must contain a \"{NEUTRAL_MOOD}\" entry"
            )));
        }
        if self.timeouts.generation_seconds == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.generation_seconds must be positive".to_string(),
            ));
        }
        if self.timeouts.auth_ack_seconds == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.auth_ack_seconds must be positive".to_string(),
            ));
        }
        if self.timeouts.generation_seconds > MAX_TIMEOUT_SECONDS
            || self.timeouts.auth_ack_seconds > MAX_TIMEOUT_SECONDS
        {
            return Err(ConfigError::Invalid(format!(
                "timeouts must not exceed {MAX_TIMEOUT_SECONDS} seconds"
            )));
        }
        if self.cooldowns.topic_cooldown_minutes > MAX_COOLDOWN_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "cooldowns.topic_cooldown_minutes ({}) exceeds the supported maximum ({MAX_COOLDOWN_MINUTES})",
                self.cooldowns.topic_cooldown_minutes
            )));
        }
        if self.version > CONFIG_VERSION {
            tracing::warn!(
                "config version {} is newer than supported version {}",
                self.version,
                CONFIG_VERSION
            );
        }
        for rule in &self.moods {
            if rule.label != NEUTRAL_MOOD && !self.expressions.contains_key(&rule.label) {
                tracing::warn!(
                    "mood \"{}\" has no expression mapping; it will fall back to {NEUTRAL_MOOD}",
                    rule.label
                );
            }
        }
        Ok(())
    }

    /// Expression identifier for a mood, falling back to the neutral entry.
    pub fn expression_for(&self, mood: &str) -> Option<&str> {
        self.expressions
            .get(mood)
            .or_else(|| self.expressions.get(NEUTRAL_MOOD))
            .map(String::as_str)
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("VESPERA_TWITCH_OAUTH_TOKEN") {
            self.twitch.oauth_token = v;
        }
        if let Ok(v) = std::env::var("VESPERA_VTS_HOST") {
            self.vtube_studio.host = v;
        }
        if let Ok(v) = std::env::var("VESPERA_VTS_PORT") {
            if let Ok(port) = v.parse() {
                self.vtube_studio.port = port;
            }
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaIdentity {
    /// Display name, also the mention alias viewers use to address the
    /// persona in chat.
    pub name: String,
}

impl Default for PersonaIdentity {
    fn default() -> Self {
        Self {
            name: "Vespera".to_string(),
        }
    }
}

/// Opaque platform credentials, carried for the platform bridge. The
/// engine never interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchCredentials {
    pub channel: String,
    pub bot_name: String,
    pub oauth_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VtsConfig {
    pub host: String,
    pub port: u16,
    /// Plugin identity sent in the authentication handshake.
    pub plugin_name: String,
    pub plugin_developer: String,
    /// When true (default) the session waits for an explicit
    /// authentication acknowledgement before sending commands. Relax to
    /// false for servers that never answer the handshake.
    pub wait_for_auth_ack: bool,
}

impl Default for VtsConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8001,
            plugin_name: "Vespera".to_string(),
            plugin_developer: "Vespera Project".to_string(),
            wait_for_auth_ack: true,
        }
    }
}

/// Bounds for the randomized monologue interval, in seconds. The delay is
/// drawn uniformly from `[min_seconds, max_seconds]` on every cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalBounds {
    pub min_seconds: u64,
    pub max_seconds: u64,
}

impl Default for IntervalBounds {
    fn default() -> Self {
        Self {
            min_seconds: 300,
            max_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound on one oracle call. A slower generation is a skipped
    /// cycle, not a stalled loop.
    pub generation_seconds: u64,
    /// Upper bound on the authentication acknowledgement wait.
    pub auth_ack_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            generation_seconds: 30,
            auth_ack_seconds: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Lower-cased substring matches against inbound chat. Replace the
    /// placeholders with a real word list.
    pub banned_words: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            banned_words: vec!["slur1".to_string(), "slur2".to_string()],
        }
    }
}

/// One mood rule: the label plus the trigger substrings that select it.
/// Rules are evaluated in list order, first match wins, so put the more
/// specific moods first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoodRule {
    pub label: String,
    pub triggers: Vec<String>,
}

impl MoodRule {
    pub fn new(label: &str, triggers: &[&str]) -> Self {
        Self {
            label: label.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Capacity of the rolling chat buffer. Must be positive.
    pub max_recent_messages: usize,
    /// Messages containing one of these are surfaced in the log so the
    /// operator notices them.
    pub priority_keywords: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_recent_messages: 20,
            priority_keywords: vec![
                "question".to_string(),
                "important".to_string(),
                "urgent".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    /// How long a spoken topic rests before it becomes selectable again.
    pub topic_cooldown_minutes: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            topic_cooldown_minutes: 10,
        }
    }
}

/// Advisory moderation flags. The filter itself always runs; these only
/// describe what the platform bridge should do with rejects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    pub auto_moderate: bool,
    pub delete_filtered_messages: bool,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            auto_moderate: true,
            delete_filtered_messages: true,
        }
    }
}

// ============================================================================
// File-backed store
// ============================================================================

/// [`ConfigStore`] backed by a flat JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersonaConfig>, ConfigError> {
        PersonaConfig::load(&self.path)
    }

    fn save(&self, config: &PersonaConfig) -> Result<(), ConfigError> {
        config.save(&self.path)
    }
}

// ============================================================================
// Tests
// ============================================================================
