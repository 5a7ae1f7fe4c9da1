//! Topic selection with per-topic cooldowns.
//!
//! Every picked topic rests for the configured cooldown before it can be
//! picked again. When everything is resting the whole cooldown set is
//! cleared and the pick is retried against the full list, so a short
//! topic list keeps working instead of starving the dialogue loop.

use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;
use vespera_core::EngineError;

pub struct TopicScheduler {
    cooldown: Duration,
    cooling: HashSet<String>,
    timers: JoinSet<String>,
}

impl TopicScheduler {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            cooling: HashSet::new(),
            timers: JoinSet::new(),
        }
    }

    /// Pick a topic uniformly at random from the eligible subset of
    /// `topics` and start its cooldown.
    ///
    /// An empty topic list is a configuration error. When every topic is
    /// on cooldown, the cooldown set is cleared and the pick falls back
    /// to the full list; that fallback pick does not re-enter cooldown,
    /// matching the reset-then-reuse behavior operators expect from a
    /// list shorter than the rotation window.
    pub fn pick(&mut self, topics: &[String]) -> Result<String, EngineError> {
        if topics.is_empty() {
            return Err(EngineError::Configuration(
                "topic list is empty".to_string(),
            ));
        }

        let available: Vec<&String> = topics
            .iter()
            .filter(|t| !self.cooling.contains(t.as_str()))
            .collect();

        if available.is_empty() {
            debug!("all topics on cooldown, resetting the cooldown set");
            self.reset();
            let idx = rand::thread_rng().gen_range(0..topics.len());
            return Ok(topics[idx].clone());
        }

        let idx = rand::thread_rng().gen_range(0..available.len());
        let topic = available[idx].clone();
        self.begin_cooldown(topic.clone());
        Ok(topic)
    }

    fn begin_cooldown(&mut self, topic: String) {
        // A zero cooldown means topics never rest.
        if self.cooldown.is_zero() {
            return;
        }
        self.cooling.insert(topic.clone());
        let cooldown = self.cooldown;
        self.timers.spawn(async move {
            tokio::time::sleep(cooldown).await;
            topic
        });
    }

    /// Await the next elapsed cooldown timer, skipping aborted ones.
    /// Resolves to `None` once no timers remain; callers guard the
    /// select arm with [`has_pending_timers`](Self::has_pending_timers).
    pub async fn next_expired(&mut self) -> Option<String> {
        while let Some(result) = self.timers.join_next().await {
            if let Ok(topic) = result {
                return Some(topic);
            }
        }
        None
    }

    pub fn has_pending_timers(&self) -> bool {
        !self.timers.is_empty()
    }

    /// Restore a topic's eligibility. Called by the owner when its
    /// cooldown timer fires; unknown topics are a no-op.
    pub fn expire(&mut self, topic: &str) {
        if self.cooling.remove(topic) {
            debug!(topic = %topic, "topic cooldown expired");
        }
    }

    pub fn is_cooling(&self, topic: &str) -> bool {
        self.cooling.contains(topic)
    }

    pub fn cooling_count(&self) -> usize {
        self.cooling.len()
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    /// Clear the cooldown set and cancel the outstanding timers.
    pub fn reset(&mut self) {
        self.cooling.clear();
        self.timers.abort_all();
    }
}
