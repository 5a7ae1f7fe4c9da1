//! The dialogue loop and inbound event router.
//!
//! One task owns all mutable engine state (phase, chat buffer, topic
//! cooldowns) and drives everything through a single `select!` loop, so
//! no state mutation ever interleaves with another. Oracle calls and
//! cooldown timers run as spawned tasks that report back over channels;
//! they never touch engine state directly.

use crate::chat::{has_priority_keyword, mentions, ChatLog};
use crate::moderation::passes_filter;
use crate::mood::resolve_mood;
use crate::topics::TopicScheduler;
use rand::Rng;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vespera_core::{
    ChatMessage, ConfigStore, ExpressionSink, Oracle, SharedConfig, TextOutlet, NEUTRAL_MOOD,
};

const EVENT_QUEUE: usize = 64;
const OUTCOME_QUEUE: usize = 32;

/// Extra slack on top of the per-call generation timeout before the loop
/// itself gives up on a cycle. The task-level timeout normally wins; the
/// loop deadline only catches a wedged task.
const GENERATION_GRACE: Duration = Duration::from_secs(1);

type Timer = Pin<Box<Sleep>>;

/// Inbound events accepted by the engine.
#[derive(Debug)]
pub enum EngineEvent {
    /// A decoded chat message from the streaming platform.
    Chat(ChatMessage),
    /// Force a monologue cycle now instead of waiting for the timer.
    SpeakNow,
    /// Append a topic to the rotation and persist the configuration.
    AddTopic(String),
    /// Re-read the configuration from the store.
    ReloadConfig,
}

/// Where the dialogue loop currently is. `Waiting` means the cycle timer
/// is armed; `Generating` means a monologue request is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Waiting,
    Generating,
}

enum GenKind {
    Monologue { topic: String },
    Reply { viewer: String },
}

struct GenOutcome {
    id: Uuid,
    kind: GenKind,
    result: anyhow::Result<String>,
}

// ============================================================================
// Handle
// ============================================================================

/// Owner-side handle to a running engine. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) stops the engine task.
#[derive(Debug)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
    shutdown: watch::Sender<bool>,
    mood: watch::Receiver<String>,
    phase: watch::Receiver<EnginePhase>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Submit a chat message for filtering and ingestion. Returns false
    /// once the engine has stopped.
    pub async fn submit_chat(&self, message: ChatMessage) -> bool {
        self.send(EngineEvent::Chat(message)).await
    }

    pub async fn speak_now(&self) -> bool {
        self.send(EngineEvent::SpeakNow).await
    }

    pub async fn add_topic(&self, topic: impl Into<String>) -> bool {
        self.send(EngineEvent::AddTopic(topic.into())).await
    }

    pub async fn reload_config(&self) -> bool {
        self.send(EngineEvent::ReloadConfig).await
    }

    async fn send(&self, event: EngineEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    /// The mood most recently assigned by a completed cycle.
    pub fn current_mood(&self) -> String {
        self.mood.borrow().clone()
    }

    pub fn subscribe_mood(&self) -> watch::Receiver<String> {
        self.mood.clone()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<EnginePhase> {
        self.phase.clone()
    }

    /// Signal shutdown and wait for the engine task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("engine task ended abnormally: {e}");
            }
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct PersonaEngine {
    config: SharedConfig,
    store: Arc<dyn ConfigStore>,
    oracle: Arc<dyn Oracle>,
    outlet: Arc<dyn TextOutlet>,
    expressions: Arc<dyn ExpressionSink>,
    scheduler: TopicScheduler,
    chat: ChatLog,
    phase: EnginePhase,
    /// Request id of the in-flight monologue, if any. Results with any
    /// other id are stale and dropped.
    pending: Option<Uuid>,
    mood_tx: watch::Sender<String>,
    phase_tx: watch::Sender<EnginePhase>,
    events_rx: mpsc::Receiver<EngineEvent>,
    outcome_tx: mpsc::Sender<GenOutcome>,
    outcome_rx: mpsc::Receiver<GenOutcome>,
    shutdown_rx: watch::Receiver<bool>,
    generations: JoinSet<()>,
}

impl PersonaEngine {
    /// Build an engine from its collaborators and start its task.
    pub async fn spawn(
        config: SharedConfig,
        store: Arc<dyn ConfigStore>,
        oracle: Arc<dyn Oracle>,
        outlet: Arc<dyn TextOutlet>,
        expressions: Arc<dyn ExpressionSink>,
    ) -> EngineHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (mood_tx, mood_rx) = watch::channel(NEUTRAL_MOOD.to_string());
        let (phase_tx, phase_rx) = watch::channel(EnginePhase::Waiting);

        let (capacity, cooldown) = {
            let cfg = config.read().await;
            (
                cfg.chat.max_recent_messages,
                Duration::from_secs(cfg.cooldowns.topic_cooldown_minutes.saturating_mul(60)),
            )
        };

        let engine = PersonaEngine {
            config,
            store,
            oracle,
            outlet,
            expressions,
            scheduler: TopicScheduler::new(cooldown),
            chat: ChatLog::new(capacity),
            phase: EnginePhase::Waiting,
            pending: None,
            mood_tx,
            phase_tx,
            events_rx,
            outcome_tx,
            outcome_rx,
            shutdown_rx,
            generations: JoinSet::new(),
        };

        let task = tokio::spawn(engine.run());
        EngineHandle {
            events: events_tx,
            shutdown: shutdown_tx,
            mood: mood_rx,
            phase: phase_rx,
            task,
        }
    }

    async fn run(mut self) {
        info!("persona engine running");
        let initial = self.draw_interval().await;
        debug!(seconds = initial.as_secs(), "first monologue scheduled");
        let mut cycle: Timer = Box::pin(tokio::time::sleep(initial));
        let mut gen_deadline: Timer = Box::pin(tokio::time::sleep(Duration::ZERO));

        loop {
            let waiting = self.phase == EnginePhase::Waiting;
            let generating = self.phase == EnginePhase::Generating;
            let timers_pending = self.scheduler.has_pending_timers();
            let tasks_pending = !self.generations.is_empty();

            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        info!("shutdown requested");
                        break;
                    }
                }
                _ = cycle.as_mut(), if waiting => {
                    self.start_cycle(&mut cycle, &mut gen_deadline).await;
                }
                _ = gen_deadline.as_mut(), if generating => {
                    warn!("generation missed its deadline, skipping this cycle");
                    self.pending = None;
                    self.enter_waiting(&mut cycle).await;
                }
                Some(outcome) = self.outcome_rx.recv() => {
                    self.handle_outcome(outcome, &mut cycle).await;
                }
                maybe_event = self.events_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            self.handle_event(event, &mut cycle, &mut gen_deadline).await;
                        }
                        None => {
                            info!("event channel closed, stopping");
                            break;
                        }
                    }
                }
                Some(topic) = self.scheduler.next_expired(), if timers_pending => {
                    self.scheduler.expire(&topic);
                }
                Some(joined) = self.generations.join_next(), if tasks_pending => {
                    if let Err(e) = joined {
                        if !e.is_cancelled() {
                            warn!("generation task aborted: {e}");
                        }
                    }
                }
            }
        }

        self.generations.abort_all();
        self.scheduler.reset();
        info!("persona engine stopped");
    }

    /// Pick a topic, announce it, and launch the generation request.
    /// Leaves the engine in `Generating` on success, `Waiting` (re-armed)
    /// when no topic could be picked.
    async fn start_cycle(&mut self, cycle: &mut Timer, gen_deadline: &mut Timer) {
        let (topics, persona, timeout) = {
            let cfg = self.config.read().await;
            (
                cfg.topics.clone(),
                cfg.persona.name.clone(),
                Duration::from_secs(cfg.timeouts.generation_seconds),
            )
        };

        let topic = match self.scheduler.pick(&topics) {
            Ok(topic) => topic,
            Err(e) => {
                warn!("no monologue this cycle: {e}");
                self.enter_waiting(cycle).await;
                return;
            }
        };

        info!(topic = %topic, "monologue cycle started");
        self.deliver(&format!("(System: AI starts a monologue about: {topic})"))
            .await;

        let id = Uuid::new_v4();
        self.pending = Some(id);
        self.set_phase(EnginePhase::Generating);
        gen_deadline
            .as_mut()
            .reset(tokio::time::Instant::now() + timeout + GENERATION_GRACE);

        let prompt = monologue_prompt(&persona, &topic);
        self.spawn_generation(id, GenKind::Monologue { topic }, prompt, timeout);
    }

    fn spawn_generation(&mut self, id: Uuid, kind: GenKind, prompt: String, timeout: Duration) {
        let oracle = Arc::clone(&self.oracle);
        let tx = self.outcome_tx.clone();
        self.generations.spawn(async move {
            let result = match tokio::time::timeout(timeout, oracle.generate(&prompt)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "generation timed out after {}s",
                    timeout.as_secs()
                )),
            };
            let _ = tx.send(GenOutcome { id, kind, result }).await;
        });
    }

    async fn handle_outcome(&mut self, outcome: GenOutcome, cycle: &mut Timer) {
        match outcome.kind {
            GenKind::Monologue { topic } => {
                if self.pending != Some(outcome.id) {
                    debug!(request = %outcome.id, "discarding stale monologue result");
                    return;
                }
                self.pending = None;

                match outcome.result {
                    Ok(text) => {
                        self.deliver(&text).await;
                        let mood = {
                            let cfg = self.config.read().await;
                            resolve_mood(&cfg.moods, &topic).to_string()
                        };
                        info!(topic = %topic, mood = %mood, "monologue cycle complete");
                        let _ = self.mood_tx.send(mood.clone());
                        self.expressions.set_expression(&mood).await;
                    }
                    Err(e) => warn!(topic = %topic, "monologue generation failed: {e:#}"),
                }
                self.enter_waiting(cycle).await;
            }
            GenKind::Reply { viewer } => match outcome.result {
                Ok(text) => self.deliver(&text).await,
                Err(e) => warn!(viewer = %viewer, "viewer reply failed: {e:#}"),
            },
        }
    }

    async fn handle_event(
        &mut self,
        event: EngineEvent,
        cycle: &mut Timer,
        gen_deadline: &mut Timer,
    ) {
        match event {
            EngineEvent::Chat(message) => self.ingest_chat(message).await,
            EngineEvent::SpeakNow => {
                if self.phase == EnginePhase::Generating {
                    debug!("speak-now ignored, a monologue is already generating");
                } else {
                    self.start_cycle(cycle, gen_deadline).await;
                }
            }
            EngineEvent::AddTopic(topic) => self.add_topic(topic).await,
            EngineEvent::ReloadConfig => self.reload_config().await,
        }
    }

    async fn ingest_chat(&mut self, message: ChatMessage) {
        let (banned, keywords, alias, delete_flagged, timeout) = {
            let cfg = self.config.read().await;
            (
                cfg.filters.banned_words.clone(),
                cfg.chat.priority_keywords.clone(),
                cfg.persona.name.clone(),
                cfg.moderation.auto_moderate && cfg.moderation.delete_filtered_messages,
                Duration::from_secs(cfg.timeouts.generation_seconds),
            )
        };

        if !passes_filter(&banned, &message.text) {
            if delete_flagged {
                info!(sender = %message.sender_name(), "filtered message flagged for deletion");
            } else {
                debug!(sender = %message.sender_name(), "filtered message dropped");
            }
            return;
        }

        if has_priority_keyword(&keywords, &message.text) {
            info!(sender = %message.sender_name(), text = %message.text, "priority message");
        }

        let mentioned = mentions(&alias, &message.text);
        self.chat.push(message.clone());

        if mentioned {
            let viewer = message.sender_name().to_string();
            debug!(viewer = %viewer, "generating viewer reply");
            let prompt = reply_prompt(&alias, &viewer, &message.text, &self.chat.context_block());
            self.spawn_generation(Uuid::new_v4(), GenKind::Reply { viewer }, prompt, timeout);
        }
    }

    async fn add_topic(&mut self, topic: String) {
        let topic = topic.trim().to_string();
        if topic.is_empty() {
            warn!("ignoring empty topic");
            return;
        }

        {
            let mut cfg = self.config.write().await;
            cfg.topics.push(topic.clone());
        }
        let snapshot = self.config.read().await.clone();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("failed to persist new topic: {e}");
        }

        info!(topic = %topic, "topic added");
        self.deliver(&format!("(System: Added new topic - {topic})"))
            .await;
    }

    /// Re-read the store. A missing or invalid document keeps the
    /// current configuration.
    async fn reload_config(&mut self) {
        match self.store.load() {
            Ok(Some(fresh)) => {
                if let Err(e) = fresh.validate() {
                    warn!("reloaded config rejected, keeping current: {e}");
                    return;
                }
                {
                    let mut cfg = self.config.write().await;
                    *cfg = fresh;
                }
                let (capacity, cooldown) = {
                    let cfg = self.config.read().await;
                    (
                        cfg.chat.max_recent_messages,
                        Duration::from_secs(cfg.cooldowns.topic_cooldown_minutes.saturating_mul(60)),
                    )
                };
                self.chat.set_capacity(capacity);
                self.scheduler.set_cooldown(cooldown);
                info!("configuration reloaded");
            }
            Ok(None) => warn!("config document missing, keeping current configuration"),
            Err(e) => warn!("config reload failed, keeping current configuration: {e}"),
        }
    }

    async fn enter_waiting(&mut self, cycle: &mut Timer) {
        self.set_phase(EnginePhase::Waiting);
        let delay = self.draw_interval().await;
        debug!(seconds = delay.as_secs(), "next monologue scheduled");
        cycle.as_mut().reset(tokio::time::Instant::now() + delay);
    }

    fn set_phase(&mut self, phase: EnginePhase) {
        if self.phase != phase {
            self.phase = phase;
            let _ = self.phase_tx.send(phase);
        }
    }

    /// Uniform draw from the configured interval bounds, inclusive.
    async fn draw_interval(&self) -> Duration {
        let (min, max) = {
            let cfg = self.config.read().await;
            (cfg.intervals.min_seconds, cfg.intervals.max_seconds)
        };
        let secs = if min >= max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_secs(secs)
    }

    async fn deliver(&self, text: &str) {
        if let Err(e) = self.outlet.send_text(text).await {
            warn!("text delivery failed: {e:#}");
        }
    }
}

fn monologue_prompt(persona: &str, topic: &str) -> String {
    format!("You are {persona}, live on stream. Deliver a short monologue about: {topic}")
}

fn reply_prompt(persona: &str, viewer: &str, question: &str, context: &str) -> String {
    if context.is_empty() {
        format!(
            "You are {persona}, live on stream. Viewer {viewer} asked: \"{question}\". Answer them directly."
        )
    } else {
        format!(
            "You are {persona}, live on stream. Recent chat:\n{context}\n\nViewer {viewer} asked: \"{question}\". Answer them directly."
        )
    }
}
