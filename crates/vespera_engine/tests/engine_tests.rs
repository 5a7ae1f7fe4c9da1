//! End-to-end engine tests with mocked collaborators and a paused clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use vespera_core::{
    ChatMessage, ConfigError, ConfigStore, ExpressionSink, Oracle, PersonaConfig, SharedConfig,
    TextOutlet,
};
use vespera_engine::{EnginePhase, PersonaEngine};

// ============================================================================
// Mocks
// ============================================================================

struct MockOracle {
    reply: String,
    delay: Option<Duration>,
    prompts: Mutex<Vec<String>>,
}

impl MockOracle {
    fn instant(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: None,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: Some(delay),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
struct RecordingOutlet {
    texts: Mutex<Vec<String>>,
}

impl RecordingOutlet {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    fn announcements(&self) -> usize {
        self.texts()
            .iter()
            .filter(|t| t.starts_with("(System: AI starts a monologue about:"))
            .count()
    }
}

#[async_trait]
impl TextOutlet for RecordingOutlet {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    moods: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn moods(&self) -> Vec<String> {
        self.moods.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExpressionSink for RecordingSink {
    async fn set_expression(&self, mood: &str) {
        self.moods.lock().unwrap().push(mood.to_string());
    }
}

#[derive(Default)]
struct MemoryStore {
    doc: Mutex<Option<PersonaConfig>>,
    saved: Mutex<Vec<PersonaConfig>>,
    fail_load: AtomicBool,
}

impl MemoryStore {
    fn with_doc(config: PersonaConfig) -> Arc<Self> {
        let store = Self::default();
        *store.doc.lock().unwrap() = Some(config);
        Arc::new(store)
    }

    fn saved(&self) -> Vec<PersonaConfig> {
        self.saved.lock().unwrap().clone()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<PersonaConfig>, ConfigError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(ConfigError::Invalid("store offline".to_string()));
        }
        Ok(self.doc.lock().unwrap().clone())
    }

    fn save(&self, config: &PersonaConfig) -> Result<(), ConfigError> {
        self.saved.lock().unwrap().push(config.clone());
        *self.doc.lock().unwrap() = Some(config.clone());
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config(tweak: impl FnOnce(&mut PersonaConfig)) -> SharedConfig {
    let mut cfg = PersonaConfig::default();
    // long interval so cycles only happen when a test asks for them
    cfg.intervals.min_seconds = 3600;
    cfg.intervals.max_seconds = 3600;
    cfg.cooldowns.topic_cooldown_minutes = 0;
    cfg.timeouts.generation_seconds = 5;
    tweak(&mut cfg);
    Arc::new(RwLock::new(cfg))
}

/// Poll a condition under the paused clock. Each sleep lets the runtime
/// auto-advance, so this covers about 100 virtual seconds.
async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    cond()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn monologue_cycle_announces_speaks_and_sets_expression() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 10;
        cfg.intervals.max_seconds = 10;
        cfg.topics = vec!["so much fun today".to_string()];
    });
    let oracle = MockOracle::instant("hello chat, what a day!");
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        sink.clone(),
    )
    .await;
    let mut mood_rx = handle.subscribe_mood();
    assert_eq!(handle.current_mood(), "neutral");

    tokio::time::timeout(Duration::from_secs(300), mood_rx.changed())
        .await
        .expect("a cycle should complete")
        .unwrap();
    assert_eq!(*mood_rx.borrow(), "happy");

    assert!(eventually(|| !sink.moods().is_empty()).await);
    assert_eq!(sink.moods(), vec!["happy"]);

    let texts = outlet.texts();
    assert_eq!(
        texts[0],
        "(System: AI starts a monologue about: so much fun today)"
    );
    assert_eq!(texts[1], "hello chat, what a day!");

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("so much fun today"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timed_out_generation_skips_the_cycle_but_stays_alive() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 10;
        cfg.intervals.max_seconds = 10;
        cfg.timeouts.generation_seconds = 5;
        cfg.topics = vec!["a topic".to_string()];
    });
    // far slower than the 5s generation timeout
    let oracle = MockOracle::slow("too late", Duration::from_secs(1000));
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle =
        PersonaEngine::spawn(config, store, oracle, outlet.clone(), sink.clone()).await;

    // two cycles get announced even though neither produces dialogue
    assert!(eventually(|| outlet.announcements() >= 2).await);
    assert!(outlet
        .texts()
        .iter()
        .all(|t| t.starts_with("(System: AI starts a monologue about:")));
    // no mood was ever assigned
    assert!(sink.moods().is_empty());
    assert_eq!(handle.current_mood(), "neutral");

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn speak_now_fires_a_cycle_without_waiting_for_the_timer() {
    let config = test_config(|cfg| {
        cfg.topics = vec!["forced cycle".to_string()];
    });
    let oracle = MockOracle::instant("speaking early");
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let started = tokio::time::Instant::now();
    let handle = PersonaEngine::spawn(config, store, oracle, outlet.clone(), sink).await;
    assert!(handle.speak_now().await);

    assert!(eventually(|| outlet.texts().contains(&"speaking early".to_string())).await);
    // well before the 3600s timer would have fired
    assert!(started.elapsed() < Duration::from_secs(3600));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn consecutive_cycles_rearm_and_speak_each_time() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 1;
        cfg.intervals.max_seconds = 1;
        cfg.topics = vec!["steady topic".to_string()];
    });
    let oracle = MockOracle::instant("cycle dialogue");
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        sink.clone(),
    )
    .await;

    let spoken = || {
        outlet
            .texts()
            .iter()
            .filter(|t| *t == "cycle dialogue")
            .count()
    };
    assert!(eventually(|| spoken() >= 3).await);

    // each cycle finishes before the next timer is armed, so announcements
    // and dialogue alternate strictly
    let texts = outlet.texts();
    for (i, text) in texts.iter().take(6).enumerate() {
        if i % 2 == 0 {
            assert_eq!(text, "(System: AI starts a monologue about: steady topic)");
        } else {
            assert_eq!(text, "cycle dialogue");
        }
    }
    assert!(oracle.prompts().len() >= 3);
    assert!(sink.moods().len() >= 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn short_rotation_under_cooldown_never_starves() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 1;
        cfg.intervals.max_seconds = 1;
        cfg.cooldowns.topic_cooldown_minutes = 1;
        cfg.topics = vec!["rainy days".to_string(), "street food".to_string()];
    });
    let oracle = MockOracle::instant("still talking");
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        sink.clone(),
    )
    .await;

    // two topics under a one-minute cooldown exhaust every third pick;
    // the reset keeps the rotation going instead of starving it
    assert!(eventually(|| outlet.announcements() >= 8).await);
    for line in outlet
        .texts()
        .iter()
        .filter(|t| t.starts_with("(System: AI starts a monologue about:"))
    {
        assert!(
            line.contains("rainy days") || line.contains("street food"),
            "unexpected announcement: {line}"
        );
    }
    assert!(oracle.prompts().len() >= 8);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cooldown_expiry_inside_the_loop_restores_the_topic() {
    let config = test_config(|cfg| {
        cfg.cooldowns.topic_cooldown_minutes = 1;
        cfg.topics = vec!["solo focus".to_string()];
    });
    let oracle = MockOracle::instant("on it");
    let outlet = Arc::new(RecordingOutlet::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;

    let spoken = || outlet.texts().iter().filter(|t| *t == "on it").count();

    // first cycle puts the only topic on cooldown
    assert!(handle.speak_now().await);
    assert!(eventually(|| spoken() >= 1).await);

    // let the one-minute cooldown elapse inside the running engine
    for _ in 0..250 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    // the topic is eligible again, and a third back-to-back pick still
    // succeeds through the exhaustion reset
    assert!(handle.speak_now().await);
    assert!(eventually(|| spoken() >= 2).await);
    assert!(handle.speak_now().await);
    assert!(eventually(|| spoken() >= 3).await);

    assert_eq!(outlet.announcements(), 3);
    assert_eq!(oracle.prompts().len(), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn mentions_get_replies_and_filtered_mentions_do_not() {
    let config = test_config(|cfg| {
        cfg.persona.name = "Vespera".to_string();
    });
    let oracle = MockOracle::instant("great question!");
    let outlet = Arc::new(RecordingOutlet::default());
    let sink = Arc::new(RecordingSink::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle =
        PersonaEngine::spawn(config, store, oracle.clone(), outlet.clone(), sink.clone()).await;

    // banned content never reaches the buffer or the oracle
    handle
        .submit_chat(ChatMessage::new(
            Some("troll".to_string()),
            "hey vespera you slur1",
        ))
        .await;
    // bounded negative check under the paused clock
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(outlet.texts().is_empty());
    assert!(oracle.prompts().is_empty());

    // a clean mention is answered
    handle
        .submit_chat(ChatMessage::new(
            Some("ana".to_string()),
            "hey Vespera, favorite game?",
        ))
        .await;
    assert!(eventually(|| outlet.texts().contains(&"great question!".to_string())).await);

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Viewer ana asked"));
    assert!(prompts[0].contains("favorite game?"));
    // replies never touch the mood
    assert!(sink.moods().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn anonymous_mention_is_answered_without_a_name() {
    let config = test_config(|cfg| {
        cfg.persona.name = "Vespera".to_string();
    });
    let oracle = MockOracle::instant("hi there, mystery viewer");
    let outlet = Arc::new(RecordingOutlet::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;

    handle
        .submit_chat(ChatMessage::new(None, "vespera are you real?"))
        .await;
    assert!(eventually(|| !outlet.texts().is_empty()).await);
    assert!(oracle.prompts()[0].contains("Viewer anonymous asked"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn add_topic_persists_and_announces() {
    let config = test_config(|_| {});
    let outlet = Arc::new(RecordingOutlet::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config.clone(),
        store.clone(),
        MockOracle::instant("x"),
        outlet.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;

    assert!(handle.add_topic("  chess openings  ").await);
    assert!(
        eventually(|| outlet
            .texts()
            .contains(&"(System: Added new topic - chess openings)".to_string()))
        .await
    );

    // whitespace was trimmed before the append
    assert!(config
        .read()
        .await
        .topics
        .contains(&"chess openings".to_string()));
    let saved = store.saved();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].topics.contains(&"chess openings".to_string()));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn empty_topic_is_ignored() {
    let config = test_config(|_| {});
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config.clone(),
        store.clone(),
        MockOracle::instant("x"),
        Arc::new(RecordingOutlet::default()),
        Arc::new(RecordingSink::default()),
    )
    .await;

    let before = config.read().await.topics.len();
    handle.add_topic("   ").await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert_eq!(config.read().await.topics.len(), before);
    assert!(store.saved().is_empty());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reload_applies_a_valid_document() {
    let config = test_config(|_| {});
    let mut fresh = PersonaConfig::default();
    fresh.chat.max_recent_messages = 99;
    fresh.topics = vec!["replaced".to_string()];
    let store = MemoryStore::with_doc(fresh);

    let handle = PersonaEngine::spawn(
        config.clone(),
        store,
        MockOracle::instant("x"),
        Arc::new(RecordingOutlet::default()),
        Arc::new(RecordingSink::default()),
    )
    .await;

    assert!(handle.reload_config().await);
    assert!(eventually(|| {
        config
            .try_read()
            .map(|cfg| cfg.chat.max_recent_messages == 99)
            .unwrap_or(false)
    })
    .await);
    assert_eq!(config.read().await.topics, vec!["replaced".to_string()]);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn reload_keeps_current_config_when_store_fails_or_is_invalid() {
    let config = test_config(|_| {});
    let original_topics = config.read().await.topics.clone();

    // invalid document: inverted interval bounds
    let mut broken = PersonaConfig::default();
    broken.intervals.min_seconds = 100;
    broken.intervals.max_seconds = 1;
    let store = MemoryStore::with_doc(broken);

    let handle = PersonaEngine::spawn(
        config.clone(),
        store.clone(),
        MockOracle::instant("x"),
        Arc::new(RecordingOutlet::default()),
        Arc::new(RecordingSink::default()),
    )
    .await;

    handle.reload_config().await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert_eq!(config.read().await.intervals.min_seconds, 3600);
    assert_eq!(config.read().await.topics, original_topics);

    // store failure: same outcome
    store.fail_load.store(true, Ordering::SeqCst);
    handle.reload_config().await;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert_eq!(config.read().await.intervals.min_seconds, 3600);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_an_in_flight_generation() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 1;
        cfg.intervals.max_seconds = 1;
        cfg.timeouts.generation_seconds = 500;
        cfg.topics = vec!["never finishes".to_string()];
    });
    let oracle = MockOracle::slow("unreachable", Duration::from_secs(400));
    let outlet = Arc::new(RecordingOutlet::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle,
        outlet.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;
    let mut phase_rx = handle.subscribe_phase();

    // wait until the engine is mid-generation, then pull the plug
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if *phase_rx.borrow() == EnginePhase::Generating {
                break;
            }
            phase_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("engine should reach the generating phase");

    tokio::time::timeout(Duration::from_secs(30), handle.shutdown())
        .await
        .expect("shutdown should not hang on the stuck oracle");
    // the announcement went out but the dialogue never arrived
    assert_eq!(outlet.announcements(), 1);
    assert_eq!(outlet.texts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_topic_list_keeps_the_loop_alive() {
    let config = test_config(|cfg| {
        cfg.intervals.min_seconds = 10;
        cfg.intervals.max_seconds = 10;
        cfg.topics = Vec::new();
    });
    let oracle = MockOracle::instant("x");
    let outlet = Arc::new(RecordingOutlet::default());
    let store = MemoryStore::with_doc(PersonaConfig::default());

    let handle = PersonaEngine::spawn(
        config,
        store,
        oracle.clone(),
        outlet.clone(),
        Arc::new(RecordingSink::default()),
    )
    .await;

    // several cycle timers fire and fail; the engine must still answer events
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(outlet.texts().is_empty());
    assert!(oracle.prompts().is_empty());
    assert!(handle.add_topic("revival topic").await);
    assert!(
        eventually(|| outlet
            .texts()
            .contains(&"(System: Added new topic - revival topic)".to_string()))
        .await
    );

    handle.shutdown().await;
}
