//! A scripted stand-in for the text oracle so the binary runs without a
//! model backend. Real deployments implement `Oracle` themselves and
//! wire it in through the library API.

use async_trait::async_trait;
use rand::Rng;
use vespera_core::Oracle;

const MONOLOGUE_TEMPLATES: [&str; 3] = [
    "Alright chat, let's talk about {topic}. I have opinions, believe me.",
    "So I was thinking about {topic} earlier today. Wild stuff.",
    "Okay, okay. {topic}. Where do I even start with this one?",
];

const REPLY_TEMPLATES: [&str; 3] = [
    "Ooh, good question! Let me think... yes. Definitely yes.",
    "I was hoping someone would ask that. Short answer: it's complicated.",
    "Ha! You really want to know? Stick around and find out.",
];

#[derive(Debug, Default)]
pub struct ScriptedOracle;

impl ScriptedOracle {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let text = match monologue_subject(prompt) {
            Some(topic) => {
                let idx = rand::thread_rng().gen_range(0..MONOLOGUE_TEMPLATES.len());
                MONOLOGUE_TEMPLATES[idx].replace("{topic}", topic)
            }
            None => {
                let idx = rand::thread_rng().gen_range(0..REPLY_TEMPLATES.len());
                REPLY_TEMPLATES[idx].to_string()
            }
        };
        Ok(text)
    }
}

/// The topic portion of a monologue prompt, `None` for reply prompts.
fn monologue_subject(prompt: &str) -> Option<&str> {
    prompt.split("monologue about: ").nth(1).map(str::trim)
}
