//! The operator console: stdin commands in, persona output to stdout.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use vespera_core::{ChatMessage, ExpressionSink, TextOutlet};
use vespera_engine::EngineHandle;
use vespera_vts::SessionHandle;

/// Prints the persona's output lines to stdout, prefixed with its name.
pub struct ConsoleOutlet {
    persona: String,
}

impl ConsoleOutlet {
    pub fn new(persona: impl Into<String>) -> Self {
        Self {
            persona: persona.into(),
        }
    }
}

#[async_trait]
impl TextOutlet for ConsoleOutlet {
    async fn send_text(&self, text: &str) -> anyhow::Result<()> {
        println!("{}: {}", self.persona, text);
        Ok(())
    }
}

/// Expression sink used with `--no-avatar`: changes are logged, not sent.
pub struct LogExpressionSink;

#[async_trait]
impl ExpressionSink for LogExpressionSink {
    async fn set_expression(&self, mood: &str) {
        info!(mood = %mood, "expression change (avatar session disabled)");
    }
}

/// Read operator commands until quit, ctrl-c, or end of input.
pub async fn run(engine: &EngineHandle, avatar: Option<&SessionHandle>) -> Result<()> {
    println!("Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!();
                info!("interrupt received, shutting down");
                break;
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(engine, avatar, line.trim()).await {
                            break;
                        }
                    }
                    None => {
                        info!("input closed, shutting down");
                        break;
                    }
                }
            }
        }
    }
    Ok(())
}

/// Returns false when the operator asked to quit.
async fn handle_line(engine: &EngineHandle, avatar: Option<&SessionHandle>, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if let Some(topic) = line.strip_prefix("change topic:") {
        engine.add_topic(topic.trim()).await;
        return true;
    }
    if let Some(rest) = line.strip_prefix("chat ") {
        match parse_chat(rest) {
            Some((sender, text)) => {
                engine.submit_chat(ChatMessage::new(sender, text)).await;
            }
            None => println!("usage: chat <name|-> <message>"),
        }
        return true;
    }

    match line {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "speak" => {
            engine.speak_now().await;
        }
        "reload" => {
            engine.reload_config().await;
        }
        "mood" => println!("current mood: {}", engine.current_mood()),
        "status" => {
            println!("mood: {}", engine.current_mood());
            match avatar {
                Some(handle) => println!("avatar session: {:?}", handle.state()),
                None => println!("avatar session: disabled"),
            }
        }
        _ => println!("unknown command, try 'help'"),
    }
    true
}

/// Split "`<name> <message>`" into sender and text; "-" is anonymous.
fn parse_chat(rest: &str) -> Option<(Option<String>, String)> {
    let mut parts = rest.splitn(2, ' ');
    let name = parts.next()?.trim();
    let text = parts.next()?.trim();
    if name.is_empty() || text.is_empty() {
        return None;
    }
    let sender = if name == "-" {
        None
    } else {
        Some(name.to_string())
    };
    Some((sender, text.to_string()))
}

fn print_help() {
    println!("commands:");
    println!("  speak                  start a monologue now");
    println!("  change topic: <topic>  add a topic and save the config");
    println!("  chat <name|-> <text>   inject a viewer message ('-' for anonymous)");
    println!("  mood                   show the current mood");
    println!("  status                 show mood and avatar session state");
    println!("  reload                 re-read the config file");
    println!("  quit                   shut down");
}
