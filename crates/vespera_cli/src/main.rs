mod console;
mod oracle;

use anyhow::Context;
use clap::Parser;
use console::{ConsoleOutlet, LogExpressionSink};
use oracle::ScriptedOracle;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use vespera_core::{ExpressionSink, JsonFileStore, PersonaConfig, SharedConfig};
use vespera_engine::PersonaEngine;
use vespera_vts::AvatarSession;

#[derive(Parser, Debug)]
#[command(author, version, about = "Autonomous virtual streamer persona engine", long_about = None)]
struct Args {
    /// Path to the persona configuration document
    #[arg(short, long, default_value = "config.json", env = "VESPERA_CONFIG")]
    config: String,

    /// Run without the avatar session; expression changes are logged only
    #[arg(long)]
    no_avatar: bool,

    /// Start a monologue immediately instead of waiting for the first timer
    #[arg(long)]
    speak_on_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    // 1. Configuration
    let (config, created) = PersonaConfig::load_or_create(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config))?;
    config.validate().context("invalid configuration")?;
    if created {
        info!(path = %args.config, "wrote a default configuration, fill in credentials before going live");
    }
    let persona_name = config.persona.name.clone();
    let shared: SharedConfig = Arc::new(RwLock::new(config));
    let store = Arc::new(JsonFileStore::new(&args.config));

    // 2. Avatar session
    let avatar = if args.no_avatar {
        info!("avatar session disabled");
        None
    } else {
        Some(AvatarSession::spawn(shared.clone()))
    };
    let sink: Arc<dyn ExpressionSink> = match &avatar {
        Some(handle) => Arc::new(handle.client()),
        None => Arc::new(LogExpressionSink),
    };

    // 3. Engine
    let engine = PersonaEngine::spawn(
        shared,
        store,
        Arc::new(ScriptedOracle::new()),
        Arc::new(ConsoleOutlet::new(persona_name.clone())),
        sink,
    )
    .await;
    if args.speak_on_start {
        engine.speak_now().await;
    }

    println!("{persona_name} online.");
    console::run(&engine, avatar.as_ref()).await?;

    // 4. Teardown
    engine.shutdown().await;
    if let Some(handle) = avatar {
        handle.shutdown().await;
    }
    info!("goodbye");
    Ok(())
}
