//! The avatar control session: a supervised websocket connection to
//! VTube Studio that authenticates on connect and reconnects forever on
//! failure.
//!
//! Expression commands are at-most-once. A command submitted while the
//! session is not `Ready` is dropped, never queued for later; anything
//! left in the queue from a previous connection is discarded before the
//! session becomes `Ready` again.

use crate::protocol::Envelope;
use anyhow::Context;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;
use vespera_core::{ExpressionSink, SharedConfig};

/// Fixed delay between reconnect attempts, matching what VTS plugin
/// operators expect. Deliberately not exponential.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

const COMMAND_QUEUE: usize = 8;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Closing,
}

enum SessionCommand {
    SetExpression { mood: String },
}

// ============================================================================
// Handle + client
// ============================================================================

/// Owner-side handle to a running session task.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// A cheap clonable client for submitting expression changes.
    pub fn client(&self) -> SessionClient {
        SessionClient {
            commands: self.commands.clone(),
            state: self.state.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!("avatar session task ended abnormally: {e}");
            }
        }
    }
}

/// Expression entry point handed to the engine. Checks session state
/// before submitting so commands are dropped, not deferred, while the
/// connection is down.
#[derive(Debug, Clone)]
pub struct SessionClient {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

#[async_trait]
impl ExpressionSink for SessionClient {
    async fn set_expression(&self, mood: &str) {
        if *self.state.borrow() != SessionState::Ready {
            debug!(mood = %mood, "avatar session not ready, dropping expression change");
            return;
        }
        let command = SessionCommand::SetExpression {
            mood: mood.to_string(),
        };
        if self.commands.try_send(command).is_err() {
            debug!(mood = %mood, "avatar command queue unavailable, dropping expression change");
        }
    }
}

// ============================================================================
// Session
// ============================================================================

pub struct AvatarSession {
    config: SharedConfig,
    reconnect_delay: Duration,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    state_tx: watch::Sender<SessionState>,
    shutdown_rx: watch::Receiver<bool>,
}

impl AvatarSession {
    /// Start the session task with the standard reconnect delay.
    pub fn spawn(config: SharedConfig) -> SessionHandle {
        Self::spawn_with_reconnect(config, RECONNECT_DELAY)
    }

    /// Start with a custom reconnect delay. Tests use short delays.
    pub fn spawn_with_reconnect(config: SharedConfig, reconnect_delay: Duration) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE);
        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let session = AvatarSession {
            config,
            reconnect_delay,
            cmd_rx,
            state_tx,
            shutdown_rx,
        };
        let task = tokio::spawn(session.run());

        SessionHandle {
            commands: cmd_tx,
            state: state_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run(mut self) {
        loop {
            if self.should_stop() {
                break;
            }

            let endpoint = {
                let cfg = self.config.read().await;
                format!("ws://{}:{}", cfg.vtube_studio.host, cfg.vtube_studio.port)
            };
            let url = match Url::parse(&endpoint) {
                Ok(url) => url,
                Err(e) => {
                    warn!(endpoint = %endpoint, "invalid avatar endpoint: {e}");
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                    continue;
                }
            };

            self.set_state(SessionState::Connecting);
            info!(url = %url, "connecting to avatar service");

            let connected = tokio::select! {
                result = connect_async(url.as_str()) => result,
                _ = wait_for_shutdown(&mut self.shutdown_rx) => break,
            };

            match connected {
                Ok((stream, _)) => {
                    if let Err(e) = self.drive(stream).await {
                        warn!("avatar session dropped: {e:#}");
                    }
                }
                Err(e) => warn!("avatar connection failed: {e}"),
            }

            if self.should_stop() {
                break;
            }
            self.set_state(SessionState::Disconnected);
            info!(
                seconds = self.reconnect_delay.as_secs(),
                "reconnecting to avatar service after delay"
            );
            if self.sleep_or_shutdown().await {
                break;
            }
        }
        self.set_state(SessionState::Closing);
        info!("avatar session closed");
    }

    /// One connection's lifetime: handshake, then command/inbound pumps
    /// until the transport drops or shutdown is requested. An `Err`
    /// return sends the caller through the reconnect path.
    async fn drive(&mut self, stream: WsStream) -> anyhow::Result<()> {
        let (mut sink, mut source) = stream.split();

        let (plugin_name, plugin_developer, wait_ack, ack_timeout) = {
            let cfg = self.config.read().await;
            (
                cfg.vtube_studio.plugin_name.clone(),
                cfg.vtube_studio.plugin_developer.clone(),
                cfg.vtube_studio.wait_for_auth_ack,
                Duration::from_secs(cfg.timeouts.auth_ack_seconds),
            )
        };

        self.set_state(SessionState::Authenticating);
        let auth = Envelope::authentication_request(&plugin_name, &plugin_developer);
        let frame = serde_json::to_string(&auth).context("encoding authentication request")?;
        sink.send(Message::Text(frame))
            .await
            .context("sending authentication request")?;

        if wait_ack {
            wait_for_auth_ack(&mut source, ack_timeout).await?;
            info!("avatar service accepted authentication");
        } else {
            debug!("not waiting for authentication acknowledgement");
        }

        // discard anything queued while we were away
        while self.cmd_rx.try_recv().is_ok() {}
        self.set_state(SessionState::Ready);
        info!("avatar session ready");

        loop {
            tokio::select! {
                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(());
                }
                maybe_command = self.cmd_rx.recv() => {
                    match maybe_command {
                        Some(SessionCommand::SetExpression { mood }) => {
                            self.send_expression(&mut sink, &mood).await?;
                        }
                        None => {
                            // every client dropped; nothing left to do
                            let _ = sink.send(Message::Close(None)).await;
                            return Ok(());
                        }
                    }
                }
                maybe_frame = source.next() => {
                    match maybe_frame {
                        Some(Ok(Message::Text(text))) => handle_inbound(&text),
                        Some(Ok(Message::Close(_))) => {
                            anyhow::bail!("avatar service closed the connection")
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e).context("websocket transport error"),
                        None => anyhow::bail!("avatar connection ended"),
                    }
                }
            }
        }
    }

    async fn send_expression(&self, sink: &mut WsSink, mood: &str) -> anyhow::Result<()> {
        let hotkey = {
            let cfg = self.config.read().await;
            cfg.expression_for(mood).map(String::from)
        };
        let Some(hotkey) = hotkey else {
            warn!(mood = %mood, "no expression mapping, dropping change");
            return Ok(());
        };

        debug!(mood = %mood, hotkey = %hotkey, "triggering expression hotkey");
        let envelope = Envelope::hotkey_trigger(mood, &hotkey);
        let frame = serde_json::to_string(&envelope).context("encoding hotkey trigger")?;
        sink.send(Message::Text(frame))
            .await
            .context("sending hotkey trigger")
    }

    fn set_state(&self, state: SessionState) {
        if *self.state_tx.borrow() != state {
            debug!(state = ?state, "avatar session state changed");
            let _ = self.state_tx.send(state);
        }
    }

    /// True once shutdown was signalled or the handle was dropped.
    fn should_stop(&self) -> bool {
        *self.shutdown_rx.borrow() || self.shutdown_rx.has_changed().is_err()
    }

    /// Sleep out the reconnect delay; true means shutdown arrived first.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.reconnect_delay) => false,
            _ = wait_for_shutdown(&mut self.shutdown_rx) => true,
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Read frames until an `AuthenticationResponse` arrives or the deadline
/// passes. Anything that is not an accepted response is a handshake
/// failure.
async fn wait_for_auth_ack(source: &mut WsSource, ack_timeout: Duration) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + ack_timeout;
    loop {
        let frame = tokio::time::timeout_at(deadline, source.next())
            .await
            .map_err(|_| anyhow::anyhow!("authentication acknowledgement timed out"))?;
        match frame {
            Some(Ok(Message::Text(text))) => {
                let Ok(envelope) = Envelope::parse(&text) else {
                    debug!("ignoring unparseable frame during authentication");
                    continue;
                };
                if !envelope.is_auth_response() {
                    debug!(message_type = %envelope.message_type, "ignoring frame during authentication");
                    continue;
                }
                if envelope.authenticated() {
                    return Ok(());
                }
                anyhow::bail!(
                    "authentication rejected: {}",
                    envelope.reason().unwrap_or("no reason given")
                );
            }
            Some(Ok(Message::Close(_))) | None => {
                anyhow::bail!("connection closed during authentication")
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e).context("transport error during authentication"),
        }
    }
}

fn handle_inbound(text: &str) {
    match Envelope::parse(text) {
        Ok(envelope) if envelope.is_api_error() => {
            warn!(
                reason = envelope.reason().unwrap_or("unspecified"),
                "avatar service reported an error"
            );
        }
        Ok(envelope) => {
            debug!(message_type = %envelope.message_type, "unhandled avatar message");
        }
        Err(_) => debug!("ignoring unparseable avatar frame"),
    }
}
