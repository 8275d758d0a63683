//! Reconnecting WebSocket channel.
//!
//! Each relay channel (events, control) is owned by one background task
//! that drives an explicit state machine:
//!
//! ```text
//!   Connecting ──ok──► Open ──lost──► Closed{retry_in} ──sleep──► Connecting …
//!        └──fail──────────────────────────┘
//! ```
//!
//! The task reconnects forever with exponential backoff and jitter; only
//! an explicit shutdown stops it. Raw inbound text frames and lifecycle
//! transitions are delivered to the owner over an `mpsc` channel, and the
//! latest state is observable through a `watch` channel. Nothing a peer
//! sends can terminate the loop: frame decoding is the owner's concern.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};

use crate::constants::RECONNECT_JITTER_MS;
use crate::ws;

/// Observable connection state of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// A connection attempt is in progress.
    Connecting,
    /// Connected and relaying frames.
    Open,
    /// Not connected; the next attempt is scheduled after `retry_in`.
    Closed {
        /// Delay before the next reconnect attempt.
        retry_in: Duration,
    },
}

impl ChannelState {
    /// True when the channel is connected.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed { retry_in } => {
                write!(f, "closed (retry in {:.1}s)", retry_in.as_secs_f32())
            }
        }
    }
}

/// Lifecycle and data events delivered to the channel's owner.
///
/// `Opened` and `Closed` bracket each established connection exactly once;
/// failed connect attempts are visible only through the state watch.
#[derive(Debug)]
pub enum ChannelEvent {
    /// A connection was established.
    Opened,
    /// One raw text frame arrived.
    Frame(String),
    /// An established connection was lost.
    Closed,
}

/// Periodic frame emitted while the connection is open (control-channel
/// keepalive).
#[derive(Debug, Clone)]
pub struct Keepalive {
    /// Interval between emissions.
    pub interval: Duration,
    /// Frame text to send.
    pub frame: String,
}

/// Configuration for one channel task.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Short name used as the log prefix (`"events"`, `"control"`).
    pub name: &'static str,
    /// Full WebSocket URL.
    pub url: String,
    /// Delay before the first reconnect attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled backoff.
    pub max_backoff: Duration,
    /// Optional periodic keepalive frame.
    pub keepalive: Option<Keepalive>,
}

/// Handle to a spawned channel task.
///
/// Dropping the handle does not stop the task; call [`Channel::shutdown`].
#[derive(Debug)]
pub struct Channel {
    outbound_tx: mpsc::UnboundedSender<String>,
    state_rx: watch::Receiver<ChannelState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<()>,
}

impl Channel {
    /// Spawn the owning task for one channel.
    ///
    /// Events are delivered on `events_tx`; the task ends when the
    /// receiving side disappears or shutdown is requested.
    #[must_use]
    pub fn spawn(config: ChannelConfig, events_tx: mpsc::UnboundedSender<ChannelEvent>) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_channel_loop(
            config,
            state_tx,
            events_tx,
            outbound_rx,
            shutdown_rx,
        ));

        Self {
            outbound_tx,
            state_rx,
            shutdown_tx: Some(shutdown_tx),
            task,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state_rx.borrow().clone()
    }

    /// A fresh receiver observing every state transition.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state_rx.clone()
    }

    /// Queue one outbound text frame (fire-and-forget).
    ///
    /// Frames queued while the connection is down are discarded when the
    /// connection cycles; callers gate on [`Self::state`] first.
    pub fn send(&self, frame: String) {
        let _ = self.outbound_tx.send(frame);
    }

    /// Stop the channel task.
    pub fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // The loop exits at its next await point; abort covers a task
        // parked inside the connect handshake.
        self.task.abort();
    }
}

/// Why the per-connection message loop returned.
enum LoopExit {
    /// Connection lost; reconnect after backoff.
    Lost,
    /// Shutdown requested; exit the channel task.
    Shutdown,
}

/// Main connection loop: connect, relay, back off, repeat forever.
async fn run_channel_loop(
    config: ChannelConfig,
    state_tx: watch::Sender<ChannelState>,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut backoff = config.initial_backoff;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        state_tx.send_replace(ChannelState::Connecting);
        log::debug!("[{}] connecting to {}", config.name, config.url);

        match ws::connect(&config.url).await {
            Ok((writer, reader)) => {
                log::info!("[{}] connected to {}", config.name, config.url);

                // Frames queued while disconnected are stale; they must not
                // replay onto the fresh connection.
                while outbound_rx.try_recv().is_ok() {}

                state_tx.send_replace(ChannelState::Open);
                backoff = config.initial_backoff;
                if events_tx.send(ChannelEvent::Opened).is_err() {
                    // Owner is gone; nothing left to reconnect for.
                    break;
                }

                let exit = run_message_loop(
                    &config,
                    writer,
                    reader,
                    &mut outbound_rx,
                    &events_tx,
                    &mut shutdown_rx,
                )
                .await;

                let _ = events_tx.send(ChannelEvent::Closed);

                if matches!(exit, LoopExit::Shutdown) {
                    break;
                }
                log::warn!("[{}] disconnected", config.name);
            }
            Err(e) => {
                log::warn!("[{}] connect failed: {e:#}", config.name);
            }
        }

        // Exponential backoff with jitter
        let jitter = Duration::from_millis(rand::random::<u64>() % RECONNECT_JITTER_MS);
        let wait = backoff + jitter;
        state_tx.send_replace(ChannelState::Closed { retry_in: wait });
        log::info!("[{}] reconnecting in {:.1}s", config.name, wait.as_secs_f32());

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            _ = &mut shutdown_rx => break,
        }

        backoff = (backoff * 2).min(config.max_backoff);
    }

    state_tx.send_replace(ChannelState::Closed {
        retry_in: Duration::ZERO,
    });
    log::debug!("[{}] channel task exiting", config.name);
}

/// Relay frames for a single established connection.
async fn run_message_loop(
    config: &ChannelConfig,
    mut writer: ws::WsWriter,
    mut reader: ws::WsReader,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    events_tx: &mpsc::UnboundedSender<ChannelEvent>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> LoopExit {
    let keepalive_period = config
        .keepalive
        .as_ref()
        .map_or(Duration::from_secs(3600), |k| k.interval);
    let mut keepalive = tokio::time::interval(keepalive_period);
    keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the connect itself is proof of
    // liveness, so skip it.
    keepalive.reset();

    loop {
        tokio::select! {
            msg = reader.recv() => {
                match msg {
                    Some(Ok(ws::WsMessage::Text(text))) => {
                        if events_tx.send(ChannelEvent::Frame(text)).is_err() {
                            return LoopExit::Shutdown;
                        }
                    }
                    Some(Ok(ws::WsMessage::Ping(data))) => {
                        let _ = writer.send_pong(data).await;
                    }
                    Some(Ok(ws::WsMessage::Close { code, reason })) => {
                        log::info!(
                            "[{}] closed by server (code {code}{}{reason})",
                            config.name,
                            if reason.is_empty() { "" } else { ": " },
                        );
                        return LoopExit::Lost;
                    }
                    Some(Err(e)) => {
                        log::warn!("[{}] read error: {e:#}", config.name);
                        return LoopExit::Lost;
                    }
                    None => {
                        log::info!("[{}] stream ended", config.name);
                        return LoopExit::Lost;
                    }
                }
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = writer.send_text(&frame).await {
                    log::warn!("[{}] send failed: {e:#}", config.name);
                    return LoopExit::Lost;
                }
            }

            _ = keepalive.tick(), if config.keepalive.is_some() => {
                if let Some(k) = &config.keepalive {
                    if let Err(e) = writer.send_text(&k.frame).await {
                        log::warn!("[{}] keepalive failed: {e:#}", config.name);
                        return LoopExit::Lost;
                    }
                    log::trace!("[{}] keepalive sent", config.name);
                }
            }

            _ = &mut *shutdown_rx => {
                let _ = writer.close().await;
                return LoopExit::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ChannelState::Connecting.to_string(), "connecting");
        assert_eq!(ChannelState::Open.to_string(), "open");
        assert_eq!(
            ChannelState::Closed { retry_in: Duration::from_millis(1500) }.to_string(),
            "closed (retry in 1.5s)"
        );
    }

    #[test]
    fn test_is_open() {
        assert!(ChannelState::Open.is_open());
        assert!(!ChannelState::Connecting.is_open());
        assert!(!ChannelState::Closed { retry_in: Duration::ZERO }.is_open());
    }

    #[tokio::test]
    async fn test_unreachable_channel_keeps_retrying() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let channel = Channel::spawn(
            ChannelConfig {
                name: "test",
                url: "ws://127.0.0.1:1/ws/events".to_string(),
                initial_backoff: Duration::from_millis(20),
                max_backoff: Duration::from_millis(50),
                keepalive: None,
            },
            events_tx,
        );

        // Wait until the loop has scheduled at least one retry.
        let mut state_rx = channel.watch_state();
        let scheduled = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if matches!(*state_rx.borrow_and_update(), ChannelState::Closed { .. }) {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        assert!(scheduled.is_ok(), "channel never scheduled a retry");

        channel.shutdown();
    }
}
