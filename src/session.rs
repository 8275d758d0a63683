//! Session supervisor.
//!
//! Owns the two relay channels and every piece of client-side state: the
//! bounded event log fed by the event channel, and the control session
//! reconciling publishes with acks and drop telemetry. All state mutation
//! happens on the supervisor's single `select!` loop; the channels and
//! callers only pass messages in.
//!
//! The two channels have independent lifecycles: either may connect first
//! and each reconnects on its own. A dropped event channel never disturbs
//! control state, and vice versa.

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::channel::{Channel, ChannelConfig, ChannelEvent, ChannelState, Keepalive};
use crate::config::Config;
use crate::control::{ControlSession, PublishRequest, PublishStatus, SubmitError};
use crate::event_log::{EventLog, SharedEventLog};
use crate::protocol::{self, Event};

/// Which relay channel an event or notice refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// The read-only event stream (`/ws/events`).
    Events,
    /// The bidirectional control channel (`/ws/control`).
    Control,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Events => write!(f, "events"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// Presentation-facing notifications emitted by the session loop.
///
/// Rendering is a thin consumer of this stream; the session never blocks
/// on it.
#[derive(Debug)]
pub enum Notice {
    /// A decoded event was ingested into the log.
    Event(Event),
    /// A channel established its connection.
    Connected(ChannelKind),
    /// A channel lost its connection (it will retry on its own).
    Disconnected(ChannelKind),
    /// The observable publish status changed.
    Publish(PublishStatus),
    /// The relay reported a new drop count.
    Drops(u64),
}

/// Commands from [`SessionHandle`] into the supervisor loop.
#[derive(Debug)]
enum Command {
    Publish { frame: String },
    Reset,
    Shutdown,
}

/// Cloneable handle for interacting with a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    command_tx: mpsc::UnboundedSender<Command>,
    log: SharedEventLog,
    events_state: watch::Receiver<ChannelState>,
    control_state: watch::Receiver<ChannelState>,
    publish_status: watch::Receiver<PublishStatus>,
    drops: watch::Receiver<u64>,
}

impl SessionHandle {
    /// Submit one publish request.
    ///
    /// Validation and the connection check happen synchronously; the
    /// outcome arrives through [`Self::publish_status`] (and the notice
    /// stream), never as a return value. There is no retry: a request
    /// rejected or lost to a disconnect must be re-submitted.
    ///
    /// # Errors
    ///
    /// [`SubmitError::EmptyTopic`] for a blank topic (nothing is sent);
    /// [`SubmitError::NotConnected`] when the control channel is not open.
    pub fn submit(&self, request: &PublishRequest) -> Result<(), SubmitError> {
        request.validate()?;
        if !self.control_state.borrow().is_open() {
            return Err(SubmitError::NotConnected);
        }
        let frame = request.frame_json();
        self.command_tx
            .send(Command::Publish { frame })
            .map_err(|_| SubmitError::NotConnected)
    }

    /// Clear the event log and its `total` counter.
    ///
    /// Neither socket's connection state is affected.
    pub fn reset(&self) {
        let _ = self.command_tx.send(Command::Reset);
    }

    /// Stop the supervisor loop and both channel tasks.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }

    /// Shared read access to the event log.
    #[must_use]
    pub fn log(&self) -> SharedEventLog {
        SharedEventLog::clone(&self.log)
    }

    /// Observe the event channel's connection state.
    #[must_use]
    pub fn events_state(&self) -> watch::Receiver<ChannelState> {
        self.events_state.clone()
    }

    /// Observe the control channel's connection state.
    #[must_use]
    pub fn control_state(&self) -> watch::Receiver<ChannelState> {
        self.control_state.clone()
    }

    /// Observe the publish status.
    #[must_use]
    pub fn publish_status(&self) -> watch::Receiver<PublishStatus> {
        self.publish_status.clone()
    }

    /// Observe the relay-reported drop count.
    #[must_use]
    pub fn drops(&self) -> watch::Receiver<u64> {
        self.drops.clone()
    }
}

/// The session supervisor. Construct with [`Session::start`].
#[derive(Debug)]
pub struct Session {
    events_channel: Channel,
    control_channel: Channel,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    control_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    notices_tx: mpsc::UnboundedSender<Notice>,
    log: SharedEventLog,
    control: ControlSession,
    publish_status: watch::Receiver<PublishStatus>,
    drops: watch::Receiver<u64>,
    /// Undecodable frames discarded so far, per channel; observability only.
    decode_failures: [u64; 2],
}

impl Session {
    /// Open both channels and spawn the supervisor loop.
    ///
    /// Returns the interaction handle and the notice stream for
    /// presentation. The session runs until [`SessionHandle::shutdown`].
    #[must_use]
    pub fn start(config: &Config) -> (SessionHandle, mpsc::UnboundedReceiver<Notice>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let events_channel = Channel::spawn(
            ChannelConfig {
                name: "events",
                url: config.events_url(),
                initial_backoff: config.initial_backoff(),
                max_backoff: config.max_backoff(),
                keepalive: None,
            },
            events_tx,
        );
        let control_channel = Channel::spawn(
            ChannelConfig {
                name: "control",
                url: config.control_url(),
                initial_backoff: config.initial_backoff(),
                max_backoff: config.max_backoff(),
                keepalive: Some(Keepalive {
                    interval: config.ping_interval(),
                    frame: protocol::ping_frame(),
                }),
            },
            control_tx,
        );

        let (control, publish_status, drops) =
            ControlSession::new(config.ack_timeout(), crate::constants::PUBLISH_CLEAR_DELAY);
        let log = EventLog::shared(config.event_capacity);

        let handle = SessionHandle {
            command_tx,
            log: SharedEventLog::clone(&log),
            events_state: events_channel.watch_state(),
            control_state: control_channel.watch_state(),
            publish_status: publish_status.clone(),
            drops: drops.clone(),
        };

        let session = Self {
            events_channel,
            control_channel,
            events_rx,
            control_rx,
            command_rx,
            notices_tx,
            log,
            control,
            publish_status,
            drops,
            decode_failures: [0, 0],
        };
        tokio::spawn(session.run());

        (handle, notices_rx)
    }

    /// Supervisor loop: route channel events, commands, and timer ticks.
    async fn run(mut self) {
        let mut last_status = self.publish_status.borrow().clone();
        let mut last_drops = *self.drops.borrow();

        loop {
            // Far-future fallback keeps the timer arm inert when the
            // control session has no pending deadline.
            let deadline = self
                .control
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + std::time::Duration::from_secs(3600));

            tokio::select! {
                Some(ev) = self.events_rx.recv() => self.on_events_event(ev),
                Some(ev) = self.control_rx.recv() => self.on_control_event(ev),
                Some(cmd) = self.command_rx.recv() => {
                    if matches!(cmd, Command::Shutdown) {
                        break;
                    }
                    self.on_command(cmd);
                }
                () = tokio::time::sleep_until(deadline), if self.control.next_deadline().is_some() => {
                    if let Some(frame) = self.control.on_tick(Instant::now()) {
                        self.control_channel.send(frame);
                    }
                }
                else => break,
            }

            // Surface control-state transitions caused by whichever arm ran.
            let status = self.publish_status.borrow().clone();
            if status != last_status {
                last_status = status.clone();
                let _ = self.notices_tx.send(Notice::Publish(status));
            }
            let drops = *self.drops.borrow();
            if drops != last_drops {
                last_drops = drops;
                let _ = self.notices_tx.send(Notice::Drops(drops));
            }
        }

        log::debug!(
            "[session] shutting down (discarded frames: events={}, control={})",
            self.decode_failures[0],
            self.decode_failures[1]
        );
        self.events_channel.shutdown();
        self.control_channel.shutdown();
    }

    fn on_events_event(&mut self, ev: ChannelEvent) {
        match ev {
            ChannelEvent::Opened => {
                let _ = self.notices_tx.send(Notice::Connected(ChannelKind::Events));
            }
            ChannelEvent::Closed => {
                let _ = self.notices_tx.send(Notice::Disconnected(ChannelKind::Events));
            }
            ChannelEvent::Frame(text) => match protocol::decode_event(&text) {
                Ok(event) => {
                    if let Ok(mut log) = self.log.write() {
                        log.ingest(event.clone());
                    }
                    let _ = self.notices_tx.send(Notice::Event(event));
                }
                Err(e) => self.on_decode_failure(ChannelKind::Events, &e),
            },
        }
    }

    fn on_control_event(&mut self, ev: ChannelEvent) {
        match ev {
            ChannelEvent::Opened => {
                let _ = self.notices_tx.send(Notice::Connected(ChannelKind::Control));
            }
            ChannelEvent::Closed => {
                self.control.on_disconnect();
                let _ = self.notices_tx.send(Notice::Disconnected(ChannelKind::Control));
            }
            ChannelEvent::Frame(text) => match protocol::decode_control(&text) {
                Ok(frame) => {
                    if let Some(next) = self.control.handle_frame(&frame, Instant::now()) {
                        self.control_channel.send(next);
                    }
                }
                Err(e) => self.on_decode_failure(ChannelKind::Control, &e),
            },
        }
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Publish { frame } => {
                if let Some(frame) = self.control.dispatch(frame, Instant::now()) {
                    self.control_channel.send(frame);
                }
            }
            Command::Reset => {
                if let Ok(mut log) = self.log.write() {
                    log.clear();
                }
                log::info!("[session] event log cleared");
            }
            Command::Shutdown => unreachable!("handled in the select loop"),
        }
    }

    /// A malformed frame is discarded without touching any state; the
    /// connection stays up.
    fn on_decode_failure(&mut self, kind: ChannelKind, error: &protocol::DecodeError) {
        let slot = match kind {
            ChannelKind::Events => 0,
            ChannelKind::Control => 1,
        };
        self.decode_failures[slot] += 1;
        log::warn!("[{kind}] discarding undecodable frame: {error}");
    }
}
