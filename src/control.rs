//! Control-channel session state.
//!
//! Reconciles publish requests with the acknowledgements the relay sends
//! back on the control channel, and tracks the relay's `dropped_ws`
//! telemetry counter.
//!
//! The wire protocol carries no request tag, so acks cannot be attributed
//! to a specific publish. Publishes are therefore serialized: at most one
//! frame is in flight at a time and later submissions queue FIFO behind
//! it. The next ack always belongs to the single in-flight frame.
//!
//! This module is a pure state machine: the session supervisor feeds it
//! decoded frames and the current time, transmits whatever frame a method
//! returns, and re-arms its timer from [`ControlSession::next_deadline`].

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::protocol::{ControlFrame, Encoding, PublishFrame};

/// Failure reason used when the control channel drops with work in flight.
const DISCONNECTED_ERROR: &str = "control channel disconnected";

/// Failure reason used when an ack never arrives.
const TIMEOUT_ERROR: &str = "ack timeout";

/// One user-initiated publish.
#[derive(Debug, Clone)]
pub struct PublishRequest {
    /// Routing key; must be non-empty after trimming.
    pub topic: String,
    /// Raw payload text as entered.
    pub payload: String,
    /// How the relay should interpret `payload`.
    pub encoding: Encoding,
    /// Optional extra base64 frames (the relay ignores `payload` when set).
    pub multipart: Option<Vec<String>>,
}

impl PublishRequest {
    /// Convenience constructor for the common single-payload case.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            encoding,
            multipart: None,
        }
    }

    /// Check the request is transmittable.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::EmptyTopic`] when the trimmed topic is empty.
    pub fn validate(&self) -> Result<(), SubmitError> {
        if self.topic.trim().is_empty() {
            return Err(SubmitError::EmptyTopic);
        }
        Ok(())
    }

    /// Serialize the wire frame for this request.
    #[must_use]
    pub fn frame_json(&self) -> String {
        let frame = PublishFrame {
            action: "publish",
            topic: &self.topic,
            payload: &self.payload,
            encoding: self.encoding,
            multipart: self.multipart.as_deref(),
        };
        // A struct of strings cannot fail to serialize.
        serde_json::to_string(&frame).unwrap_or_default()
    }
}

/// Synchronous submit failure, reported to the caller before anything is
/// transmitted or queued.
#[derive(Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// The topic was empty or whitespace-only.
    EmptyTopic,
    /// The control channel is not open.
    NotConnected,
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTopic => write!(f, "topic must be a non-empty string"),
            Self::NotConnected => write!(f, "control channel not connected"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Observable outcome of the most recent publish activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishStatus {
    /// No publish activity to report.
    Idle,
    /// A publish frame has been transmitted and awaits its ack.
    InFlight,
    /// The last publish was acknowledged; auto-clears to `Idle` shortly.
    Published,
    /// The last publish failed; persists until superseded.
    Failed(String),
}

/// Tracks the in-flight publish, the queue behind it, the relay's drop
/// counter, and the timers that clear or expire publish state.
#[derive(Debug)]
pub struct ControlSession {
    status_tx: watch::Sender<PublishStatus>,
    dropped_tx: watch::Sender<u64>,
    /// Deadline of the in-flight publish, if any.
    ack_deadline: Option<Instant>,
    /// When a transient `Published` status reverts to `Idle`.
    clear_deadline: Option<Instant>,
    queue: VecDeque<String>,
    ack_timeout: Duration,
    clear_delay: Duration,
}

impl ControlSession {
    /// Create a session plus the receivers observing its state.
    #[must_use]
    pub fn new(
        ack_timeout: Duration,
        clear_delay: Duration,
    ) -> (Self, watch::Receiver<PublishStatus>, watch::Receiver<u64>) {
        let (status_tx, status_rx) = watch::channel(PublishStatus::Idle);
        let (dropped_tx, dropped_rx) = watch::channel(0);
        (
            Self {
                status_tx,
                dropped_tx,
                ack_deadline: None,
                clear_deadline: None,
                queue: VecDeque::new(),
                ack_timeout,
                clear_delay,
            },
            status_rx,
            dropped_rx,
        )
    }

    /// Accept a validated, serialized publish frame.
    ///
    /// Returns the frame to transmit now, or `None` when it was queued
    /// behind the in-flight publish.
    pub fn dispatch(&mut self, frame: String, now: Instant) -> Option<String> {
        if self.ack_deadline.is_some() {
            log::debug!("[control] publish queued behind in-flight request ({} waiting)", self.queue.len() + 1);
            self.queue.push_back(frame);
            return None;
        }
        self.begin_flight(now);
        Some(frame)
    }

    /// Apply one decoded control frame.
    ///
    /// Drop-reports and acks are independent effects and may share a
    /// frame; a frame with neither is ignored. Returns the next queued
    /// publish frame to transmit when the ack freed the in-flight slot.
    pub fn handle_frame(&mut self, frame: &ControlFrame, now: Instant) -> Option<String> {
        if let Some(dropped) = frame.dropped_ws {
            // Last-write-wins, including decreases after a relay restart.
            // send_if_modified keeps re-delivery of the same value free of
            // observer wakeups.
            self.dropped_tx.send_if_modified(|current| {
                if *current == dropped {
                    false
                } else {
                    log::debug!("[control] relay drop count now {dropped}");
                    *current = dropped;
                    true
                }
            });
        }

        match frame.ok {
            Some(true) => self.resolve(Ok(()), now),
            Some(false) => {
                let error = frame.error.clone().unwrap_or_else(|| "unknown".to_string());
                self.resolve(Err(error), now)
            }
            None => {
                if frame.action.as_deref() == Some("pong") {
                    log::trace!("[control] pong (relay ts {:?})", frame.ts);
                }
                None
            }
        }
    }

    /// Handle expired deadlines; call whenever [`Self::next_deadline`]
    /// elapses. Returns the next queued publish frame to transmit when an
    /// ack timeout freed the in-flight slot.
    pub fn on_tick(&mut self, now: Instant) -> Option<String> {
        if self.clear_deadline.is_some_and(|d| d <= now) {
            self.clear_deadline = None;
            if *self.status_tx.borrow() == PublishStatus::Published {
                self.status_tx.send_replace(PublishStatus::Idle);
            }
        }

        if self.ack_deadline.is_some_and(|d| d <= now) {
            log::warn!("[control] no ack within {:?}; giving up on publish", self.ack_timeout);
            return self.resolve(Err(TIMEOUT_ERROR.to_string()), now);
        }
        None
    }

    /// The control channel dropped: fail the in-flight publish and
    /// everything queued behind it. Nothing is retained for replay.
    pub fn on_disconnect(&mut self) {
        let in_flight = self.ack_deadline.take().is_some();
        let queued = self.queue.len();
        self.queue.clear();
        self.clear_deadline = None;
        if in_flight || queued > 0 {
            log::warn!(
                "[control] disconnected with {} publish(es) unresolved",
                queued + usize::from(in_flight)
            );
            self.status_tx
                .send_replace(PublishStatus::Failed(DISCONNECTED_ERROR.to_string()));
        }
    }

    /// Earliest pending deadline, for the supervisor's timer arm.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.ack_deadline, self.clear_deadline) {
            (Some(a), Some(c)) => Some(a.min(c)),
            (a, c) => a.or(c),
        }
    }

    fn begin_flight(&mut self, now: Instant) {
        self.ack_deadline = Some(now + self.ack_timeout);
        self.status_tx.send_replace(PublishStatus::InFlight);
    }

    /// Resolve the in-flight publish and start the next queued one.
    fn resolve(&mut self, outcome: Result<(), String>, now: Instant) -> Option<String> {
        if self.ack_deadline.take().is_none() {
            log::debug!("[control] ack with no publish in flight; ignoring");
            return None;
        }
        match outcome {
            Ok(()) => {
                self.status_tx.send_replace(PublishStatus::Published);
                self.clear_deadline = Some(now + self.clear_delay);
            }
            Err(error) => {
                self.status_tx.send_replace(PublishStatus::Failed(error));
                self.clear_deadline = None;
            }
        }
        let next = self.queue.pop_front();
        if next.is_some() {
            self.begin_flight(now);
        }
        next
    }
}
