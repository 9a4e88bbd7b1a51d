//! Per-playback session state.
//!
//! Every `play` creates one [`PlaybackSession`] owning the shared control
//! flags: the session id sent to the synthesis service, the stop signal,
//! and the pause gate. Stopping replaces the whole session, which is what
//! invalidates any work still in flight for it.

use std::fmt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Playback status, exposed through a watch observable.
#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Idle,
    /// Waiting for the first batch's audio.
    Buffering,
    /// Scheduling batch `batch` onto the timeline.
    Playing { batch: usize },
    Paused,
    Stopped,
    /// All batches played to the end of the document.
    Completed,
    Error(String),
}

impl Status {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Status::Buffering | Status::Playing { .. } | Status::Paused
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Idle => write!(f, "Idle"),
            Status::Buffering => write!(f, "Buffering..."),
            Status::Playing { batch } => write!(f, "Reading segment {}...", batch + 1),
            Status::Paused => write!(f, "Paused"),
            Status::Stopped => write!(f, "Stopped"),
            Status::Completed => write!(f, "Completed"),
            Status::Error(message) => write!(f, "Error: {message}"),
        }
    }
}

/// Control state for one playback attempt.
pub struct PlaybackSession {
    id: String,
    stop: CancellationToken,
    paused: watch::Sender<bool>,
}

impl PlaybackSession {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4().to_string(),
            stop: CancellationToken::new(),
            paused,
        }
    }

    /// Session id, as communicated to the synthesis service.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Signals stop. Idempotent; wakes every suspension point.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn set_paused(&self, paused: bool) {
        let _ = self.paused.send(paused);
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Blocks while paused. Returns `false` when the session was stopped
    /// while (or before) waiting, `true` once playback may proceed.
    pub async fn wait_while_paused(&self) -> bool {
        let mut rx = self.paused.subscribe();
        loop {
            if self.is_stopped() {
                return false;
            }
            if !*rx.borrow_and_update() {
                return true;
            }
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self::new()
    }
}
