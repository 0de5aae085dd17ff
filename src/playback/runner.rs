//! Playback task: the single consumer of inbound server events.
//!
//! [`PlaybackRunner`] owns the [`PlaybackScheduler`] and is the only code
//! that mutates it, so `next_start_time` and the active set need no lock.
//!
//! # Event flow
//!
//! ```text
//! ServerEvent::Audio        └─▶ schedule_chunk             [Speaking]
//!                                 └─ Err → warn, skip
//! voice ended (output)      └─▶ on_ended → set empty?      [Listening]
//! ServerEvent::Interrupted  └─▶ interrupt (stop all, next=0) [Listening]
//! ServerEvent::Error/Closed └─▶ discard, signal controller
//! shutdown (hang-up)        └─▶ discard, exit quietly
//! ```

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::scheduler::PlaybackScheduler;
use crate::audio::VoiceId;
use crate::live::ServerEvent;
use crate::session::{lock_status, Activity, SharedStatus};

/// How often the output level is copied into the status.
const LEVEL_INTERVAL: Duration = Duration::from_millis(50);

/// Why the playback task stopped on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum CallSignal {
    /// The transport closed, with the peer's reason if it gave one.
    Closed(Option<String>),
    /// The server reported an error.
    Failed(String),
}

/// Drives the scheduler from server events and output notifications.
pub struct PlaybackRunner {
    scheduler: PlaybackScheduler,
    status: SharedStatus,
}

impl PlaybackRunner {
    pub fn new(scheduler: PlaybackScheduler, status: SharedStatus) -> Self {
        Self { scheduler, status }
    }

    /// Run until the transport closes, the server fails, or `shutdown`
    /// fires.  Scheduled audio is discarded on every exit path.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ServerEvent>,
        mut ended: mpsc::UnboundedReceiver<VoiceId>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Option<CallSignal> {
        let mut level_tick = tokio::time::interval(LEVEL_INTERVAL);
        level_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let signal = loop {
            tokio::select! {
                _ = &mut shutdown => break None,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(signal) = self.handle_event(event) {
                            break Some(signal);
                        }
                    }
                    None => break Some(CallSignal::Closed(None)),
                },
                Some(id) = ended.recv() => self.handle_ended(id),
                _ = level_tick.tick() => self.publish_level(),
            }
        };

        self.scheduler.discard();
        {
            let mut st = lock_status(&self.status);
            st.output_level = 0.0;
            st.set_activity(Activity::Listening);
        }
        log::debug!("playback: task finished ({signal:?})");
        signal
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn handle_event(&mut self, event: ServerEvent) -> Option<CallSignal> {
        match event {
            ServerEvent::Audio { data, mime_type } => {
                match self.scheduler.schedule_chunk(&data, mime_type.as_deref()) {
                    Ok(_) => {
                        let mut st = lock_status(&self.status);
                        st.chunks_played += 1;
                        st.set_activity(Activity::Speaking);
                    }
                    Err(e) => {
                        log::warn!("playback: skipping malformed chunk: {e}");
                        lock_status(&self.status).chunks_skipped += 1;
                    }
                }
            }
            ServerEvent::Interrupted => {
                let stopped = self.scheduler.interrupt();
                log::info!("playback: interrupted, {stopped} voices cut off");
                let mut st = lock_status(&self.status);
                st.interruptions += 1;
                st.output_level = 0.0;
                st.set_activity(Activity::Listening);
            }
            ServerEvent::Text(text) => log::info!("model: {text}"),
            ServerEvent::TurnComplete => log::debug!("playback: turn complete"),
            ServerEvent::SetupComplete => log::debug!("playback: duplicate setupComplete"),
            ServerEvent::Error(message) => {
                log::error!("live: server error: {message}");
                return Some(CallSignal::Failed(message));
            }
            ServerEvent::Closed { reason } => return Some(CallSignal::Closed(reason)),
        }
        None
    }

    fn handle_ended(&mut self, id: VoiceId) {
        if self.scheduler.on_ended(id) {
            lock_status(&self.status).set_activity(Activity::Listening);
        }
    }

    /// The level is cosmetic; only the active set decides the sub-state.
    fn publish_level(&self) {
        let mut st = lock_status(&self.status);
        st.output_level = self.scheduler.output_level();
        st.set_activity(if self.scheduler.is_speaking() {
            Activity::Speaking
        } else {
            Activity::Listening
        });
    }
}

/// Spawn the playback task.  A [`CallSignal`] is delivered on `signal`
/// only when the task ends for a reason other than `shutdown`.
pub fn spawn_playback(
    runner: PlaybackRunner,
    events: mpsc::Receiver<ServerEvent>,
    ended: mpsc::UnboundedReceiver<VoiceId>,
    shutdown: oneshot::Receiver<()>,
    signal: oneshot::Sender<CallSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Some(reason) = runner.run(events, ended, shutdown).await {
            let _ = signal.send(reason);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
