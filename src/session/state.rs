//! Call state machine and shared status.
//!
//! [`CallState`] is driven by the [`CallController`](super::CallController)
//! and the playback task.  A status view (terminal line, tray icon, …)
//! reads it through [`SharedStatus`].
//!
//! ```text
//! Idle ──start──▶ Connecting ──transport open──▶ Open(Listening) ⇄ Open(Speaking)
//!                     │                               │
//!                     └─ permission / connect failure └─ hang-up, close, error
//!                        ▼                               ▼
//!                      Denied                         Closing ──▶ Idle
//! ```

use std::sync::{Arc, Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// CallState
// ---------------------------------------------------------------------------

/// Whether remote audio is currently scheduled for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activity {
    #[default]
    Listening,
    Speaking,
}

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallState {
    /// No call.
    #[default]
    Idle,
    /// Acquiring devices and opening the transport.
    Connecting,
    /// Session established.
    Open(Activity),
    /// Tearing down.
    Closing,
    /// A fatal failure while connecting; the call never opened.
    Denied,
}

impl CallState {
    /// `true` while a session handle exists (connecting, open or closing).
    ///
    /// ```
    /// use live_call::session::{Activity, CallState};
    ///
    /// assert!(!CallState::Idle.is_active());
    /// assert!(CallState::Connecting.is_active());
    /// assert!(CallState::Open(Activity::Speaking).is_active());
    /// assert!(!CallState::Denied.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Connecting | CallState::Open(_) | CallState::Closing
        )
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CallState::Open(_))
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self, CallState::Open(Activity::Speaking))
    }

    /// Short label for the status line.
    pub fn label(&self) -> &'static str {
        match self {
            CallState::Idle => "Idle",
            CallState::Connecting => "Initializing...",
            CallState::Open(Activity::Listening) => "Listening",
            CallState::Open(Activity::Speaking) => "Speaking",
            CallState::Closing => "Ending call",
            CallState::Denied => "Connection denied",
        }
    }
}

// ---------------------------------------------------------------------------
// CallStatus
// ---------------------------------------------------------------------------

/// Everything a status view needs about the current call.
#[derive(Debug, Clone, Default)]
pub struct CallStatus {
    pub state: CallState,

    /// Reason for the last fatal failure, shown while `state == Denied`.
    pub error_message: Option<String>,

    /// Smoothed output level in `[0.0, 1.0]` for the voice indicator.
    pub output_level: f32,

    /// Audio and image frames queued for sending this call.
    pub frames_sent: u64,
    /// Frames dropped because the outbound queue was full.
    pub frames_dropped: u64,
    /// Inbound chunks scheduled for playback.
    pub chunks_played: u64,
    /// Inbound chunks rejected as malformed.
    pub chunks_skipped: u64,
    /// Barge-in signals handled.
    pub interruptions: u64,
}

impl CallStatus {
    /// Human-readable status line.
    pub fn status_line(&self) -> String {
        match (&self.state, &self.error_message) {
            (CallState::Denied, Some(reason)) => format!("Connection denied: {reason}"),
            (state, _) => state.label().to_string(),
        }
    }

    /// Zero the per-call counters.
    pub fn reset_counters(&mut self) {
        self.output_level = 0.0;
        self.frames_sent = 0;
        self.frames_dropped = 0;
        self.chunks_played = 0;
        self.chunks_skipped = 0;
        self.interruptions = 0;
    }

    /// Set the speaking sub-state; ignored unless the call is open.
    pub fn set_activity(&mut self, activity: Activity) {
        if self.state.is_open() {
            self.state = CallState::Open(activity);
        }
    }
}

// ---------------------------------------------------------------------------
// SharedStatus
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`CallStatus`].  Do not hold the lock across
/// `.await` points.
pub type SharedStatus = Arc<Mutex<CallStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(CallStatus::default()))
}

/// Lock the status, recovering from poisoning.
pub fn lock_status(status: &SharedStatus) -> MutexGuard<'_, CallStatus> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
